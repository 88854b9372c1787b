//! Tool execution error types.

use thiserror::Error;

/// Errors that can occur while resolving configuration, authenticating, or
/// executing a tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool configuration failed to parse or was missing required fields.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Authentication/credential resolution failed.
    #[error("auth error: {0}")]
    Auth(String),

    /// A database-backed tool (postgres, duckdb, snowflake) failed.
    #[error("database error: {0}")]
    Database(String),

    /// An HTTP request made by a tool failed.
    #[error("http error: {0}")]
    Http(String),

    /// A subprocess-backed tool (python, script) failed to spawn or run.
    #[error("process error: {0}")]
    Process(String),

    /// Embedded script evaluation (rhai) failed.
    #[error("script error: {0}")]
    Script(String),

    /// Template rendering failed.
    #[error("template error: {0}")]
    Template(String),
}

impl From<minijinja::Error> for ToolError {
    fn from(e: minijinja::Error) -> Self {
        ToolError::Template(e.to_string())
    }
}

impl From<reqwest::Error> for ToolError {
    fn from(e: reqwest::Error) -> Self {
        ToolError::Http(e.to_string())
    }
}
