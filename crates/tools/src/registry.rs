//! Tool trait and registry.
//!
//! A [`Tool`] executes one step's action (an HTTP call, a SQL query, a
//! script, ...). [`ToolRegistry`] dispatches a [`ToolConfig`] to the tool
//! named by its `kind` field.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::context::ExecutionContext;
use crate::error::ToolError;
use crate::result::ToolResult;

/// Authentication method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    Bearer,
    Basic,
    ApiKey,
    GcpAdc,
    None,
}

/// Authentication configuration attached to a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(rename = "type")]
    pub auth_type: AuthType,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub token: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub credential: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub username: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub header: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub scopes: Option<Vec<String>>,
}

/// A tool invocation as handed to the registry: which tool (`kind`), its
/// tool-specific `config` payload (rendered against the execution context
/// before being parsed into the tool's own config struct), optional auth,
/// and an optional timeout override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Name of the registered tool to dispatch to (e.g. "http", "postgres").
    pub kind: String,

    /// Tool-specific configuration payload.
    #[serde(default)]
    pub config: serde_json::Value,

    /// Authentication configuration, if the tool requires it.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub auth: Option<AuthConfig>,

    /// Timeout override in seconds.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub timeout: Option<u64>,
}

/// A runnable tool. Implementations parse their own config out of
/// [`ToolConfig::config`] and render any templated fields against the
/// execution context before running.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Registry name this tool is dispatched under.
    fn name(&self) -> &'static str;

    /// Run the tool.
    async fn execute(&self, config: &ToolConfig, ctx: &ExecutionContext) -> Result<ToolResult, ToolError>;
}

/// Registry of available tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool under its own name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    /// Returns true if a tool with this name is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Dispatch `config` to the tool named by `config.kind`.
    pub async fn execute_from_config(
        &self,
        config: &ToolConfig,
        ctx: &ExecutionContext,
    ) -> Result<ToolResult, ToolError> {
        let tool = self.get(&config.kind).ok_or_else(|| {
            ToolError::Configuration(format!("No tool registered for kind '{}'", config.kind))
        })?;

        tool.execute(config, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn execute(
            &self,
            config: &ToolConfig,
            _ctx: &ExecutionContext,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success(config.config.clone()))
        }
    }

    #[test]
    fn test_registry_has() {
        let mut registry = ToolRegistry::new();
        assert!(!registry.has("echo"));
        registry.register(EchoTool);
        assert!(registry.has("echo"));
    }

    #[tokio::test]
    async fn test_execute_from_config_dispatches_by_kind() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let config = ToolConfig {
            kind: "echo".to_string(),
            config: serde_json::json!({"hello": "world"}),
            auth: None,
            timeout: None,
        };
        let ctx = ExecutionContext::default();

        let result = registry.execute_from_config(&config, &ctx).await.unwrap();
        assert!(result.is_success());
        assert_eq!(result.data, Some(serde_json::json!({"hello": "world"})));
    }

    #[tokio::test]
    async fn test_execute_from_config_unknown_kind() {
        let registry = ToolRegistry::new();
        let config = ToolConfig {
            kind: "missing".to_string(),
            config: serde_json::json!({}),
            auth: None,
            timeout: None,
        };
        let ctx = ExecutionContext::default();

        let result = registry.execute_from_config(&config, &ctx).await;
        assert!(result.is_err());
    }
}
