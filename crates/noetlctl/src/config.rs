//! CLI configuration: named server contexts persisted to disk.

use anyhow::{Context as AnyhowContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// A named connection to a NoETL server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    pub server_url: String,
    #[serde(default = "default_runtime")]
    pub runtime: String,
}

fn default_runtime() -> String {
    "auto".to_string()
}

impl Context {
    pub fn new(server_url: String) -> Self {
        Self {
            server_url,
            runtime: default_runtime(),
        }
    }

    pub fn with_runtime(mut self, runtime: String) -> Self {
        self.runtime = runtime;
        self
    }
}

/// Persisted CLI configuration: `~/.noetl/config.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub current_context: Option<String>,
    #[serde(default)]
    pub contexts: HashMap<String, Context>,
}

impl Config {
    fn path() -> Result<PathBuf> {
        let home = dirs::home_dir().context("Could not determine home directory")?;
        Ok(home.join(".noetl").join("config.json"))
    }

    /// Load the config from disk, or return a default (empty) config if none exists yet.
    pub fn load() -> Result<Self> {
        let path = Self::path()?;
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .context(format!("Failed to read config file: {:?}", path))?;
        let config: Config =
            serde_json::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Persist the config to disk, creating `~/.noetl` if needed.
    pub fn save(&self) -> Result<()> {
        let path = Self::path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .context(format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context(format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// The current context's name and definition, if one is set.
    pub fn get_current_context(&self) -> Option<(&String, &Context)> {
        let name = self.current_context.as_ref()?;
        let ctx = self.contexts.get(name)?;
        Some((name, ctx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_builder() {
        let ctx = Context::new("http://localhost:8082".to_string()).with_runtime("local".to_string());
        assert_eq!(ctx.server_url, "http://localhost:8082");
        assert_eq!(ctx.runtime, "local");
    }

    #[test]
    fn test_config_default_has_no_current_context() {
        let config = Config::default();
        assert!(config.get_current_context().is_none());
    }

    #[test]
    fn test_get_current_context_resolves() {
        let mut config = Config::default();
        config
            .contexts
            .insert("local".to_string(), Context::new("http://localhost:8082".to_string()));
        config.current_context = Some("local".to_string());

        let (name, ctx) = config.get_current_context().unwrap();
        assert_eq!(name, "local");
        assert_eq!(ctx.server_url, "http://localhost:8082");
    }
}
