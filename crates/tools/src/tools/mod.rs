//! Built-in tool implementations.

mod duckdb;
mod http;
mod postgres;
mod python;
mod rhai;
mod script;
mod snowflake;
mod transfer;

pub use duckdb::DuckdbTool;
pub use http::HttpTool;
pub use postgres::PostgresTool;
pub use python::PythonTool;
pub use rhai::RhaiTool;
pub use script::ScriptTool;
pub use snowflake::SnowflakeTool;
pub use transfer::TransferTool;

use crate::registry::ToolRegistry;

/// Build a registry with every built-in tool registered.
pub fn create_default_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(HttpTool::new());
    registry.register(PostgresTool::new());
    registry.register(PythonTool::new());
    registry.register(RhaiTool::new());
    registry.register(ScriptTool::new());
    registry.register(SnowflakeTool::new());
    registry.register(TransferTool::new());
    registry.register(DuckdbTool::new());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_all_tools() {
        let registry = create_default_registry();
        assert!(registry.has("http"));
        assert!(registry.has("postgres"));
        assert!(registry.has("python"));
        assert!(registry.has("rhai"));
        assert!(registry.has("script"));
        assert!(registry.has("snowflake"));
        assert!(registry.has("transfer"));
    }
}
