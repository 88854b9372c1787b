//! Command executor.

use anyhow::Result;
use noetl_tools::context::ExecutionContext;
use noetl_tools::registry::{ToolConfig, ToolRegistry};
use noetl_tools::tools::create_default_registry;

use crate::client::{Command, ControlPlaneClient, WorkerEvent};
use crate::executor::case_evaluator::{CaseAction, CaseEvaluator};

/// An execution failure that carries whether it should be retried.
///
/// `fail_job` needs this classification to decide between scheduling a
/// retry and dead-lettering immediately; a plain `anyhow::Error` loses it
/// by the time it reaches `worker.rs`.
#[derive(Debug)]
pub struct CommandError {
    pub message: String,
    pub retryable: bool,
}

impl CommandError {
    pub fn retryable(message: impl Into<String>) -> anyhow::Error {
        CommandError {
            message: message.into(),
            retryable: true,
        }
        .into()
    }

    pub fn non_retryable(message: impl Into<String>) -> anyhow::Error {
        CommandError {
            message: message.into(),
            retryable: false,
        }
        .into()
    }
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CommandError {}

/// Command executor that runs tools and evaluates cases.
pub struct CommandExecutor {
    /// Tool registry with all available tools.
    tool_registry: ToolRegistry,

    /// Case evaluator for when/then logic.
    case_evaluator: CaseEvaluator,

    /// Control plane client for event emission.
    client: ControlPlaneClient,

    /// Worker ID.
    worker_id: String,
}

impl CommandExecutor {
    /// Create a new command executor.
    pub fn new(client: ControlPlaneClient, worker_id: String) -> Self {
        Self {
            tool_registry: create_default_registry(),
            case_evaluator: CaseEvaluator::new(),
            client,
            worker_id,
        }
    }

    /// Execute a command.
    pub async fn execute(&self, command: &Command) -> Result<()> {
        // Build execution context
        let mut ctx = ExecutionContext::new(
            command.execution_id,
            &command.step,
            "", // Server URL not needed in context for now
        )
        .with_worker_id(&self.worker_id)
        .with_command_id(&command.command_id);

        // Add variables and secrets
        ctx.variables = command.variables.clone();
        ctx.secrets = command.secrets.clone();

        // Emit action_started event
        self.emit_event("action_started", command.execution_id, serde_json::json!({
            "command_id": command.command_id,
            "worker_id": self.worker_id,
            "step": command.step,
        }))
        .await?;

        // Parse tool configuration. A malformed tool spec is a validation
        // error: it will never parse differently on retry.
        let tool_config: ToolConfig = serde_json::from_value(command.tool.clone())
            .map_err(|e| CommandError::non_retryable(format!("invalid tool config: {}", e)))?;

        // Resolve any credential reference into a secret before dispatch
        // (the "Prepare" phase, run once per task; never logs the secret
        // itself, only the credential's name).
        if let Some(credential) = tool_config.auth.as_ref().and_then(|a| a.credential.clone()) {
            if !ctx.secrets.contains_key(&credential) {
                match self
                    .client
                    .resolve_auth(command.catalog_id, command.execution_id, &credential)
                    .await
                {
                    Ok(Some(data)) => {
                        ctx.set_secret(credential.clone(), Self::secret_value_as_string(&data));
                    }
                    Ok(None) => {
                        tracing::warn!(credential = %credential, "credential not found during auth resolution");
                    }
                    Err(e) => {
                        tracing::warn!(credential = %credential, error = %e, "failed to resolve credential");
                    }
                }
            }
        }

        tracing::debug!(
            execution_id = command.execution_id,
            step = %command.step,
            tool = %tool_config.kind,
            "Executing tool"
        );

        // Execute the tool. A tool-level failure reported as `Ok(ToolResult{
        // status: Error | Timeout, ..})` is a real failure and must not be
        // treated as success: it is routed through the same action_error
        // path as a registry-level `Err`, so retry policy and dead-lettering
        // apply to it.
        let tool_result = match self.tool_registry.execute_from_config(&tool_config, &ctx).await {
            Ok(result) if result.status.is_error() || result.status.is_timeout() => {
                let error_message = result
                    .error
                    .clone()
                    .unwrap_or_else(|| format!("tool reported status {}", result.status));

                self.emit_event("action_error", command.execution_id, serde_json::json!({
                    "command_id": command.command_id,
                    "call_index": ctx.call_index,
                    "error": error_message,
                    "status": result.status.to_string(),
                }))
                .await?;

                return Err(CommandError::retryable(error_message));
            }
            Ok(result) => result,
            Err(e) => {
                // Registry-level failure (unknown tool, bad config): never retryable.
                self.emit_event("action_error", command.execution_id, serde_json::json!({
                    "command_id": command.command_id,
                    "call_index": ctx.call_index,
                    "error": e.to_string(),
                }))
                .await?;

                return Err(CommandError::non_retryable(e.to_string()));
            }
        };

        // Parse cases from command
        let cases: Vec<crate::executor::case_evaluator::Case> =
            command.cases.iter().filter_map(|c| serde_json::from_value(c.clone()).ok()).collect();

        // Evaluate cases
        if !cases.is_empty() {
            if let Some(case_result) = self.case_evaluator.evaluate(&cases, &ctx, tool_result.data.as_ref())? {
                match case_result.action {
                    CaseAction::Exit { status, data } => {
                        // The case evaluator decided the step is done early
                        // (e.g. a "when" matched a terminal condition).
                        // Reported as a step_completed so the broker's
                        // trigger matching treats it the same as the normal
                        // end-of-step path.
                        self.emit_event("step_completed", command.execution_id, serde_json::json!({
                            "step": command.step,
                            "status": status,
                            "data": data,
                        }))
                        .await?;
                    }
                    CaseAction::SetVar { name, value } => {
                        // Set variable via API
                        self.client.set_variable(command.execution_id, &name, value).await?;
                    }
                    CaseAction::Fail { message } => {
                        // An explicit case-driven failure is a policy
                        // decision, not a transient tool error: never retried.
                        self.emit_event("action_error", command.execution_id, serde_json::json!({
                            "command_id": command.command_id,
                            "error": message,
                        }))
                        .await?;

                        return Err(CommandError::non_retryable(format!(
                            "Case evaluation failed: {}",
                            message
                        )));
                    }
                    CaseAction::Continue | CaseAction::Goto { .. } | CaseAction::Retry { .. } => {
                        // These are handled by the orchestrator
                    }
                }
            }
        }

        // Reached only once the tool call and any case evaluation have both
        // succeeded: this is the single action_completed event for the command.
        self.emit_event("action_completed", command.execution_id, serde_json::json!({
            "command_id": command.command_id,
            "status": tool_result.status.to_string(),
        }))
        .await?;

        Ok(())
    }

    /// Reduce a resolved credential's (possibly structured) data to the
    /// single string `ExecutionContext::secrets` expects. Prefers the
    /// conventional single-value field for the credential types §6 lists
    /// (`token` for bearer, `password` for basic/postgres, `secret_key` for
    /// HMAC/object-storage, `value` for a raw header), falling back to the
    /// compact JSON form for anything else so multi-field credentials are
    /// still usable from a template's `secret[...]` lookup.
    fn secret_value_as_string(data: &serde_json::Value) -> String {
        if let serde_json::Value::String(s) = data {
            return s.clone();
        }

        for field in ["token", "password", "secret_key", "value", "api_key"] {
            if let Some(serde_json::Value::String(s)) = data.get(field) {
                return s.clone();
            }
        }

        data.to_string()
    }

    /// Emit an event to the control plane.
    async fn emit_event(
        &self,
        event_type: &str,
        execution_id: i64,
        payload: serde_json::Value,
    ) -> Result<()> {
        let event = WorkerEvent {
            event_type: event_type.to_string(),
            execution_id,
            payload,
        };

        self.client.emit_event_with_retry(event, 3).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_executor_creation() {
        let client = ControlPlaneClient::new("http://localhost:8082");
        let executor = CommandExecutor::new(client, "worker-1".to_string());

        // Verify tools are registered
        assert!(executor.tool_registry.has("shell"));
        assert!(executor.tool_registry.has("http"));
        assert!(executor.tool_registry.has("rhai"));
    }

    #[test]
    fn test_secret_value_as_string_prefers_token_field() {
        let data = serde_json::json!({"token": "abc123", "scope": "read"});
        assert_eq!(CommandExecutor::secret_value_as_string(&data), "abc123");
    }

    #[test]
    fn test_secret_value_as_string_falls_back_to_json() {
        let data = serde_json::json!({"db_host": "localhost", "db_port": 5432});
        let rendered = CommandExecutor::secret_value_as_string(&data);
        assert!(rendered.contains("localhost"));
    }

    #[test]
    fn test_secret_value_as_string_plain_string() {
        let data = serde_json::json!("raw-secret");
        assert_eq!(CommandExecutor::secret_value_as_string(&data), "raw-secret");
    }
}
