//! Control plane HTTP client.

use anyhow::Result;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Command fetched from the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    /// Execution ID.
    pub execution_id: i64,

    /// Catalog ID of the playbook this command belongs to (needed to
    /// resolve `auth` credential references, which are cached per
    /// `(catalog_id, credential_key, execution_id)`).
    pub catalog_id: i64,

    /// Event ID.
    pub event_id: i64,

    /// Command ID.
    pub command_id: String,

    /// Step name.
    pub step: String,

    /// Tool specification.
    pub tool: serde_json::Value,

    /// Case/when/then evaluation rules.
    #[serde(default)]
    pub cases: Vec<serde_json::Value>,

    /// Variables for template rendering.
    #[serde(default)]
    pub variables: std::collections::HashMap<String, serde_json::Value>,

    /// Secrets (decrypted).
    #[serde(default)]
    pub secrets: std::collections::HashMap<String, String>,
}

/// Event to emit to the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerEvent {
    /// Event type (e.g., "command.claimed", "action_started", "action_completed").
    pub event_type: String,

    /// Execution ID.
    pub execution_id: i64,

    /// Event payload.
    pub payload: serde_json::Value,
}

/// A leased job from the work queue.
///
/// Mirrors the control plane's `noetl.queue` row. `action` is the full
/// command payload (the control plane's `engine::commands::Command`,
/// serialized) and is decoded with [`QueueJob::command`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueJob {
    pub queue_id: i64,
    pub execution_id: i64,
    pub catalog_id: i64,
    pub command_event_id: i64,
    pub step_name: String,
    pub action: serde_json::Value,
    pub attempts: i32,
    pub max_attempts: i32,
}

impl QueueJob {
    /// Decode `action` into the command payload workers execute.
    pub fn command(&self) -> Result<Command> {
        queued_command_to_executor_command(self.catalog_id, &self.action)
    }
}

/// Shape of the command JSON the control plane's orchestrator writes into
/// `noetl.queue.action`. Field names mirror
/// `noetl_control_plane::engine::commands::Command` exactly so this
/// deserializes directly off the wire.
#[derive(Debug, Clone, Deserialize)]
struct QueuedCommandPayload {
    command_id: i64,
    execution_id: i64,
    step_name: String,
    tool: serde_json::Value,
    #[serde(default)]
    context: Option<std::collections::HashMap<String, serde_json::Value>>,
}

fn queued_command_to_executor_command(catalog_id: i64, action: &serde_json::Value) -> Result<Command> {
    let payload: QueuedCommandPayload = serde_json::from_value(action.clone())?;

    Ok(Command {
        execution_id: payload.execution_id,
        catalog_id,
        event_id: payload.command_id,
        command_id: payload.command_id.to_string(),
        step: payload.step_name,
        tool: payload.tool,
        cases: Vec::new(),
        variables: payload.context.unwrap_or_default(),
        secrets: std::collections::HashMap::new(),
    })
}

/// Response to a lease request.
#[derive(Debug, Clone, Deserialize)]
struct LeaseResponse {
    jobs: Vec<QueueJob>,
}

/// Response to a credential resolution request. `data` is only present
/// when `status == "found"`; never logged by callers.
#[derive(Debug, Clone, Deserialize)]
struct AuthResolveResponse {
    #[allow(dead_code)]
    status: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
}

/// Outcome of reporting a failed job attempt.
#[derive(Debug, Clone, Deserialize)]
pub struct FailOutcome {
    pub queue_id: i64,
    pub status: String,
    #[serde(default)]
    pub next_attempt: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
struct AckResponse {
    #[allow(dead_code)]
    ok: bool,
}

/// HTTP client for control plane API.
#[derive(Clone)]
pub struct ControlPlaneClient {
    client: reqwest::Client,
    server_url: String,
}

impl ControlPlaneClient {
    /// Create a new control plane client.
    pub fn new(server_url: &str) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        Self {
            client,
            server_url: server_url.trim_end_matches('/').to_string(),
        }
    }

    /// Emit an event to the control plane.
    pub async fn emit_event(&self, event: WorkerEvent) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/events", self.server_url))
            .json(&event)
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to emit event: {}", body);
        }

        Ok(())
    }

    /// Emit an event with retry.
    pub async fn emit_event_with_retry(
        &self,
        event: WorkerEvent,
        max_retries: u32,
    ) -> Result<()> {
        let mut delay = Duration::from_millis(500);

        for attempt in 0..=max_retries {
            match self.emit_event(event.clone()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < max_retries => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max_retries,
                        error = %e,
                        "Event emission failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(10));
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }

    /// Resolve a credential reference named in a step's `auth` config to
    /// its concrete secret data, scoped and cached server-side per
    /// execution. Returns `Ok(None)` when no credential with that name
    /// exists -- callers decide whether that's fatal for the task.
    pub async fn resolve_auth(
        &self,
        catalog_id: i64,
        execution_id: i64,
        credential_key: &str,
    ) -> Result<Option<serde_json::Value>> {
        let response = self
            .client
            .get(format!(
                "{}/api/auth/resolve/{}/{}",
                self.server_url, catalog_id, credential_key
            ))
            .query(&[("execution_id", execution_id.to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to resolve auth for '{}': {}", credential_key, body);
        }

        let resolved: AuthResolveResponse = response.json().await?;
        Ok(resolved.data)
    }

    /// Get a variable value for an execution.
    pub async fn get_variable(
        &self,
        execution_id: i64,
        name: &str,
    ) -> Result<Option<serde_json::Value>> {
        let response = self
            .client
            .get(format!("{}/api/vars/{}/{}", self.server_url, execution_id, name))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to get variable: {}", body);
        }

        let value: serde_json::Value = response.json().await?;
        Ok(Some(value))
    }

    /// Set a variable value for an execution.
    pub async fn set_variable(
        &self,
        execution_id: i64,
        name: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/vars/{}", self.server_url, execution_id))
            .json(&serde_json::json!({
                name: value
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to set variable: {}", body);
        }

        Ok(())
    }

    /// Register the worker pool with the control plane.
    pub async fn register_worker(
        &self,
        worker_id: &str,
        pool_name: &str,
        hostname: &str,
    ) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/worker/pool/register", self.server_url))
            .json(&serde_json::json!({
                "worker_id": worker_id,
                "pool_name": pool_name,
                "hostname": hostname,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to register worker: {}", body);
        }

        Ok(())
    }

    /// Send a heartbeat to the control plane.
    pub async fn heartbeat(&self, worker_id: &str, pool_name: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/api/worker/pool/heartbeat", self.server_url))
            .json(&serde_json::json!({
                "worker_id": worker_id,
                "pool_name": pool_name,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Heartbeat failed: {}", body);
        }

        Ok(())
    }

    /// Deregister the worker pool.
    pub async fn deregister_worker(&self, worker_id: &str, pool_name: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/api/worker/pool/deregister", self.server_url))
            .json(&serde_json::json!({
                "worker_id": worker_id,
                "pool_name": pool_name,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!("Deregister failed: {}", body);
        }

        Ok(())
    }

    /// Lease up to `limit` queued jobs for this worker.
    pub async fn lease_jobs(&self, worker_id: &str, limit: i64) -> Result<Vec<QueueJob>> {
        let response = self
            .client
            .post(format!("{}/api/queue/lease", self.server_url))
            .json(&serde_json::json!({
                "worker_id": worker_id,
                "limit": limit,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to lease jobs: {}", body);
        }

        let lease_response: LeaseResponse = response.json().await?;
        Ok(lease_response.jobs)
    }

    /// Renew a held lease so the job is not reclaimed while still running.
    pub async fn renew_lease(&self, queue_id: i64, worker_id: &str) -> Result<bool> {
        let response = self
            .client
            .post(format!("{}/api/queue/{}/renew", self.server_url, queue_id))
            .json(&serde_json::json!({ "worker_id": worker_id }))
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(false);
        }

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to renew lease: {}", body);
        }

        Ok(true)
    }

    /// Mark a leased job as done.
    pub async fn complete_job(&self, queue_id: i64, worker_id: &str) -> Result<bool> {
        let response = self
            .client
            .post(format!("{}/api/queue/{}/complete", self.server_url, queue_id))
            .json(&serde_json::json!({ "worker_id": worker_id }))
            .send()
            .await?;

        if response.status() == StatusCode::CONFLICT {
            return Ok(false);
        }

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to complete job: {}", body);
        }

        Ok(true)
    }

    /// Report a failed attempt; the control plane decides whether to retry
    /// with backoff or dead-letter the job. `retryable` is `false` for
    /// errors that should never be retried regardless of remaining attempt
    /// budget (malformed commands, `ValidationError`, a non-retryable
    /// `ResolutionError`) and `true` for tool/infra errors subject to the
    /// step's normal retry policy.
    pub async fn fail_job(
        &self,
        queue_id: i64,
        worker_id: &str,
        error: &str,
        retryable: bool,
    ) -> Result<FailOutcome> {
        let response = self
            .client
            .post(format!("{}/api/queue/{}/fail", self.server_url, queue_id))
            .json(&serde_json::json!({
                "worker_id": worker_id,
                "error": error,
                "retryable": retryable,
            }))
            .send()
            .await?;

        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Failed to report job failure: {}", body);
        }

        let outcome: FailOutcome = response.json().await?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_event_serialization() {
        let event = WorkerEvent {
            event_type: "action_started".to_string(),
            execution_id: 12345,
            payload: serde_json::json!({"command_id": "cmd-123"}),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("action_started"));
        assert!(json.contains("12345"));
    }

    #[test]
    fn test_command_deserialization() {
        let json = serde_json::json!({
            "execution_id": 12345,
            "catalog_id": 999,
            "event_id": 67890,
            "command_id": "cmd-abc",
            "step": "process",
            "tool": {"kind": "shell", "command": "echo hello"},
            "cases": [],
            "variables": {},
            "secrets": {}
        });

        let command: Command = serde_json::from_value(json).unwrap();
        assert_eq!(command.execution_id, 12345);
        assert_eq!(command.catalog_id, 999);
        assert_eq!(command.step, "process");
    }

    #[test]
    fn test_queue_job_command_carries_catalog_id() {
        let job = QueueJob {
            queue_id: 1,
            execution_id: 12345,
            catalog_id: 42,
            command_event_id: 67890,
            step_name: "process".to_string(),
            action: serde_json::json!({
                "command_id": 67890,
                "execution_id": 12345,
                "step_name": "process",
                "tool": {"kind": "shell", "config": {"command": "echo hello"}},
            }),
            attempts: 0,
            max_attempts: 3,
        };

        let command = job.command().unwrap();
        assert_eq!(command.catalog_id, 42);
        assert_eq!(command.execution_id, 12345);
        assert_eq!(command.step, "process");
    }

    #[test]
    fn test_client_creation() {
        let client = ControlPlaneClient::new("http://localhost:8082");
        assert_eq!(client.server_url, "http://localhost:8082");

        let client = ControlPlaneClient::new("http://localhost:8082/");
        assert_eq!(client.server_url, "http://localhost:8082");
    }
}
