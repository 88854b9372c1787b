//! Queue service: leasing, renewal, completion, and failure of queued jobs.
//!
//! This is the concurrency-safe handoff point between the control plane and
//! the worker pool. The broker enqueues `Command`s here instead of relying on
//! workers to race each other over `command.issued` events.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::db::models::QueueJob;
use crate::db::queries::queue as queries;
use crate::db::DbPool;
use crate::engine::commands::Command;
use crate::engine::retry::RetryPolicy;
use crate::error::AppResult;

/// Default lease duration granted to a worker, renewed while it keeps
/// polling `renew`.
pub const DEFAULT_LEASE_SECS: i64 = 60;

/// Outcome of a `fail` call: whether the job will be retried or is dead.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailOutcome {
    pub queue_id: i64,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt: Option<i32>,
}

/// Service wrapping the `noetl.queue` table.
#[derive(Clone)]
pub struct QueueService {
    pool: DbPool,
}

impl QueueService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Enqueue a broker-produced command as a leasable job. `policy` is
    /// stored alongside the job so `fail` can compute backoff without a
    /// round trip through the catalog/playbook.
    pub async fn enqueue_command(
        &self,
        queue_id: i64,
        command_event_id: i64,
        command: &Command,
        policy: &RetryPolicy,
        priority: i32,
    ) -> AppResult<()> {
        let action = serde_json::to_value(command)?;
        let retry_policy = serde_json::to_value(policy)?;

        queries::enqueue(
            &self.pool,
            queue_id,
            command.execution_id,
            command.catalog_id,
            command_event_id,
            &command.step_name,
            &action,
            &retry_policy,
            priority,
            policy.max_attempts,
            Utc::now(),
        )
        .await
    }

    /// Lease up to `limit` jobs for `worker_id`.
    pub async fn lease(&self, worker_id: &str, limit: i64) -> AppResult<Vec<QueueJob>> {
        queries::lease(&self.pool, worker_id, limit, DEFAULT_LEASE_SECS).await
    }

    /// Extend the lease on a job still being processed.
    pub async fn renew(&self, queue_id: i64, worker_id: &str) -> AppResult<bool> {
        queries::renew(&self.pool, queue_id, worker_id, DEFAULT_LEASE_SECS).await
    }

    /// Mark a job done.
    pub async fn complete(&self, queue_id: i64, worker_id: &str) -> AppResult<bool> {
        queries::complete(&self.pool, queue_id, worker_id).await
    }

    /// Record a failed attempt, computing backoff from the job's stored
    /// retry policy and its recorded attempt count. Transitions to `retry`
    /// if attempts remain and the failure is retryable, `dead` otherwise.
    /// `retryable = false` dead-letters immediately regardless of remaining
    /// attempt budget (e.g. `ValidationError`, a non-retryable
    /// `ResolutionError`).
    pub async fn fail(
        &self,
        queue_id: i64,
        worker_id: &str,
        error: &str,
        retryable: bool,
    ) -> AppResult<Option<FailOutcome>> {
        let job = match queries::get_by_id(&self.pool, queue_id).await? {
            Some(j) => j,
            None => return Ok(None),
        };

        let policy: RetryPolicy =
            serde_json::from_value(job.retry_policy.clone()).unwrap_or_default();

        let next_attempt = job.attempts + 1;
        let (status, next_available_at) = if retryable && next_attempt <= job.max_attempts {
            let delay = policy.backoff_delay(job.attempts);
            let when = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            ("retry", Some(when))
        } else {
            ("dead", None)
        };

        let applied =
            queries::fail(&self.pool, queue_id, worker_id, error, next_available_at).await?;

        if !applied {
            return Ok(None);
        }

        Ok(Some(FailOutcome {
            queue_id,
            status: status.to_string(),
            next_attempt: if status == "retry" {
                Some(next_attempt)
            } else {
                None
            },
        }))
    }

    /// Reclaim leases that expired without a complete/fail call.
    pub async fn sweep_expired_leases(&self) -> AppResult<u64> {
        queries::sweep_expired_leases(&self.pool).await
    }

    /// Fetch a job (diagnostics/tests).
    pub async fn get(&self, queue_id: i64) -> AppResult<Option<QueueJob>> {
        queries::get_by_id(&self.pool, queue_id).await
    }

    /// List all jobs for an execution (diagnostics/tests).
    pub async fn list_for_execution(&self, execution_id: i64) -> AppResult<Vec<QueueJob>> {
        queries::list_for_execution(&self.pool, execution_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_outcome_serialization() {
        let outcome = FailOutcome {
            queue_id: 1,
            status: "retry".to_string(),
            next_attempt: Some(2),
        };
        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("retry"));
        assert!(json.contains("\"next_attempt\":2"));
    }
}
