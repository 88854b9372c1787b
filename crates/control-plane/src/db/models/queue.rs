//! Queue job model backing the leased work queue.
//!
//! Unlike `noetl.event`, which is an append-only log, `noetl.queue` is a
//! mutable table: a row transitions `queued -> leased -> done`, with `retry`
//! and `dead` as the failure branches. Workers lease rows with
//! `FOR UPDATE SKIP LOCKED` so concurrent pollers never double-dispatch the
//! same job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle status of a queue row.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Available for lease.
    Queued,
    /// Leased by a worker; `lease_expires_at` bounds how long it stays leased.
    Leased,
    /// Terminal success.
    Done,
    /// Failed but eligible for another attempt once `available_at` passes.
    Retry,
    /// Terminal failure; attempts exhausted.
    Dead,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Leased => "leased",
            QueueStatus::Done => "done",
            QueueStatus::Retry => "retry",
            QueueStatus::Dead => "dead",
        };
        write!(f, "{}", s)
    }
}

impl From<&str> for QueueStatus {
    fn from(s: &str) -> Self {
        match s {
            "leased" => QueueStatus::Leased,
            "done" => QueueStatus::Done,
            "retry" => QueueStatus::Retry,
            "dead" => QueueStatus::Dead,
            _ => QueueStatus::Queued,
        }
    }
}

// CREATE TABLE noetl.queue (
//     queue_id        BIGINT PRIMARY KEY,
//     execution_id    BIGINT NOT NULL,
//     catalog_id      BIGINT NOT NULL,
//     command_event_id BIGINT NOT NULL,
//     step_name       TEXT NOT NULL,
//     action          JSONB NOT NULL,
//     retry_policy    JSONB NOT NULL DEFAULT '{}',
//     status          TEXT NOT NULL DEFAULT 'queued',
//     priority        INTEGER NOT NULL DEFAULT 0,
//     attempts        INTEGER NOT NULL DEFAULT 0,
//     max_attempts    INTEGER NOT NULL DEFAULT 1,
//     available_at    TIMESTAMPTZ NOT NULL DEFAULT now(),
//     lease_expires_at TIMESTAMPTZ,
//     worker_id       TEXT,
//     last_error      TEXT,
//     created_at      TIMESTAMPTZ NOT NULL DEFAULT now(),
//     updated_at      TIMESTAMPTZ NOT NULL DEFAULT now()
// );
/// A unit of work leased and executed by a worker.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct QueueJob {
    /// Snowflake ID, also used as the worker-visible command id.
    pub queue_id: i64,
    /// Execution this job belongs to.
    pub execution_id: i64,
    /// Catalog entry for the owning playbook.
    pub catalog_id: i64,
    /// The `command.issued` event this job was enqueued from.
    pub command_event_id: i64,
    /// Step name, for diagnostics and filtering.
    pub step_name: String,
    /// Full command payload (tool kind, config, context, iterator metadata).
    pub action: serde_json::Value,
    /// Serialized `RetryPolicy` used to compute backoff on failure.
    pub retry_policy: serde_json::Value,
    /// Current lifecycle status.
    pub status: String,
    /// Higher priority leases first.
    pub priority: i32,
    /// Number of lease attempts made so far.
    pub attempts: i32,
    /// Attempts allowed before the job goes `dead`.
    pub max_attempts: i32,
    /// Earliest time this job may be leased (used for retry backoff).
    pub available_at: DateTime<Utc>,
    /// When the current lease expires; a sweeper reclaims rows past this.
    pub lease_expires_at: Option<DateTime<Utc>>,
    /// Worker id holding the current lease, if any.
    pub worker_id: Option<String>,
    /// Last failure message, if any.
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_status_round_trip() {
        for status in [
            QueueStatus::Queued,
            QueueStatus::Leased,
            QueueStatus::Done,
            QueueStatus::Retry,
            QueueStatus::Dead,
        ] {
            let s = status.to_string();
            assert_eq!(QueueStatus::from(s.as_str()), status);
        }
    }

    #[test]
    fn test_unknown_status_defaults_to_queued() {
        assert_eq!(QueueStatus::from("bogus"), QueueStatus::Queued);
    }
}
