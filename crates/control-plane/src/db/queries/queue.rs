//! Queries for the leased work queue (`noetl.queue`).

use chrono::{DateTime, Utc};

use crate::db::models::QueueJob;
use crate::db::DbPool;
use crate::error::AppResult;

/// Insert a new queued job.
#[allow(clippy::too_many_arguments)]
pub async fn enqueue(
    pool: &DbPool,
    queue_id: i64,
    execution_id: i64,
    catalog_id: i64,
    command_event_id: i64,
    step_name: &str,
    action: &serde_json::Value,
    retry_policy: &serde_json::Value,
    priority: i32,
    max_attempts: i32,
    available_at: DateTime<Utc>,
) -> AppResult<()> {
    sqlx::query(
        r#"
        INSERT INTO noetl.queue (
            queue_id, execution_id, catalog_id, command_event_id, step_name,
            action, retry_policy, status, priority, attempts, max_attempts,
            available_at, created_at, updated_at
        ) VALUES (
            $1, $2, $3, $4, $5, $6, $7, 'queued', $8, 0, $9, $10, now(), now()
        )
        "#,
    )
    .bind(queue_id)
    .bind(execution_id)
    .bind(catalog_id)
    .bind(command_event_id)
    .bind(step_name)
    .bind(action)
    .bind(retry_policy)
    .bind(priority)
    .bind(max_attempts)
    .bind(available_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Lease up to `limit` available jobs for `worker_id`, locking rows with
/// `FOR UPDATE SKIP LOCKED` so concurrent pollers never grab the same job.
///
/// Ordered by priority (descending) then queue_id (ascending, FIFO within a
/// priority band).
pub async fn lease(
    pool: &DbPool,
    worker_id: &str,
    limit: i64,
    lease_duration_secs: i64,
) -> AppResult<Vec<QueueJob>> {
    let mut tx = pool.begin().await?;

    let candidates: Vec<(i64,)> = sqlx::query_as(
        r#"
        SELECT queue_id FROM noetl.queue
        WHERE status IN ('queued', 'retry')
          AND available_at <= now()
        ORDER BY priority DESC, queue_id ASC
        LIMIT $1
        FOR UPDATE SKIP LOCKED
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *tx)
    .await?;

    if candidates.is_empty() {
        tx.commit().await?;
        return Ok(vec![]);
    }

    let ids: Vec<i64> = candidates.into_iter().map(|(id,)| id).collect();

    let jobs: Vec<QueueJob> = sqlx::query_as(
        r#"
        UPDATE noetl.queue
        SET status = 'leased',
            worker_id = $1,
            attempts = attempts + 1,
            lease_expires_at = now() + make_interval(secs => $2),
            updated_at = now()
        WHERE queue_id = ANY($3)
        RETURNING queue_id, execution_id, catalog_id, command_event_id, step_name,
                  action, retry_policy, status, priority, attempts, max_attempts, available_at,
                  lease_expires_at, worker_id, last_error, created_at, updated_at
        "#,
    )
    .bind(worker_id)
    .bind(lease_duration_secs as f64)
    .bind(&ids)
    .fetch_all(&mut *tx)
    .await?;

    tx.commit().await?;

    Ok(jobs)
}

/// Extend the lease on a job the worker is still actively processing.
pub async fn renew(
    pool: &DbPool,
    queue_id: i64,
    worker_id: &str,
    lease_duration_secs: i64,
) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE noetl.queue
        SET lease_expires_at = now() + make_interval(secs => $1),
            updated_at = now()
        WHERE queue_id = $2 AND worker_id = $3 AND status = 'leased'
        "#,
    )
    .bind(lease_duration_secs as f64)
    .bind(queue_id)
    .bind(worker_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Mark a job done. Only succeeds if the caller still holds the lease.
pub async fn complete(pool: &DbPool, queue_id: i64, worker_id: &str) -> AppResult<bool> {
    let result = sqlx::query(
        r#"
        UPDATE noetl.queue
        SET status = 'done', updated_at = now()
        WHERE queue_id = $1 AND worker_id = $2 AND status = 'leased'
        "#,
    )
    .bind(queue_id)
    .bind(worker_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Record a failed attempt. Transitions to `retry` with `next_available_at`
/// backoff if attempts remain, otherwise to `dead`.
pub async fn fail(
    pool: &DbPool,
    queue_id: i64,
    worker_id: &str,
    error: &str,
    next_available_at: Option<DateTime<Utc>>,
) -> AppResult<bool> {
    let status = if next_available_at.is_some() {
        "retry"
    } else {
        "dead"
    };

    let result = sqlx::query(
        r#"
        UPDATE noetl.queue
        SET status = $1,
            last_error = $2,
            available_at = COALESCE($3, available_at),
            worker_id = NULL,
            lease_expires_at = NULL,
            updated_at = now()
        WHERE queue_id = $4 AND worker_id = $5 AND status = 'leased'
        "#,
    )
    .bind(status)
    .bind(error)
    .bind(next_available_at)
    .bind(queue_id)
    .bind(worker_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}

/// Reclaim jobs whose lease has expired without a complete/fail call,
/// returning them to `queued` so another worker can pick them up.
pub async fn sweep_expired_leases(pool: &DbPool) -> AppResult<u64> {
    let result = sqlx::query(
        r#"
        UPDATE noetl.queue
        SET status = 'queued', worker_id = NULL, lease_expires_at = NULL, updated_at = now()
        WHERE status = 'leased' AND lease_expires_at < now()
        "#,
    )
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Fetch a single job by id.
pub async fn get_by_id(pool: &DbPool, queue_id: i64) -> AppResult<Option<QueueJob>> {
    let job = sqlx::query_as(
        r#"
        SELECT queue_id, execution_id, catalog_id, command_event_id, step_name,
               action, retry_policy, status, priority, attempts, max_attempts, available_at,
               lease_expires_at, worker_id, last_error, created_at, updated_at
        FROM noetl.queue
        WHERE queue_id = $1
        "#,
    )
    .bind(queue_id)
    .fetch_optional(pool)
    .await?;

    Ok(job)
}

/// List all queue rows for an execution (diagnostics / tests).
pub async fn list_for_execution(pool: &DbPool, execution_id: i64) -> AppResult<Vec<QueueJob>> {
    let jobs = sqlx::query_as(
        r#"
        SELECT queue_id, execution_id, catalog_id, command_event_id, step_name,
               action, retry_policy, status, priority, attempts, max_attempts, available_at,
               lease_expires_at, worker_id, last_error, created_at, updated_at
        FROM noetl.queue
        WHERE execution_id = $1
        ORDER BY queue_id ASC
        "#,
    )
    .bind(execution_id)
    .fetch_all(pool)
    .await?;

    Ok(jobs)
}
