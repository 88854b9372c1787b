//! Event-claim queries.
//!
//! Backs an advisory, single-consumer lock over events: several broker
//! instances may observe the same trigger event concurrently, but only one
//! of them may win the claim and proceed to dispatch. First inserter wins.

use crate::db::DbPool;
use crate::error::AppResult;

/// Attempt to claim `event_id` for `worker_id`. Returns `true` if this call
/// won the claim, `false` if another broker instance already holds it.
pub async fn try_claim(pool: &DbPool, event_id: i64, worker_id: &str) -> AppResult<bool> {
    let row: Option<(i64,)> = sqlx::query_as(
        r#"
        INSERT INTO noetl.event_claim (event_id, worker_id, claimed_at)
        VALUES ($1, $2, now())
        ON CONFLICT (event_id) DO NOTHING
        RETURNING event_id
        "#,
    )
    .bind(event_id)
    .bind(worker_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.is_some())
}
