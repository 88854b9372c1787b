//! Queue leasing API.
//!
//! Workers poll these endpoints instead of racing each other over
//! `command.issued` events: `lease` atomically claims jobs with
//! `FOR UPDATE SKIP LOCKED`, `renew` extends a lease while a tool is still
//! running, and `complete`/`fail` close it out.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::db::models::QueueJob;
use crate::error::AppError;
use crate::services::queue::QueueService;

/// Request to lease jobs.
#[derive(Debug, Clone, Deserialize)]
pub struct LeaseRequest {
    pub worker_id: String,
    #[serde(default = "default_lease_limit")]
    pub limit: i64,
}

fn default_lease_limit() -> i64 {
    1
}

/// Response for a lease request.
#[derive(Debug, Clone, Serialize)]
pub struct LeaseResponse {
    pub jobs: Vec<QueueJob>,
}

/// Request to renew a lease.
#[derive(Debug, Clone, Deserialize)]
pub struct RenewRequest {
    pub worker_id: String,
}

/// Request to complete a job.
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteRequest {
    pub worker_id: String,
}

/// Request to fail a job.
#[derive(Debug, Clone, Deserialize)]
pub struct FailRequest {
    pub worker_id: String,
    pub error: String,
    /// Whether this failure is eligible for a retry. Defaults to `true` so
    /// older workers that don't send it keep today's retry-until-exhausted
    /// behavior; workers that classify the error (e.g. a non-retryable
    /// `ValidationError`) should set this explicitly.
    #[serde(default = "default_retryable")]
    pub retryable: bool,
}

fn default_retryable() -> bool {
    true
}

/// Generic acknowledgement response.
#[derive(Debug, Clone, Serialize)]
pub struct AckResponse {
    pub ok: bool,
}

/// Lease available jobs.
///
/// POST /api/queue/lease
pub async fn lease(
    State(service): State<QueueService>,
    Json(request): Json<LeaseRequest>,
) -> Result<Json<LeaseResponse>, AppError> {
    let limit = request.limit.clamp(1, 64);
    let jobs = service.lease(&request.worker_id, limit).await?;
    Ok(Json(LeaseResponse { jobs }))
}

/// Renew a held lease.
///
/// POST /api/queue/:id/renew
pub async fn renew(
    State(service): State<QueueService>,
    Path(queue_id): Path<i64>,
    Json(request): Json<RenewRequest>,
) -> Result<Json<AckResponse>, AppError> {
    let ok = service.renew(queue_id, &request.worker_id).await?;
    if !ok {
        return Err(AppError::Conflict(format!(
            "No active lease for queue_id={} held by {}",
            queue_id, request.worker_id
        )));
    }
    Ok(Json(AckResponse { ok }))
}

/// Mark a job done.
///
/// POST /api/queue/:id/complete
pub async fn complete(
    State(service): State<QueueService>,
    Path(queue_id): Path<i64>,
    Json(request): Json<CompleteRequest>,
) -> Result<Json<AckResponse>, AppError> {
    let ok = service.complete(queue_id, &request.worker_id).await?;
    if !ok {
        return Err(AppError::Conflict(format!(
            "No active lease for queue_id={} held by {}",
            queue_id, request.worker_id
        )));
    }
    Ok(Json(AckResponse { ok }))
}

/// Record a failed attempt; the service computes retry backoff or dead-letters the job.
///
/// POST /api/queue/:id/fail
pub async fn fail(
    State(service): State<QueueService>,
    Path(queue_id): Path<i64>,
    Json(request): Json<FailRequest>,
) -> Result<Json<crate::services::queue::FailOutcome>, AppError> {
    let outcome = service
        .fail(queue_id, &request.worker_id, &request.error, request.retryable)
        .await?
        .ok_or_else(|| {
            AppError::Conflict(format!(
                "No active lease for queue_id={} held by {}",
                queue_id, request.worker_id
            ))
        })?;
    Ok(Json(outcome))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_request_default_limit() {
        let request: LeaseRequest =
            serde_json::from_str(r#"{"worker_id": "w-1"}"#).unwrap();
        assert_eq!(request.limit, 1);
    }
}
