//! Auth resolution API handlers.
//!
//! The single endpoint workers call during the "Prepare" phase (§4.5) to
//! turn a credential reference named in a step's `auth` config into the
//! concrete secret data, scoped and cached per execution by the keychain.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::services::AuthService;

/// Query parameters for resolving a credential.
#[derive(Debug, Deserialize)]
pub struct ResolveAuthQuery {
    /// Execution the resolved secret is scoped to.
    pub execution_id: i64,
}

/// Response for a credential resolution request.
#[derive(Debug, Serialize)]
pub struct ResolveAuthResponse {
    /// "found" or "not_found" -- never includes the secret data on a miss.
    pub status: String,

    /// Decrypted credential data, present only when `status == "found"`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

/// Resolve a credential reference to secret data.
///
/// `GET /api/auth/resolve/{catalog_id}/{credential_key}?execution_id=...`
///
/// Never logs or echoes back the credential key's resolved value outside of
/// this response body; callers must not persist the response into events.
pub async fn resolve(
    State(service): State<AuthService>,
    Path((catalog_id, credential_key)): Path<(i64, String)>,
    Query(query): Query<ResolveAuthQuery>,
) -> AppResult<Json<ResolveAuthResponse>> {
    let data = service
        .resolve(catalog_id, query.execution_id, &credential_key)
        .await?;

    Ok(Json(match data {
        Some(data) => ResolveAuthResponse {
            status: "found".to_string(),
            data: Some(data),
        },
        None => ResolveAuthResponse {
            status: "not_found".to_string(),
            data: None,
        },
    }))
}
