//! Credential-to-keychain resolution.
//!
//! Bridges the catalog's encrypted credential store and the execution-scoped
//! keychain cache: a worker asks for a credential by name, this service
//! checks the keychain first and only falls through to the (slower,
//! decrypt-on-every-call) credential store on a cache miss, caching the
//! result back into the keychain for subsequent lookups within the same
//! execution. §3's "Auth cache (keychain)" invariant (execution-scoped,
//! TTL <= 1 hour, never logged) lives here.

use chrono::Duration;

use crate::db::models::KeychainSetRequest;
use crate::error::{AppError, AppResult};
use crate::services::credential::CredentialService;
use crate::services::keychain::KeychainService;

/// TTL applied to a freshly-resolved keychain entry.
const RESOLVED_TTL_SECONDS: i64 = 3600;

/// Local scope: never shared across executions.
const SCOPE_LOCAL: &str = "local";

/// Resolves a credential reference to concrete secret data for one task,
/// caching the decrypted value per `(credential_key, execution_id)`.
#[derive(Clone)]
pub struct AuthService {
    credentials: CredentialService,
    keychain: KeychainService,
}

impl AuthService {
    pub fn new(credentials: CredentialService, keychain: KeychainService) -> Self {
        Self {
            credentials,
            keychain,
        }
    }

    /// Resolve `credential_key` for `execution_id`, returning `None` if no
    /// credential with that name exists. Never returns a `NotFound` error
    /// for a missing credential; that's a normal outcome a caller checks for.
    pub async fn resolve(
        &self,
        catalog_id: i64,
        execution_id: i64,
        credential_key: &str,
    ) -> AppResult<Option<serde_json::Value>> {
        let cached = self
            .keychain
            .get(catalog_id, credential_key, Some(execution_id), SCOPE_LOCAL)
            .await?;

        if cached.status == "found" {
            return Ok(cached.data);
        }

        let response = match self.credentials.get(credential_key, true).await {
            Ok(response) => response,
            Err(AppError::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        let data = match response.data {
            Some(data) => data,
            None => return Ok(None),
        };

        self.keychain
            .set(
                catalog_id,
                credential_key,
                KeychainSetRequest {
                    data: data.clone(),
                    scope_type: SCOPE_LOCAL.to_string(),
                    execution_id: Some(execution_id),
                    expires_at: None,
                    expires_in: Some(RESOLVED_TTL_SECONDS),
                    auto_renew: false,
                    renew_config: None,
                },
            )
            .await?;

        Ok(Some(data))
    }

    /// Drop every cached secret belonging to a finished execution.
    pub async fn cleanup_execution(&self, execution_id: i64) -> AppResult<u64> {
        self.keychain.cleanup_execution(execution_id).await
    }
}

impl std::fmt::Debug for AuthService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthService").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Resolution requires a live Postgres pool (credential + keychain
    // tables); exercised by the crate's integration tests against a real
    // database rather than here. Duration import kept for the TTL
    // conversion used by callers constructing `KeychainSetRequest` by hand.
    #[test]
    fn resolved_ttl_is_one_hour() {
        assert_eq!(Duration::seconds(RESOLVED_TTL_SECONDS), Duration::hours(1));
    }
}
