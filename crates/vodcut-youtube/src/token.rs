//! Access token management.
//!
//! Provides a thread-safe, async-aware token holder with:
//! - Refresh margin to avoid token expiry during uploads
//! - Single-flight refresh under a write lock
//! - Durable persistence of every refreshed token

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::credentials::{AuthorizedUserCredential, CredentialStore};
use crate::error::{truncate, UploadError, UploadResult};

/// Refresh margin: refresh the token 60 seconds before expiry.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Assumed lifetime when the token endpoint omits `expires_in`.
const TOKEN_DEFAULT_TTL_SECS: i64 = 3600;

const REFRESH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Hands out valid access tokens, refreshing through the credential's
/// `token_uri` when needed.
pub struct TokenManager {
    http: Client,
    store: Arc<dyn CredentialStore>,
    state: RwLock<Option<AuthorizedUserCredential>>,
}

impl TokenManager {
    pub fn new(http: Client, store: Arc<dyn CredentialStore>) -> Self {
        Self {
            http,
            store,
            state: RwLock::new(None),
        }
    }

    fn margin() -> chrono::Duration {
        chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS)
    }

    /// Get a valid access token, refreshing if necessary.
    pub async fn access_token(&self) -> UploadResult<String> {
        // Fast path: cached and valid
        {
            let state = self.state.read().await;
            if let Some(token) = state.as_ref().and_then(|c| c.valid_token(Self::margin())) {
                return Ok(token.to_string());
            }
        }

        // Slow path: one task loads/refreshes, others wait on the lock
        let mut state = self.state.write().await;
        if state.is_none() {
            *state = self.store.load().await?;
        }

        let credential = state.as_mut().ok_or_else(|| {
            UploadError::MissingCredential("no stored YouTube credential".to_string())
        })?;
        if let Some(token) = credential.valid_token(Self::margin()) {
            return Ok(token.to_string());
        }

        self.refresh(credential).await
    }

    /// Refresh after the API rejected `stale_token`.
    ///
    /// If another task already replaced the token, the new one is returned
    /// without another round-trip.
    pub async fn force_refresh(&self, stale_token: &str) -> UploadResult<String> {
        let mut state = self.state.write().await;
        if state.is_none() {
            *state = self.store.load().await?;
        }
        let credential = state.as_mut().ok_or_else(|| {
            UploadError::MissingCredential("no stored YouTube credential".to_string())
        })?;

        if let Some(current) = credential.token.as_deref() {
            if current != stale_token && credential.valid_token(Self::margin()).is_some() {
                return Ok(current.to_string());
            }
        }
        self.refresh(credential).await
    }

    async fn refresh(&self, credential: &mut AuthorizedUserCredential) -> UploadResult<String> {
        if credential.refresh_token.is_empty() {
            return Err(UploadError::MissingCredential(
                "stored credential has no refresh token".to_string(),
            ));
        }

        debug!("Refreshing YouTube access token");
        let params = [
            ("client_id", credential.client_id.as_str()),
            ("client_secret", credential.client_secret.as_str()),
            ("refresh_token", credential.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http
            .post(&credential.token_uri)
            .timeout(REFRESH_TIMEOUT)
            .form(&params)
            .send()
            .await
            .map_err(|e| UploadError::transient(format!("token refresh failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_refresh_failure(status.as_u16(), &body));
        }

        let refreshed: RefreshResponse = response
            .json()
            .await
            .map_err(|e| UploadError::transient(format!("bad token response: {}", e)))?;

        let ttl = refreshed.expires_in.unwrap_or(TOKEN_DEFAULT_TTL_SECS);
        credential.token = Some(refreshed.access_token.clone());
        credential.expiry = Some(Utc::now() + chrono::Duration::seconds(ttl));
        if let Some(rotated) = refreshed.refresh_token {
            credential.refresh_token = rotated;
        }
        if let Some(scope) = refreshed.scope {
            credential.scopes = scope.split_whitespace().map(str::to_string).collect();
        }

        if let Err(e) = self.store.save(credential).await {
            // The new token is still usable for this process.
            warn!("Failed to persist refreshed credential: {}", e);
        }

        info!("Refreshed YouTube access token, valid for {}s", ttl);
        Ok(refreshed.access_token)
    }
}

fn classify_refresh_failure(status: u16, body: &str) -> UploadError {
    let oauth_error = serde_json::from_str::<OAuthErrorResponse>(body).ok();
    match (status, oauth_error) {
        (s, _) if s >= 500 => UploadError::transient(format!("token endpoint returned {}", s)),
        (_, Some(err)) => UploadError::Auth(format!(
            "token refresh rejected: {} {}",
            err.error,
            err.error_description.unwrap_or_default()
        )),
        (s, None) => UploadError::Auth(format!(
            "token refresh rejected ({}): {}",
            s,
            truncate(body, 200)
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::MemoryCredentialStore;
    use serde_json::json;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credential(token_uri: &str, expires_in_secs: i64) -> AuthorizedUserCredential {
        AuthorizedUserCredential {
            token: Some("old-token".to_string()),
            refresh_token: "refresh-1".to_string(),
            token_uri: token_uri.to_string(),
            client_id: "cid".to_string(),
            client_secret: "cs".to_string(),
            scopes: vec![],
            expiry: Some(Utc::now() + chrono::Duration::seconds(expires_in_secs)),
            kind: "authorized_user".to_string(),
        }
    }

    #[tokio::test]
    async fn test_valid_token_needs_no_refresh() {
        let store = Arc::new(MemoryCredentialStore::new(Some(credential("http://unused", 3600))));
        let manager = TokenManager::new(Client::new(), store);
        assert_eq!(manager.access_token().await.unwrap(), "old-token");
    }

    #[tokio::test]
    async fn test_expiring_token_is_refreshed_and_persisted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=refresh-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-token",
                "expires_in": 3599,
                "token_type": "Bearer"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::new(Some(credential(
            &format!("{}/token", server.uri()),
            30,
        ))));
        let manager = TokenManager::new(Client::new(), store.clone());

        assert_eq!(manager.access_token().await.unwrap(), "new-token");
        // Cached afterwards
        assert_eq!(manager.access_token().await.unwrap(), "new-token");

        let saved = store.current().await.unwrap();
        assert_eq!(saved.token.as_deref(), Some("new-token"));
        assert!(saved.expiry.unwrap() > Utc::now() + chrono::Duration::seconds(3000));
    }

    #[tokio::test]
    async fn test_invalid_grant_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "error": "invalid_grant",
                "error_description": "Token has been expired or revoked."
            })))
            .mount(&server)
            .await;

        let store = Arc::new(MemoryCredentialStore::new(Some(credential(&server.uri(), -10))));
        let manager = TokenManager::new(Client::new(), store);

        let err = manager.access_token().await.unwrap_err();
        assert!(err.is_auth_failure());
        assert!(err.to_string().contains("invalid_grant"));
    }

    #[tokio::test]
    async fn test_missing_credential() {
        let manager = TokenManager::new(Client::new(), Arc::new(MemoryCredentialStore::default()));
        let err = manager.access_token().await.unwrap_err();
        assert!(matches!(err, UploadError::MissingCredential(_)));
    }

    #[tokio::test]
    async fn test_force_refresh_skips_when_already_rotated() {
        let store = Arc::new(MemoryCredentialStore::new(Some(credential("http://unused", 3600))));
        let manager = TokenManager::new(Client::new(), store);
        manager.access_token().await.unwrap();

        // Someone else already holds a newer token than the one that was rejected
        let token = manager.force_refresh("older-token").await.unwrap();
        assert_eq!(token, "old-token");
    }
}
