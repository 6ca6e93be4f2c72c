//! OAuth2 device authorization grant (RFC 8628).
//!
//! Used once, interactively, to mint the refreshable credential the
//! uploader runs on. No browser is needed on the host.

use std::time::{Duration, Instant};

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::credentials::{AuthorizedUserCredential, ClientSecrets};
use crate::error::{truncate, UploadError, UploadResult};

const GOOGLE_DEVICE_AUTH_URL: &str = "https://oauth2.googleapis.com/device/code";

/// Google's device flow does not offer `youtube.upload`; the broader
/// YouTube scope covers uploads.
pub const DEVICE_FLOW_SCOPE: &str = "https://www.googleapis.com/auth/youtube";

const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Floor on the code lifetime so a tiny `expires_in` still gets one poll.
const MIN_POLL_TTL_SECS: u64 = 5;

/// Response from the device authorization request.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    /// Code the user types at `verification_uri`.
    pub user_code: String,
    #[serde(alias = "verification_url")]
    pub verification_uri: String,
    #[serde(default)]
    pub verification_uri_complete: Option<String>,
    pub expires_in: u64,
    #[serde(default = "default_interval")]
    pub interval: u64,
}

fn default_interval() -> u64 {
    5
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Device flow against Google's OAuth endpoints.
pub struct DeviceFlow {
    client: Client,
    device_auth_url: String,
    token_url: String,
    scope: String,
    min_interval: Duration,
    slow_down_step: Duration,
}

impl DeviceFlow {
    pub fn new(secrets: &ClientSecrets) -> UploadResult<Self> {
        Self::with_urls(GOOGLE_DEVICE_AUTH_URL.to_string(), secrets.token_uri.clone())
    }

    pub fn with_urls(device_auth_url: String, token_url: String) -> UploadResult<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| UploadError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            device_auth_url,
            token_url,
            scope: DEVICE_FLOW_SCOPE.to_string(),
            min_interval: Duration::from_secs(1),
            slow_down_step: Duration::from_secs(5),
        })
    }

    /// Override polling floor and `slow_down` increment.
    pub fn with_poll_timing(mut self, min_interval: Duration, slow_down_step: Duration) -> Self {
        self.min_interval = min_interval;
        self.slow_down_step = slow_down_step;
        self
    }

    /// Step 1: request a device and user code.
    pub async fn request_device_code(&self, client_id: &str) -> UploadResult<DeviceCodeResponse> {
        info!("Requesting device code for scope {}", self.scope);

        let params = [("client_id", client_id), ("scope", self.scope.as_str())];
        let response = self
            .client
            .post(&self.device_auth_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| UploadError::transient(format!("device code request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Auth(format!(
                "device code request rejected ({}): {}",
                status,
                truncate(&body, 200)
            )));
        }

        let code: DeviceCodeResponse = response
            .json()
            .await
            .map_err(|e| UploadError::Auth(format!("bad device code response: {}", e)))?;
        Ok(code)
    }

    /// Step 2: poll until the user approves, denies, or the code expires.
    pub async fn poll_for_token(
        &self,
        code: &DeviceCodeResponse,
        secrets: &ClientSecrets,
    ) -> UploadResult<AuthorizedUserCredential> {
        let ttl_secs = code.expires_in.max(MIN_POLL_TTL_SECS);
        let deadline = Instant::now() + Duration::from_secs(ttl_secs);
        let mut interval = Duration::from_secs(code.interval).max(self.min_interval);

        info!("Waiting for authorization (expires in {}s)", ttl_secs);

        loop {
            if Instant::now() > deadline {
                return Err(UploadError::Auth(
                    "device code expired before authorization".to_string(),
                ));
            }

            tokio::time::sleep(interval).await;

            let params = [
                ("client_id", secrets.client_id.as_str()),
                ("client_secret", secrets.client_secret.as_str()),
                ("device_code", code.device_code.as_str()),
                ("grant_type", DEVICE_CODE_GRANT_TYPE),
            ];
            let response = self
                .client
                .post(&self.token_url)
                .form(&params)
                .send()
                .await
                .map_err(|e| UploadError::transient(format!("token poll failed: {}", e)))?;

            if response.status().is_success() {
                let token: TokenResponse = response
                    .json()
                    .await
                    .map_err(|e| UploadError::Auth(format!("bad token response: {}", e)))?;
                info!("Authorization granted");
                return into_credential(token, secrets, &self.scope);
            }

            let body = response.text().await.unwrap_or_default();
            let error: TokenErrorResponse = serde_json::from_str(&body).map_err(|_| {
                UploadError::Auth(format!("unexpected token poll response: {}", truncate(&body, 200)))
            })?;

            match error.error.as_str() {
                "authorization_pending" => debug!("Authorization pending"),
                "slow_down" => {
                    interval = (interval + self.slow_down_step).min(MAX_POLL_INTERVAL);
                    warn!("Token endpoint asked to slow down, interval now {:?}", interval);
                }
                "expired_token" => {
                    return Err(UploadError::Auth(
                        "device code expired before authorization".to_string(),
                    ))
                }
                "access_denied" => {
                    return Err(UploadError::Auth(
                        "user denied the authorization request".to_string(),
                    ))
                }
                other => {
                    return Err(UploadError::Auth(format!(
                        "token poll error: {} {}",
                        other,
                        error.error_description.unwrap_or_default()
                    )))
                }
            }
        }
    }

    /// Run the whole flow. `prompt` shows the user what to do.
    pub async fn authorize<F>(
        &self,
        secrets: &ClientSecrets,
        prompt: F,
    ) -> UploadResult<AuthorizedUserCredential>
    where
        F: FnOnce(&DeviceCodeResponse),
    {
        let code = self.request_device_code(&secrets.client_id).await?;
        prompt(&code);
        self.poll_for_token(&code, secrets).await
    }
}

fn into_credential(
    token: TokenResponse,
    secrets: &ClientSecrets,
    requested_scope: &str,
) -> UploadResult<AuthorizedUserCredential> {
    let refresh_token = token.refresh_token.filter(|t| !t.is_empty()).ok_or_else(|| {
        UploadError::MissingCredential("authorization returned no refresh token".to_string())
    })?;

    let scope = token.scope.unwrap_or_else(|| requested_scope.to_string());
    Ok(AuthorizedUserCredential {
        token: Some(token.access_token),
        refresh_token,
        token_uri: secrets.token_uri.clone(),
        client_id: secrets.client_id.clone(),
        client_secret: secrets.client_secret.clone(),
        scopes: scope.split_whitespace().map(str::to_string).collect(),
        expiry: Some(Utc::now() + chrono::Duration::seconds(token.expires_in.unwrap_or(3600))),
        kind: "authorized_user".to_string(),
    })
}
