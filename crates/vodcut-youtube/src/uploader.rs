//! Resumable YouTube uploads.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::credentials::{CredentialStore, FileCredentialStore};
use crate::error::{parse_retry_after, truncate, UploadError, UploadResult};
use crate::metadata::{MetadataDefaults, UploadMetadata};
use crate::retry::{with_retry, RetryPolicy};
use crate::token::TokenManager;

const DEFAULT_UPLOAD_URL: &str = "https://www.googleapis.com/upload/youtube/v3/videos";
const VIDEO_CONTENT_TYPE: &str = "video/mp4";
const UPLOAD_TIMEOUT: Duration = Duration::from_secs(600);

/// Publishes a local video file and returns the platform's video id.
#[async_trait]
pub trait VideoUploader: Send + Sync {
    async fn upload(&self, path: &Path, metadata: &UploadMetadata) -> UploadResult<String>;
}

/// Uploader configuration.
#[derive(Debug, Clone)]
pub struct YouTubeConfig {
    pub client_secret_file: PathBuf,
    pub token_file: PathBuf,
    pub defaults: MetadataDefaults,
    pub max_retries: u32,
    pub upload_url: String,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            client_secret_file: PathBuf::from("./youtube_client_secret.json"),
            token_file: PathBuf::from("./youtube_token.json"),
            defaults: MetadataDefaults::default(),
            max_retries: 3,
            upload_url: DEFAULT_UPLOAD_URL.to_string(),
        }
    }
}

impl YouTubeConfig {
    /// Create config from environment variables.
    pub fn from_env() -> UploadResult<Self> {
        let defaults = Self::default();
        let var = |name: &str| {
            std::env::var(name)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let tags = match var("YT_DEFAULT_TAGS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.defaults.tags.clone(),
        };

        let max_retries = match var("YT_UPLOAD_MAX_RETRIES") {
            Some(v) => v.parse().map_err(|_| {
                UploadError::Config(format!("YT_UPLOAD_MAX_RETRIES is not a number: {}", v))
            })?,
            None => defaults.max_retries,
        };

        Ok(Self {
            client_secret_file: var("YT_CLIENT_SECRET_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.client_secret_file),
            token_file: var("YT_TOKEN_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.token_file),
            defaults: MetadataDefaults {
                title_prefix: var("YT_TITLE_PREFIX").unwrap_or(defaults.defaults.title_prefix),
                tags,
                category_id: var("YT_CATEGORY_ID").unwrap_or(defaults.defaults.category_id),
                privacy_status: var("YT_PRIVACY_STATUS")
                    .unwrap_or(defaults.defaults.privacy_status),
            },
            max_retries,
            upload_url: defaults.upload_url,
        })
    }
}

#[derive(Debug, Deserialize)]
struct VideoResource {
    id: Option<String>,
}

/// Result of one authenticated attempt.
enum Attempt {
    Uploaded(String),
    Unauthorized,
}

/// YouTube Data API v3 uploader.
pub struct YouTubeUploader {
    http: Client,
    tokens: TokenManager,
    upload_url: String,
    retry: RetryPolicy,
}

impl YouTubeUploader {
    pub fn new(config: &YouTubeConfig, store: Arc<dyn CredentialStore>) -> UploadResult<Self> {
        let http = Client::builder()
            .timeout(UPLOAD_TIMEOUT)
            .build()
            .map_err(|e| UploadError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            tokens: TokenManager::new(http.clone(), store),
            http,
            upload_url: config.upload_url.clone(),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                ..RetryPolicy::default()
            },
        })
    }

    /// Uploader backed by the credential file in `config`.
    pub fn from_config(config: &YouTubeConfig) -> UploadResult<Self> {
        Self::new(
            config,
            Arc::new(FileCredentialStore::new(config.token_file.clone())),
        )
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Check that a credential exists and yields an access token.
    pub async fn check_credentials(&self) -> UploadResult<()> {
        self.tokens.access_token().await.map(|_| ())
    }

    /// One upload, refreshing the token once on 401.
    async fn upload_authenticated(
        &self,
        metadata: &UploadMetadata,
        bytes: &[u8],
    ) -> UploadResult<String> {
        let mut token = self.tokens.access_token().await?;

        match self.send(&token, metadata, bytes).await? {
            Attempt::Uploaded(id) => return Ok(id),
            Attempt::Unauthorized => {
                warn!("Upload rejected with 401, refreshing token");
                token = self.tokens.force_refresh(&token).await?;
            }
        }

        match self.send(&token, metadata, bytes).await? {
            Attempt::Uploaded(id) => Ok(id),
            Attempt::Unauthorized => Err(UploadError::Auth(
                "upload rejected with 401 after token refresh".to_string(),
            )),
        }
    }

    /// Initiate a resumable session and send the bytes.
    async fn send(
        &self,
        token: &str,
        metadata: &UploadMetadata,
        bytes: &[u8],
    ) -> UploadResult<Attempt> {
        let response = self
            .http
            .post(&self.upload_url)
            .query(&[("uploadType", "resumable"), ("part", "snippet,status")])
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header("X-Upload-Content-Type", VIDEO_CONTENT_TYPE)
            .header("X-Upload-Content-Length", bytes.len().to_string())
            .json(&metadata.to_resource())
            .send()
            .await?;

        if response.status().as_u16() == 401 {
            return Ok(Attempt::Unauthorized);
        }
        let response = check_status(response).await?;

        let session_url = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| UploadError::transient("upload session response has no Location"))?;
        debug!("Resumable session opened");

        let response = self
            .http
            .put(&session_url)
            .header(AUTHORIZATION, format!("Bearer {}", token))
            .header(CONTENT_TYPE, VIDEO_CONTENT_TYPE)
            .body(bytes.to_vec())
            .send()
            .await?;

        if response.status().as_u16() == 401 {
            return Ok(Attempt::Unauthorized);
        }
        let response = check_status(response).await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        let video: VideoResource = serde_json::from_str(&body).map_err(|_| UploadError::Rejected {
            status,
            body: truncate(&body, 300),
        })?;
        match video.id.filter(|id| !id.is_empty()) {
            Some(id) => Ok(Attempt::Uploaded(id)),
            None => Err(UploadError::Rejected {
                status,
                body: truncate(&body, 300),
            }),
        }
    }
}

async fn check_status(response: Response) -> UploadResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    Err(UploadError::from_response(status.as_u16(), retry_after, &body))
}

#[async_trait]
impl VideoUploader for YouTubeUploader {
    async fn upload(&self, path: &Path, metadata: &UploadMetadata) -> UploadResult<String> {
        let bytes = tokio::fs::read(path).await?;
        info!(
            "Uploading {} ({} bytes) as \"{}\"",
            path.display(),
            bytes.len(),
            metadata.title
        );

        let video_id = with_retry(&self.retry, "youtube_upload", || {
            self.upload_authenticated(metadata, &bytes)
        })
        .await?;

        info!(video_id = %video_id, "Upload complete");
        Ok(video_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{AuthorizedUserCredential, MemoryCredentialStore};
    use chrono::Utc;
    use serde_json::json;
    use wiremock::matchers::{header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    #[serial_test::serial]
    fn test_config_from_env() {
        std::env::set_var("YT_DEFAULT_TAGS", "vods, , highlights");
        std::env::set_var("YT_PRIVACY_STATUS", "unlisted");
        std::env::remove_var("YT_UPLOAD_MAX_RETRIES");

        let config = YouTubeConfig::from_env().unwrap();
        assert_eq!(config.defaults.tags, vec!["vods", "highlights"]);
        assert_eq!(config.defaults.privacy_status, "unlisted");
        assert_eq!(config.defaults.category_id, "22");
        assert_eq!(config.max_retries, 3);

        std::env::set_var("YT_UPLOAD_MAX_RETRIES", "many");
        assert!(matches!(YouTubeConfig::from_env(), Err(UploadError::Config(_))));

        for key in ["YT_DEFAULT_TAGS", "YT_PRIVACY_STATUS", "YT_UPLOAD_MAX_RETRIES"] {
            std::env::remove_var(key);
        }
    }

    fn store(token_uri: &str) -> Arc<MemoryCredentialStore> {
        Arc::new(MemoryCredentialStore::new(Some(AuthorizedUserCredential {
            token: Some("old-token".to_string()),
            refresh_token: "refresh-1".to_string(),
            token_uri: token_uri.to_string(),
            client_id: "cid".to_string(),
            client_secret: "cs".to_string(),
            scopes: vec![],
            expiry: Some(Utc::now() + chrono::Duration::hours(1)),
            kind: "authorized_user".to_string(),
        })))
    }

    fn uploader(server: &MockServer, max_retries: u32) -> YouTubeUploader {
        let config = YouTubeConfig {
            upload_url: format!("{}/upload/youtube/v3/videos", server.uri()),
            max_retries,
            ..YouTubeConfig::default()
        };
        YouTubeUploader::new(&config, store(&format!("{}/token", server.uri())))
            .unwrap()
            .with_retry_policy(RetryPolicy::immediate(max_retries))
    }

    fn clip_file(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("01_clipA.mp4");
        std::fs::write(&path, b"mp4 bytes").unwrap();
        path
    }

    fn metadata() -> UploadMetadata {
        UploadMetadata {
            title: "Big play".into(),
            description: String::new(),
            tags: vec!["shorts".into()],
            category_id: "22".into(),
            privacy_status: "public".into(),
        }
    }

    async fn mount_session(server: &MockServer, token: &str, video_id: &str) {
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .and(query_param("uploadType", "resumable"))
            .and(header("authorization", format!("Bearer {}", token).as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Location", format!("{}/session/{}", server.uri(), token).as_str()),
            )
            .mount(server)
            .await;
        Mock::given(method("PUT"))
            .and(path(format!("/session/{}", token)))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": video_id})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_resumable_upload() {
        let server = MockServer::start().await;
        mount_session(&server, "old-token", "yt_1").await;

        let dir = tempfile::tempdir().unwrap();
        let id = uploader(&server, 3)
            .upload(&clip_file(&dir), &metadata())
            .await
            .unwrap();
        assert_eq!(id, "yt_1");
    }

    #[tokio::test]
    async fn test_401_refreshes_once() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .and(header("authorization", "Bearer old-token"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-token",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;
        mount_session(&server, "new-token", "yt_2").await;

        let dir = tempfile::tempdir().unwrap();
        let id = uploader(&server, 3)
            .upload(&clip_file(&dir), &metadata())
            .await
            .unwrap();
        assert_eq!(id, "yt_2");
    }

    #[tokio::test]
    async fn test_second_401_is_auth_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "new-token",
                "expires_in": 3600
            })))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = uploader(&server, 3)
            .upload(&clip_file(&dir), &metadata())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Auth(_)));
    }

    #[tokio::test]
    async fn test_quota_is_retried_then_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "error": {"code": 403, "errors": [{"reason": "quotaExceeded"}]}
            })))
            .expect(3)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = uploader(&server, 2)
            .upload(&clip_file(&dir), &metadata())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Quota { .. }));
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/upload/youtube/v3/videos"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid title"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = uploader(&server, 3)
            .upload(&clip_file(&dir), &metadata())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Rejected { status: 400, .. }));
    }
}
