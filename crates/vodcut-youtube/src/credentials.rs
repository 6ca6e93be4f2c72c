//! OAuth credential storage.
//!
//! The credential file uses Google's "authorized user" layout so that tokens
//! minted by other Google tooling can be dropped in as-is.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{UploadError, UploadResult};
use crate::GOOGLE_TOKEN_URI;

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

fn default_type() -> String {
    "authorized_user".to_string()
}

/// A refreshable user credential.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthorizedUserCredential {
    /// Current access token
    #[serde(default)]
    pub token: Option<String>,
    pub refresh_token: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Access token expiry (UTC)
    #[serde(default)]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(rename = "type", default = "default_type")]
    pub kind: String,
}

impl std::fmt::Debug for AuthorizedUserCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizedUserCredential")
            .field("token_uri", &self.token_uri)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .field("expiry", &self.expiry)
            .finish_non_exhaustive()
    }
}

impl AuthorizedUserCredential {
    /// Access token if it stays valid for at least `margin`.
    pub fn valid_token(&self, margin: chrono::Duration) -> Option<&str> {
        let token = self.token.as_deref().filter(|t| !t.is_empty())?;
        match self.expiry {
            Some(expiry) if expiry - margin > Utc::now() => Some(token),
            _ => None,
        }
    }
}

/// OAuth client secrets as downloaded from the Google console.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientSecrets {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<ClientSecrets>,
    web: Option<ClientSecrets>,
}

impl ClientSecrets {
    /// Load an `{"installed": {...}}` or `{"web": {...}}` secrets file.
    pub async fn load(path: &Path) -> UploadResult<Self> {
        let raw = tokio::fs::read(path).await.map_err(|e| {
            UploadError::Config(format!("cannot read client secrets {}: {}", path.display(), e))
        })?;
        let file: ClientSecretsFile = serde_json::from_slice(&raw)?;
        file.installed.or(file.web).ok_or_else(|| {
            UploadError::Config(format!(
                "{} has neither an 'installed' nor a 'web' section",
                path.display()
            ))
        })
    }
}

/// Where the credential lives between runs.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> UploadResult<Option<AuthorizedUserCredential>>;
    async fn save(&self, credential: &AuthorizedUserCredential) -> UploadResult<()>;
}

/// JSON file store with atomic replacement.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> UploadResult<Option<AuthorizedUserCredential>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let credential = serde_json::from_slice(&raw).map_err(|e| {
            UploadError::MissingCredential(format!(
                "{} is not a valid credential file: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(credential))
    }

    async fn save(&self, credential: &AuthorizedUserCredential) -> UploadResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let bytes = serde_json::to_vec_pretty(credential)?;
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let mut file = tokio::fs::File::create(&tmp).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!("Saved credential to {}", self.path.display());
        Ok(())
    }
}

/// In-memory store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Option<AuthorizedUserCredential>>,
}

impl MemoryCredentialStore {
    pub fn new(credential: Option<AuthorizedUserCredential>) -> Self {
        Self {
            inner: Mutex::new(credential),
        }
    }

    pub async fn current(&self) -> Option<AuthorizedUserCredential> {
        self.inner.lock().await.clone()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self) -> UploadResult<Option<AuthorizedUserCredential>> {
        Ok(self.inner.lock().await.clone())
    }

    async fn save(&self, credential: &AuthorizedUserCredential) -> UploadResult<()> {
        *self.inner.lock().await = Some(credential.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOGLE_AUTH_JSON: &str = r#"{
        "token": "ya29.a0Af",
        "refresh_token": "1//0g",
        "token_uri": "https://oauth2.googleapis.com/token",
        "client_id": "123.apps.googleusercontent.com",
        "client_secret": "GOCSPX-x",
        "scopes": ["https://www.googleapis.com/auth/youtube.upload"],
        "universe_domain": "googleapis.com",
        "account": "",
        "expiry": "2030-01-01T00:00:00.000000Z"
    }"#;

    #[tokio::test]
    async fn test_reads_google_authorized_user_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("youtube_token.json");
        std::fs::write(&path, GOOGLE_AUTH_JSON).unwrap();

        let store = FileCredentialStore::new(&path);
        let credential = store.load().await.unwrap().unwrap();
        assert_eq!(credential.refresh_token, "1//0g");
        assert_eq!(credential.kind, "authorized_user");
        assert_eq!(
            credential.valid_token(chrono::Duration::seconds(60)),
            Some("ya29.a0Af")
        );
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path().join("nested/token.json"));
        assert!(store.load().await.unwrap().is_none());

        let credential: AuthorizedUserCredential = serde_json::from_str(GOOGLE_AUTH_JSON).unwrap();
        store.save(&credential).await.unwrap();

        let loaded = store.load().await.unwrap().unwrap();
        assert_eq!(loaded.client_id, credential.client_id);
        assert_eq!(loaded.expiry, credential.expiry);
    }

    #[tokio::test]
    async fn test_garbage_file_is_missing_credential() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        std::fs::write(&path, "pickle bytes").unwrap();

        let err = FileCredentialStore::new(&path).load().await.unwrap_err();
        assert!(err.is_auth_failure());
    }

    #[test]
    fn test_expired_token_is_not_valid() {
        let mut credential: AuthorizedUserCredential =
            serde_json::from_str(GOOGLE_AUTH_JSON).unwrap();
        credential.expiry = Some(Utc::now() + chrono::Duration::seconds(30));
        assert!(credential.valid_token(chrono::Duration::seconds(60)).is_none());
        credential.expiry = None;
        assert!(credential.valid_token(chrono::Duration::seconds(60)).is_none());
    }

    #[tokio::test]
    async fn test_client_secrets_installed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret.json");
        std::fs::write(
            &path,
            r#"{"installed":{"client_id":"cid","client_secret":"cs","auth_uri":"https://accounts.google.com/o/oauth2/auth","token_uri":"https://oauth2.googleapis.com/token"}}"#,
        )
        .unwrap();

        let secrets = ClientSecrets::load(&path).await.unwrap();
        assert_eq!(secrets.client_id, "cid");
        assert_eq!(secrets.token_uri, "https://oauth2.googleapis.com/token");
    }
}
