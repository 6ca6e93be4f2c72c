//! Cloud publisher backed by R2.

use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tracing::{debug, info};
use vodcut_models::VodId;

use crate::client::{ObjectInfo, R2Client, R2Config};
use crate::error::{PublishError, PublishResult};
use crate::publish::{content_type_for, object_segments, PublishStrategy};

const DEFAULT_PRESIGN_TTL_SECS: u64 = 86_400;

/// Longest validity SigV4 presigning accepts.
const MAX_PRESIGN_TTL: Duration = Duration::from_secs(7 * 86_400);

/// Cloud publish settings.
#[derive(Debug, Clone)]
pub struct R2PublishConfig {
    pub r2: R2Config,
    /// Key prefix for published VODs
    pub folder: String,
    /// Public bucket URL; presigned URLs are issued when unset
    pub public_base_url: Option<String>,
    pub presign_ttl: Duration,
}

impl R2PublishConfig {
    /// Create config from environment variables.
    pub fn from_env() -> PublishResult<Self> {
        let presign_ttl_secs = match std::env::var("R2_PRESIGN_TTL_SECS") {
            Ok(v) => v.trim().parse::<u64>().map_err(|_| {
                PublishError::config(format!("R2_PRESIGN_TTL_SECS is not a number: {}", v))
            })?,
            Err(_) => DEFAULT_PRESIGN_TTL_SECS,
        };
        if presign_ttl_secs < 2 || Duration::from_secs(presign_ttl_secs) > MAX_PRESIGN_TTL {
            return Err(PublishError::config(format!(
                "R2_PRESIGN_TTL_SECS must be between 2 and {}",
                MAX_PRESIGN_TTL.as_secs()
            )));
        }

        Ok(Self {
            r2: R2Config::from_env()?,
            folder: std::env::var("R2_FOLDER").unwrap_or_else(|_| "vods".to_string()),
            public_base_url: std::env::var("R2_PUBLIC_BASE_URL")
                .ok()
                .map(|v| v.trim().trim_end_matches('/').to_string())
                .filter(|v| !v.is_empty()),
            presign_ttl: Duration::from_secs(presign_ttl_secs),
        })
    }
}

/// Uploads the VOD to a bucket and returns a fetchable URL.
pub struct R2Publisher {
    client: R2Client,
    folder: String,
    public_base_url: Option<String>,
    presign_ttl: Duration,
}

impl R2Publisher {
    pub fn new(config: R2PublishConfig) -> Self {
        Self::with_client(R2Client::new(config.r2.clone()), config)
    }

    /// Use an already-built client.
    pub fn with_client(client: R2Client, config: R2PublishConfig) -> Self {
        Self {
            client,
            folder: config.folder.trim_matches('/').to_string(),
            public_base_url: config.public_base_url,
            presign_ttl: config.presign_ttl.min(MAX_PRESIGN_TTL),
        }
    }

    /// Object key for a VOD: `<folder>/<sanitized vod_id>`.
    pub fn object_key(&self, vod_id: &VodId, source: &Path) -> String {
        let key = object_segments(vod_id, source).join("/");
        if self.folder.is_empty() {
            key
        } else {
            format!("{}/{}", self.folder, key)
        }
    }

    async fn url_for(&self, key: &str, object: Option<ObjectInfo>) -> PublishResult<String> {
        match &self.public_base_url {
            Some(base) => {
                let encoded: Vec<String> = key
                    .split('/')
                    .map(|s| urlencoding::encode(s).into_owned())
                    .collect();
                Ok(format!("{}/{}", base, encoded.join("/")))
            }
            None => {
                let start = presign_start(
                    object.and_then(|o| o.last_modified),
                    SystemTime::now(),
                    self.presign_ttl,
                );
                self.client.presign_get(key, start, self.presign_ttl).await
            }
        }
    }
}

#[async_trait]
impl PublishStrategy for R2Publisher {
    fn name(&self) -> &'static str {
        "cloud"
    }

    async fn publish(&self, source: &Path, vod_id: &VodId) -> PublishResult<String> {
        let size = tokio::fs::metadata(source)
            .await
            .map_err(|e| PublishError::filesystem(source, e))?
            .len();

        let key = self.object_key(vod_id, source);
        let existing = self.client.head(&key).await?;
        let object = match existing {
            Some(info) if info.size == size => {
                debug!("Object {} already uploaded", key);
                Some(info)
            }
            _ => {
                self.client
                    .upload_file(source, &key, content_type_for(source))
                    .await?;
                self.client.head(&key).await?
            }
        };

        let url = self.url_for(&key, object).await?;
        info!(vod_id = %vod_id, key = %key, "Published to bucket {}", self.client.bucket());
        Ok(url)
    }
}

/// Start of the presign window covering `now`.
///
/// Windows are anchored at the object's modification time (the epoch when
/// unknown) and advance in steps of half the TTL, so every URL handed out
/// stays valid for at least half the TTL and repeated publishes within a
/// step return the same URL.
fn presign_start(anchor: Option<SystemTime>, now: SystemTime, ttl: Duration) -> SystemTime {
    let anchor = anchor.unwrap_or(UNIX_EPOCH);
    let step = (ttl / 2).max(Duration::from_secs(1));
    match now.duration_since(anchor) {
        Ok(age) => {
            let steps = age.as_secs() / step.as_secs();
            anchor + Duration::from_secs(steps * step.as_secs())
        }
        Err(_) => anchor,
    }
}
