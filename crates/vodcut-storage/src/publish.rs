//! The publish seam and strategy selection.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tracing::info;
use vodcut_models::{safe_name, safe_relative_path, VodId};

use crate::error::{PublishError, PublishResult};
use crate::local::LocalHttpPublisher;
use crate::r2::{R2PublishConfig, R2Publisher};

/// Makes a local file fetchable over HTTP.
///
/// Implementations are interchangeable: the rest of the pipeline only sees
/// the returned URL. Publishing the same VOD again yields an equivalent URL.
#[async_trait]
pub trait PublishStrategy: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Publish `source` under a key derived from `vod_id` and return its URL.
    async fn publish(&self, source: &Path, vod_id: &VodId) -> PublishResult<String>;
}

/// Which strategy to use. Exactly one is active per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PublishMode {
    #[default]
    LocalHttp,
    Cloud,
}

impl PublishMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishMode::LocalHttp => "local_http",
            PublishMode::Cloud => "cloud",
        }
    }
}

impl FromStr for PublishMode {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local_http" | "local" => Ok(PublishMode::LocalHttp),
            "cloud" | "r2" => Ok(PublishMode::Cloud),
            other => Err(PublishError::config(format!(
                "Unsupported PUBLISH_MODE '{}' (use local_http or cloud)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for PublishMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Publish configuration for whichever mode is selected.
#[derive(Debug, Clone)]
pub enum PublishConfig {
    LocalHttp { output_dir: PathBuf, base_url: String },
    Cloud(R2PublishConfig),
}

impl PublishConfig {
    /// Read `PUBLISH_MODE` and the variables that mode requires.
    pub fn from_env() -> PublishResult<Self> {
        let mode: PublishMode = std::env::var("PUBLISH_MODE")
            .unwrap_or_else(|_| "local_http".to_string())
            .parse()?;

        match mode {
            PublishMode::LocalHttp => {
                let base_url = std::env::var("PUBLIC_BASE_URL")
                    .ok()
                    .map(|v| v.trim().trim_end_matches('/').to_string())
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| {
                        PublishError::config("PUBLIC_BASE_URL is required for local_http mode")
                    })?;
                let output_dir = std::env::var("PUBLIC_OUTPUT_DIR")
                    .unwrap_or_else(|_| "./public_vods".to_string());
                Ok(PublishConfig::LocalHttp {
                    output_dir: PathBuf::from(output_dir),
                    base_url,
                })
            }
            PublishMode::Cloud => Ok(PublishConfig::Cloud(R2PublishConfig::from_env()?)),
        }
    }

    pub fn mode(&self) -> PublishMode {
        match self {
            PublishConfig::LocalHttp { .. } => PublishMode::LocalHttp,
            PublishConfig::Cloud(_) => PublishMode::Cloud,
        }
    }
}

/// Build the configured strategy.
pub fn build_publisher(config: PublishConfig) -> Arc<dyn PublishStrategy> {
    info!("Publish mode: {}", config.mode());
    match config {
        PublishConfig::LocalHttp {
            output_dir,
            base_url,
        } => Arc::new(LocalHttpPublisher::new(output_dir, base_url)),
        PublishConfig::Cloud(r2) => Arc::new(R2Publisher::new(r2)),
    }
}

/// Separator between a sanitized name and its digest. `safe_name` never
/// emits it, so tagged names cannot collide with verbatim ones.
const DIGEST_MARKER: char = '~';
const DIGEST_LEN: usize = 12;

/// Path segments for a VOD's published copy.
///
/// An id made only of URL-safe segments that already carry the source
/// extension is used verbatim. Any other id is sanitized and its file name
/// is tagged with a digest of the raw id, so distinct ids never share a
/// published path.
pub fn object_segments(vod_id: &VodId, source: &Path) -> Vec<String> {
    let ext = source
        .extension()
        .map(|e| safe_name(&e.to_string_lossy()))
        .filter(|e| !e.is_empty());

    let raw: Vec<&str> = vod_id.as_str().split('/').collect();
    let mut segments = safe_relative_path(vod_id.as_str());

    let verbatim = segments.len() == raw.len()
        && segments
            .iter()
            .zip(&raw)
            .all(|(safe, raw)| safe == raw && !safe.starts_with('.'))
        && segments
            .last()
            .is_some_and(|last| ext.as_deref().map_or(true, |ext| has_extension(last, ext)));
    if verbatim {
        return segments;
    }

    let hex = format!("{:x}", Sha256::digest(vod_id.as_str().as_bytes()));
    let tag = &hex[..DIGEST_LEN];

    let last = segments.pop().unwrap_or_default();
    let stem = match ext.as_deref() {
        Some(ext) if has_extension(&last, ext) => &last[..last.len() - ext.len() - 1],
        _ => last.as_str(),
    };
    let mut name = format!("{}{}{}", stem.trim_start_matches('.'), DIGEST_MARKER, tag);
    if let Some(ext) = ext {
        name.push('.');
        name.push_str(&ext);
    }

    let mut tagged: Vec<String> = segments
        .iter()
        .map(|s| s.trim_start_matches('.').to_string())
        .filter(|s| !s.is_empty())
        .collect();
    tagged.push(name);
    tagged
}

/// Case-insensitive `.ext` suffix check on an ASCII name.
fn has_extension(name: &str, ext: &str) -> bool {
    name.len() > ext.len()
        && name.as_bytes()[name.len() - ext.len() - 1] == b'.'
        && name[name.len() - ext.len()..].eq_ignore_ascii_case(ext)
}

/// Content type for a published VOD, by extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "ts" => "video/mp2t",
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}
