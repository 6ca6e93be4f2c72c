//! Local HTTP publisher.
//!
//! Places the VOD under a directory that an existing web server exposes at
//! `base_url`. A hard link is tried first; across filesystems the file is
//! copied to a temp name and renamed into place.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, info};
use vodcut_models::VodId;

use crate::error::{PublishError, PublishResult};
use crate::publish::{object_segments, PublishStrategy};

/// Publishes into a web-served directory.
#[derive(Debug, Clone)]
pub struct LocalHttpPublisher {
    output_dir: PathBuf,
    base_url: String,
}

impl LocalHttpPublisher {
    pub fn new(output_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// URL for a set of already-sanitized segments.
    fn url_for(&self, segments: &[String]) -> String {
        let encoded: Vec<String> = segments
            .iter()
            .map(|s| urlencoding::encode(s).into_owned())
            .collect();
        format!("{}/{}", self.base_url, encoded.join("/"))
    }
}

#[async_trait]
impl PublishStrategy for LocalHttpPublisher {
    fn name(&self) -> &'static str {
        "local_http"
    }

    async fn publish(&self, source: &Path, vod_id: &VodId) -> PublishResult<String> {
        let source_meta = fs::metadata(source)
            .await
            .map_err(|e| PublishError::filesystem(source, e))?;

        let segments = object_segments(vod_id, source);
        let dest = segments
            .iter()
            .fold(self.output_dir.clone(), |dir, segment| dir.join(segment));

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PublishError::filesystem(parent, e))?;
        }

        match fs::metadata(&dest).await {
            Ok(existing) if existing.len() == source_meta.len() => {
                debug!("Reusing published copy {}", dest.display());
            }
            Ok(_) => {
                fs::remove_file(&dest)
                    .await
                    .map_err(|e| PublishError::filesystem(&dest, e))?;
                place_file(source, &dest).await?;
            }
            Err(_) => place_file(source, &dest).await?,
        }

        let url = self.url_for(&segments);
        info!(vod_id = %vod_id, "Published {} -> {}", source.display(), url);
        Ok(url)
    }
}

/// Hard link `source` at `dest`, or copy through a temp file.
async fn place_file(source: &Path, dest: &Path) -> PublishResult<()> {
    match fs::hard_link(source, dest).await {
        Ok(()) => {
            debug!("Hard-linked {} -> {}", source.display(), dest.display());
            return Ok(());
        }
        Err(e) => debug!("Hard link failed ({}), copying instead", e),
    }

    let mut tmp_name = dest.as_os_str().to_owned();
    tmp_name.push(".part");
    let tmp = PathBuf::from(tmp_name);

    if let Err(e) = fs::copy(source, &tmp).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(PublishError::filesystem(source, e));
    }
    fs::rename(&tmp, dest)
        .await
        .map_err(|e| PublishError::filesystem(dest, e))?;

    debug!("Copied {} -> {}", source.display(), dest.display());
    Ok(())
}
