//! Clip downloads.
//!
//! Each clip is streamed to `NN_<safe clip id>.mp4.part` and renamed into
//! place once complete, so a file without the suffix is always whole.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use vodcut_models::{safe_name, ClipRef};

use crate::error::{WorkerError, WorkerResult};
use crate::retry::{retry_async_if, RetryConfig};

/// Fetches clips to local disk.
#[async_trait]
pub trait ClipDownloader: Send + Sync {
    /// Download every clip into `dest_dir`, returning paths in clip order.
    ///
    /// Any failed clip fails the whole call.
    async fn download(&self, clips: &[ClipRef], dest_dir: &Path) -> WorkerResult<Vec<PathBuf>>;
}

/// Local file name for the clip at 0-based `index`.
pub fn clip_file_name(index: usize, clip: &ClipRef) -> String {
    format!("{:02}_{}.mp4", index + 1, safe_name(&clip.id))
}

#[derive(Debug, Error)]
enum FetchError {
    #[error("HTTP {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("empty response body")]
    Empty,

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl FetchError {
    fn is_transient(&self) -> bool {
        match self {
            FetchError::Status(code) => *code == 429 || *code >= 500,
            FetchError::Network(_) | FetchError::Empty => true,
            FetchError::Io(_) => false,
        }
    }
}

/// Downloader over plain HTTP(S).
#[derive(Clone)]
pub struct HttpDownloader {
    http: reqwest::Client,
    max_parallel: usize,
    retry: RetryConfig,
}

impl HttpDownloader {
    pub fn new(max_parallel: usize) -> WorkerResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .timeout(Duration::from_secs(600))
            .build()
            .map_err(|e| WorkerError::config_error(format!("HTTP client: {}", e)))?;

        Ok(Self {
            http,
            max_parallel: max_parallel.max(1),
            retry: RetryConfig::new("clip_download").with_max_retries(2),
        })
    }

    /// Override the retry schedule.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64, FetchError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let part = part_path(dest);
        let mut file = fs::File::create(&part).await?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = fs::remove_file(&part).await;
                    return Err(e.into());
                }
            };
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        if written == 0 {
            let _ = fs::remove_file(&part).await;
            return Err(FetchError::Empty);
        }

        fs::rename(&part, dest).await?;
        Ok(written)
    }

    async fn download_one(&self, index: usize, clip: &ClipRef, dest_dir: &Path) -> WorkerResult<PathBuf> {
        let dest = dest_dir.join(clip_file_name(index, clip));

        let bytes = retry_async_if(
            &self.retry,
            || self.fetch(&clip.download_url, &dest),
            FetchError::is_transient,
        )
        .await
        .into_result()
        .map_err(|e| WorkerError::download(&clip.id, e.to_string()))?;

        debug!(clip_id = %clip.id, bytes, path = %dest.display(), "Clip downloaded");
        Ok(dest)
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(".part");
    PathBuf::from(name)
}

#[async_trait]
impl ClipDownloader for HttpDownloader {
    async fn download(&self, clips: &[ClipRef], dest_dir: &Path) -> WorkerResult<Vec<PathBuf>> {
        fs::create_dir_all(dest_dir).await?;

        info!(
            clips = clips.len(),
            parallel = self.max_parallel,
            dir = %dest_dir.display(),
            "Downloading clips"
        );

        // `buffered` yields in input order regardless of completion order.
        let downloads: Vec<_> = clips
            .iter()
            .enumerate()
            .map(|(index, clip)| self.download_one(index, clip, dest_dir))
            .collect();
        let results: Vec<WorkerResult<PathBuf>> = stream::iter(downloads)
            .buffered(self.max_parallel)
            .collect()
            .await;

        results.into_iter().collect()
    }
}
