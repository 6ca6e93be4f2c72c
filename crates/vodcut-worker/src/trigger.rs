//! Turning trigger events into source files.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tokio::fs;
use tracing::{debug, info, warn};
use vodcut_ledger::Ledger;
use vodcut_models::{DvrEvent, VodId};

use crate::config::WorkerConfig;
use crate::error::WorkerResult;

/// Reference files that point at the media in the same directory.
const REFERENCE_EXTENSIONS: &[&str] = &["m3u8", "txt"];

/// A media file found on disk.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}

/// Whether `path` has one of `extensions` (lowercase, dotless).
pub fn has_extension(path: &Path, extensions: &[String]) -> bool {
    extension_of(path).is_some_and(|ext| extensions.iter().any(|e| *e == ext))
}

/// Recursively list media files under `root`, newest first.
///
/// A missing root yields an empty list; unreadable entries are skipped.
pub async fn scan_media(root: &Path, extensions: &[String]) -> WorkerResult<Vec<MediaFile>> {
    let mut found = Vec::new();
    if fs::metadata(root).await.is_err() {
        return Ok(found);
    }

    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if dir == root => return Err(e.into()),
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "Skipping unreadable directory");
                continue;
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if meta.is_dir() {
                pending.push(path);
            } else if meta.is_file() && has_extension(&path, extensions) {
                found.push(MediaFile {
                    path,
                    size: meta.len(),
                    modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                });
            }
        }
    }

    found.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(found)
}

/// Resolves recorder events to the finished recording.
#[derive(Debug, Clone)]
pub struct TriggerResolver {
    watch_dir: PathBuf,
    extensions: Vec<String>,
    rewrite: Option<(String, String)>,
}

impl TriggerResolver {
    pub fn new(watch_dir: impl Into<PathBuf>, extensions: Vec<String>) -> Self {
        Self {
            watch_dir: watch_dir.into(),
            extensions,
            rewrite: None,
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            watch_dir: config.watch_dir.clone(),
            extensions: config.vod_extensions.clone(),
            rewrite: config.source_path_rewrite.clone(),
        }
    }

    /// Rewrite reported paths starting with `from` to start with `to`.
    pub fn with_rewrite(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.rewrite = Some((from.into(), to.into()));
        self
    }

    pub fn watch_dir(&self) -> &Path {
        &self.watch_dir
    }

    /// Apply the configured prefix rewrite to a reported path.
    pub fn apply_rewrite(&self, raw: &str) -> PathBuf {
        match &self.rewrite {
            Some((from, to)) if !from.is_empty() => match raw.strip_prefix(from.as_str()) {
                Some(rest) => PathBuf::from(format!("{}{}", to, rest)),
                None => PathBuf::from(raw),
            },
            _ => PathBuf::from(raw),
        }
    }

    pub fn is_media(&self, path: &Path) -> bool {
        has_extension(path, &self.extensions)
    }

    /// Identity of a source file, relative to the watch directory.
    pub fn vod_id_for(&self, source: &Path) -> VodId {
        VodId::from_source(source, Some(&self.watch_dir))
    }

    /// Find the recording an event refers to.
    ///
    /// `Ok(None)` means the event does not name a recording that exists.
    pub async fn resolve(&self, event: &DvrEvent, ledger: &dyn Ledger) -> WorkerResult<Option<PathBuf>> {
        if !event.is_end_download() {
            info!(action = ?event.action, "Ignoring recorder event");
            return Ok(None);
        }

        for raw in event.direct_paths() {
            let path = self.apply_rewrite(raw);
            match fs::metadata(&path).await {
                Ok(meta) if meta.is_file() => {}
                _ => {
                    debug!(path = %path.display(), "Reported path is not a file");
                    continue;
                }
            }

            if self.is_media(&path) {
                info!(path = %path.display(), "Resolved VOD from reported path");
                return Ok(Some(path));
            }

            let is_reference = extension_of(&path)
                .is_some_and(|ext| REFERENCE_EXTENSIONS.contains(&ext.as_str()));
            if is_reference {
                if let Some(dir) = path.parent() {
                    if let Some(largest) = self.largest_media_in(dir).await {
                        info!(path = %largest.display(), "Resolved VOD from playlist reference");
                        return Ok(Some(largest));
                    }
                }
            }
        }

        if let Some(basename) = event.vod.basename.as_deref() {
            if let Some(path) = self.resolve_basename(basename, ledger).await? {
                info!(path = %path.display(), basename, "Resolved VOD by basename");
                return Ok(Some(path));
            }
        }

        warn!(
            direct_paths = ?event.direct_paths(),
            basename = ?event.vod.basename,
            "Could not resolve VOD from event"
        );
        Ok(None)
    }

    async fn largest_media_in(&self, dir: &Path) -> Option<PathBuf> {
        let mut entries = fs::read_dir(dir).await.ok()?;
        let mut best: Option<(u64, PathBuf)> = None;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !self.is_media(&path) {
                continue;
            }
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if meta.is_file() && best.as_ref().map_or(true, |(size, _)| meta.len() > *size) {
                best = Some((meta.len(), path));
            }
        }

        best.map(|(_, path)| path)
    }

    async fn resolve_basename(&self, basename: &str, ledger: &dyn Ledger) -> WorkerResult<Option<PathBuf>> {
        let matching: Vec<MediaFile> = scan_media(&self.watch_dir, &self.extensions)
            .await?
            .into_iter()
            .filter(|f| {
                f.path
                    .file_name()
                    .is_some_and(|n| n.to_string_lossy().contains(basename))
            })
            .collect();

        // Newest first already; prefer the first one not yet processed.
        for file in &matching {
            if !ledger.has_processed(&self.vod_id_for(&file.path)).await? {
                return Ok(Some(file.path.clone()));
            }
        }
        Ok(matching.into_iter().next().map(|f| f.path))
    }
}
