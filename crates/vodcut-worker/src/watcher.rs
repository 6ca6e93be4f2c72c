//! Watch-directory polling.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::fs;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vodcut_ledger::Ledger;
use vodcut_models::VodId;

use crate::config::WorkerConfig;
use crate::error::WorkerResult;
use crate::retry::FailureTracker;
use crate::trigger::scan_media;

/// Finds finished recordings in the watch directory.
#[derive(Debug, Clone)]
pub struct VodWatcher {
    watch_dir: PathBuf,
    extensions: Vec<String>,
    min_size: u64,
    stable_for: Duration,
    probe_interval: Duration,
    poll_interval: Duration,
}

impl VodWatcher {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            watch_dir: config.watch_dir.clone(),
            extensions: config.vod_extensions.clone(),
            min_size: config.min_vod_size_bytes,
            stable_for: config.stable_for,
            probe_interval: (config.stable_for / 3).max(Duration::from_secs(1)),
            poll_interval: config.poll_interval,
        }
    }

    /// Override the pause between the two size samples of a stability probe.
    pub fn with_probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run one scan and return the newest ready file, if any.
    ///
    /// A file is ready when it is not yet DONE, meets the minimum size, is
    /// older than the stability window, and keeps its size across a probe.
    pub async fn scan_once(&self, ledger: &dyn Ledger) -> WorkerResult<Option<PathBuf>> {
        let candidates = scan_media(&self.watch_dir, &self.extensions).await?;
        debug!(
            candidates = candidates.len(),
            dir = %self.watch_dir.display(),
            "Scanned watch directory"
        );

        let now = SystemTime::now();
        for file in candidates {
            if file.size < self.min_size {
                continue;
            }
            let age = now.duration_since(file.modified).unwrap_or(Duration::ZERO);
            if age < self.stable_for {
                continue;
            }
            let vod_id = VodId::from_source(&file.path, Some(&self.watch_dir));
            if ledger.has_processed(&vod_id).await? {
                continue;
            }
            if self.is_stable(&file.path, file.size).await {
                info!(path = %file.path.display(), vod_id = %vod_id, "Selected stable VOD");
                return Ok(Some(file.path));
            }
            debug!(path = %file.path.display(), "File still changing");
        }
        Ok(None)
    }

    async fn is_stable(&self, path: &Path, size: u64) -> bool {
        tokio::time::sleep(self.probe_interval).await;
        match fs::metadata(path).await {
            Ok(meta) => meta.len() == size,
            Err(_) => false,
        }
    }

    /// Scan every poll interval until a file is ready.
    ///
    /// Returns `None` once `shutdown` flips to `true`.
    pub async fn wait_for_vod(
        &self,
        ledger: &dyn Ledger,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<PathBuf> {
        let mut failures = FailureTracker::new(3);
        let mut cycle: u64 = 0;

        loop {
            if *shutdown.borrow() {
                return None;
            }
            cycle += 1;

            match self.scan_once(ledger).await {
                Ok(Some(path)) => return Some(path),
                Ok(None) => {
                    failures.record_success();
                    info!(cycle, "No ready VOD yet, sleeping {:?}", self.poll_interval);
                }
                Err(e) => {
                    if failures.record_failure() {
                        warn!(cycle, error = %e, "Watch directory scan failed");
                    }
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use vodcut_ledger::{Claim, FileLedger};
    use vodcut_models::{VodJob, VodStatus};

    fn watcher(dir: &Path) -> VodWatcher {
        let config = WorkerConfig {
            watch_dir: dir.to_path_buf(),
            min_vod_size_bytes: 8,
            stable_for: Duration::ZERO,
            ..Default::default()
        };
        VodWatcher::from_config(&config).with_probe_interval(Duration::from_millis(1))
    }

    fn write(path: &Path, bytes: usize) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, vec![0u8; bytes]).unwrap();
    }

    #[test]
    fn test_probe_interval_from_config() {
        let config = WorkerConfig {
            stable_for: Duration::from_secs(120),
            ..Default::default()
        };
        assert_eq!(VodWatcher::from_config(&config).probe_interval, Duration::from_secs(40));

        let config = WorkerConfig {
            stable_for: Duration::from_secs(1),
            ..Default::default()
        };
        assert_eq!(VodWatcher::from_config(&config).probe_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_selects_newest_large_enough_file() {
        let dir = TempDir::new().unwrap();
        write(&dir.path().join("channel1/tiny.ts"), 2);
        write(&dir.path().join("channel1/old.ts"), 16);
        std::thread::sleep(Duration::from_millis(20));
        write(&dir.path().join("channel1/new.mp4"), 16);
        write(&dir.path().join("channel1/notes.txt"), 64);

        let ledger = FileLedger::in_memory();
        let found = watcher(dir.path()).scan_once(&ledger).await.unwrap();
        assert_eq!(found, Some(dir.path().join("channel1/new.mp4")));
    }

    #[tokio::test]
    async fn test_skips_processed_and_young_files() {
        let dir = TempDir::new().unwrap();
        let done = dir.path().join("channel1/done.ts");
        write(&done, 16);

        let ledger = FileLedger::in_memory();
        let id = VodId::from_source(&done, Some(dir.path()));
        let Claim::Acquired(_guard) = ledger.try_claim(&id).await.unwrap() else {
            panic!("expected claim");
        };
        let mut job = VodJob::new(id, &done);
        job.status = VodStatus::Done;
        ledger.mark_processed(&job).await.unwrap();

        assert_eq!(watcher(dir.path()).scan_once(&ledger).await.unwrap(), None);

        write(&dir.path().join("channel1/fresh.ts"), 16);
        let strict = VodWatcher {
            stable_for: Duration::from_secs(3600),
            ..watcher(dir.path())
        };
        assert_eq!(strict.scan_once(&ledger).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_wait_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let ledger = FileLedger::in_memory();
        let (tx, mut rx) = watch::channel(false);
        tx.send(true).unwrap();

        assert_eq!(watcher(dir.path()).wait_for_vod(&ledger, &mut rx).await, None);
    }
}
