//! Ledger storage.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use vodcut_models::{LedgerEntry, VodId, VodJob, VodStatus};

use crate::claim::{Claim, ClaimGuard, InFlight};
use crate::error::{LedgerError, LedgerResult};
use crate::lock::{lock_path_for, ProcessLock};

/// On-disk format version.
pub const LEDGER_FORMAT_VERSION: u32 = 1;

/// Durable map of `vod_id -> LedgerEntry`.
///
/// Every write is durable before the call returns. `try_claim` is the only
/// way to start processing a VOD; it is atomic with respect to other claims
/// and to `mark_processed` in the same process.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Whether the VOD has been fully processed.
    async fn has_processed(&self, vod_id: &VodId) -> LedgerResult<bool>;

    /// Current entry for the VOD, if any.
    async fn entry(&self, vod_id: &VodId) -> LedgerResult<Option<LedgerEntry>>;

    /// Check-and-claim the VOD for processing.
    async fn try_claim(&self, vod_id: &VodId) -> LedgerResult<Claim>;

    /// Persist a non-terminal job state for resume.
    async fn checkpoint(&self, job: &VodJob) -> LedgerResult<()>;

    /// Record the job as DONE. The job must already be in `Done`.
    async fn mark_processed(&self, job: &VodJob) -> LedgerResult<()>;

    /// Record the job as FAILED. A later claim starts from scratch.
    async fn mark_failed(&self, job: &VodJob) -> LedgerResult<()>;

    /// Number of DONE entries.
    async fn processed_count(&self) -> LedgerResult<usize>;
}

#[derive(Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(default)]
    entries: BTreeMap<VodId, LedgerEntry>,
}

#[derive(Serialize)]
struct LedgerFileRef<'a> {
    version: u32,
    entries: &'a BTreeMap<VodId, LedgerEntry>,
}

/// JSON-file ledger.
///
/// Writes go to `<path>.tmp`, are fsynced and renamed over the file, so a
/// crash leaves either the old or the new contents. `in_memory()` skips the
/// file entirely.
pub struct FileLedger {
    path: Option<PathBuf>,
    entries: tokio::sync::Mutex<BTreeMap<VodId, LedgerEntry>>,
    in_flight: InFlight,
    _lock: Option<ProcessLock>,
}

impl FileLedger {
    /// Open (or create) the ledger at `path` and take the process lock.
    ///
    /// An unreadable file is fatal; it is never silently replaced.
    pub fn open(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        let path = path.into();
        let lock = ProcessLock::acquire(&lock_path_for(&path))?;
        let entries = load_entries(&path)?;

        info!(
            "Opened ledger {} ({} entries)",
            path.display(),
            entries.len()
        );

        Ok(Self {
            path: Some(path),
            entries: tokio::sync::Mutex::new(entries),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            _lock: Some(lock),
        })
    }

    /// Ledger with no backing file.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            entries: tokio::sync::Mutex::new(BTreeMap::new()),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            _lock: None,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Insert an entry, persisting before the in-memory view changes.
    async fn upsert(&self, vod_id: &VodId, entry: LedgerEntry) -> LedgerResult<()> {
        let mut entries = self.entries.lock().await;
        let mut next = entries.clone();
        next.insert(vod_id.clone(), entry);
        self.persist(&next).await?;
        *entries = next;
        Ok(())
    }

    async fn persist(&self, entries: &BTreeMap<VodId, LedgerEntry>) -> LedgerResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let bytes = serde_json::to_vec_pretty(&LedgerFileRef {
            version: LEDGER_FORMAT_VERSION,
            entries,
        })?;

        let tmp = tmp_path_for(path);
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&tmp, path).await?;

        debug!("Persisted ledger ({} entries)", entries.len());
        Ok(())
    }
}

#[async_trait]
impl Ledger for FileLedger {
    async fn has_processed(&self, vod_id: &VodId) -> LedgerResult<bool> {
        let entries = self.entries.lock().await;
        Ok(entries.get(vod_id).is_some_and(LedgerEntry::is_done))
    }

    async fn entry(&self, vod_id: &VodId) -> LedgerResult<Option<LedgerEntry>> {
        let entries = self.entries.lock().await;
        Ok(entries.get(vod_id).cloned())
    }

    async fn try_claim(&self, vod_id: &VodId) -> LedgerResult<Claim> {
        // Held across the check so mark_processed cannot interleave.
        let entries = self.entries.lock().await;
        let existing = entries.get(vod_id);

        if let Some(entry) = existing.filter(|e| e.is_done()) {
            return Ok(Claim::AlreadyProcessed(entry.clone()));
        }

        {
            let mut in_flight = match self.in_flight.lock() {
                Ok(set) => set,
                Err(poisoned) => poisoned.into_inner(),
            };
            if !in_flight.insert(vod_id.clone()) {
                return Ok(Claim::InProgress);
            }
        }

        let resume = existing.and_then(|e| e.resumable()).cloned();
        if let Some(job) = &resume {
            info!(vod_id = %vod_id, status = %job.status, "Resuming from checkpoint");
        } else if existing.is_some_and(|e| e.status == VodStatus::Failed) {
            debug!(vod_id = %vod_id, "Previous run failed, starting over");
        }

        Ok(Claim::Acquired(ClaimGuard::new(
            vod_id.clone(),
            resume,
            self.in_flight.clone(),
        )))
    }

    async fn checkpoint(&self, job: &VodJob) -> LedgerResult<()> {
        if job.is_terminal() {
            warn!(vod_id = %job.vod_id, status = %job.status, "Checkpoint of a terminal job");
        }
        self.upsert(&job.vod_id, LedgerEntry::from_job(job)).await
    }

    async fn mark_processed(&self, job: &VodJob) -> LedgerResult<()> {
        if job.status != VodStatus::Done {
            return Err(LedgerError::NotDone {
                vod_id: job.vod_id.to_string(),
                status: job.status,
            });
        }
        self.upsert(&job.vod_id, LedgerEntry::from_job(job)).await
    }

    async fn mark_failed(&self, job: &VodJob) -> LedgerResult<()> {
        let mut failed = job.clone();
        failed.fail("failed");
        self.upsert(&failed.vod_id, LedgerEntry::from_job(&failed)).await
    }

    async fn processed_count(&self) -> LedgerResult<usize> {
        let entries = self.entries.lock().await;
        Ok(entries.values().filter(|e| e.is_done()).count())
    }
}

fn load_entries(path: &Path) -> LedgerResult<BTreeMap<VodId, LedgerEntry>> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => return Err(e.into()),
    };

    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(BTreeMap::new());
    }

    let file: LedgerFile = serde_json::from_slice(&raw).map_err(|source| LedgerError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;

    if file.version != LEDGER_FORMAT_VERSION {
        return Err(LedgerError::UnsupportedVersion(file.version));
    }
    Ok(file.entries)
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}
