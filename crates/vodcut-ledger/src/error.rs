//! Ledger error types.

use std::path::PathBuf;

use thiserror::Error;
use vodcut_models::VodStatus;

/// Result type for ledger operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors that can occur while reading or writing the ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Ledger file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported ledger format version {0}")]
    UnsupportedVersion(u32),

    #[error("Ledger {0} is locked by another process")]
    Locked(PathBuf),

    #[error("Cannot mark '{vod_id}' processed while it is {status}")]
    NotDone { vod_id: String, status: VodStatus },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    /// Corruption and locking problems must stop the process at startup.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            LedgerError::Corrupt { .. } | LedgerError::UnsupportedVersion(_) | LedgerError::Locked(_)
        )
    }
}
