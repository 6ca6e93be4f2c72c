//! Exclusive lock on the ledger file.
//!
//! Held for the life of the ledger so two processes never interleave
//! writes. The kernel drops `flock` locks when the holder exits, so a crash
//! never leaves a stale lock behind.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{LedgerError, LedgerResult};

/// An exclusive advisory lock on a sidecar file.
#[derive(Debug)]
pub struct ProcessLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl ProcessLock {
    /// Acquire the lock without blocking.
    ///
    /// Fails with [`LedgerError::Locked`] when another holder exists.
    pub fn acquire(path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;

        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;

            // SAFETY: the descriptor is owned by `file` and stays open for the call.
            let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
            if rc != 0 {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EWOULDBLOCK) {
                    return Err(LedgerError::Locked(path.to_path_buf()));
                }
                return Err(LedgerError::Io(err));
            }
        }

        debug!("Acquired ledger lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Lock file path for a ledger file: `<ledger>.lock`.
pub fn lock_path_for(ledger_path: &Path) -> PathBuf {
    let mut os = ledger_path.as_os_str().to_owned();
    os.push(".lock");
    PathBuf::from(os)
}
