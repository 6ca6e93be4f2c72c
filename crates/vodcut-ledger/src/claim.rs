//! Per-VOD processing claims.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tracing::debug;
use vodcut_models::{LedgerEntry, VodId, VodJob};

pub(crate) type InFlight = Arc<Mutex<HashSet<VodId>>>;

/// Outcome of [`Ledger::try_claim`](crate::Ledger::try_claim).
#[derive(Debug)]
pub enum Claim {
    /// The caller owns this VOD until the guard is dropped.
    Acquired(ClaimGuard),
    /// The VOD is already DONE.
    AlreadyProcessed(LedgerEntry),
    /// Another task in this process holds the claim.
    InProgress,
}

/// Exclusive right to process one VOD.
///
/// Releases the in-process claim on drop, whatever the outcome was.
#[derive(Debug)]
pub struct ClaimGuard {
    vod_id: VodId,
    resume: Option<VodJob>,
    in_flight: InFlight,
}

impl ClaimGuard {
    pub(crate) fn new(vod_id: VodId, resume: Option<VodJob>, in_flight: InFlight) -> Self {
        Self {
            vod_id,
            resume,
            in_flight,
        }
    }

    pub fn vod_id(&self) -> &VodId {
        &self.vod_id
    }

    /// Checkpoint left by an interrupted run, if any.
    pub fn resume(&self) -> Option<&VodJob> {
        self.resume.as_ref()
    }

    /// Take the checkpoint out of the guard.
    pub fn take_resume(&mut self) -> Option<VodJob> {
        self.resume.take()
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        // A poisoned set still holds valid data; keep releasing.
        let mut set = match self.in_flight.lock() {
            Ok(set) => set,
            Err(poisoned) => poisoned.into_inner(),
        };
        set.remove(&self.vod_id);
        debug!(vod_id = %self.vod_id, "Released claim");
    }
}
