//! Ledger entry persisted per VOD.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{VodJob, VodStatus};

/// Durable record for one `vod_id`.
///
/// Terminal entries keep only the outcome. Non-terminal entries also carry
/// the job checkpoint so an interrupted run can resume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub status: VodStatus,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<VodJob>,
}

impl LedgerEntry {
    /// Build the entry that reflects the job's current state.
    pub fn from_job(job: &VodJob) -> Self {
        let now = Utc::now();
        match job.status {
            VodStatus::Done => Self {
                status: VodStatus::Done,
                updated_at: now,
                completed_at: Some(now),
                video_ids: job.video_ids(),
                failure_reason: None,
                checkpoint: None,
            },
            VodStatus::Failed => Self {
                status: VodStatus::Failed,
                updated_at: now,
                completed_at: None,
                video_ids: job.video_ids(),
                failure_reason: job.failure_reason.clone(),
                checkpoint: None,
            },
            status => Self {
                status,
                updated_at: now,
                completed_at: None,
                video_ids: job.video_ids(),
                failure_reason: None,
                checkpoint: Some(job.clone()),
            },
        }
    }

    /// True once the VOD has been fully processed.
    pub fn is_done(&self) -> bool {
        self.status == VodStatus::Done
    }

    /// Checkpoint usable for resuming, if the entry is mid-pipeline.
    pub fn resumable(&self) -> Option<&VodJob> {
        if self.status.is_terminal() {
            None
        } else {
            self.checkpoint.as_ref()
        }
    }
}
