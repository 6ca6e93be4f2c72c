//! The per-VOD unit of work and its status machine.
//!
//! A `VodJob` advances strictly forward through [`VodStatus`]; `clip_refs`,
//! `local_clip_paths` and `upload_results` are index-aligned.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::VodId;

/// Pipeline status of a VOD job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VodStatus {
    /// Trigger accepted, nothing done yet
    #[default]
    Received,
    /// Source file is reachable by the clip service
    Published,
    /// Clip service project exists
    ProjectCreated,
    /// Polling the clip service for exportable clips
    AwaitingClips,
    /// Clip list received
    ClipsReady,
    /// Every clip is on local disk
    Downloaded,
    /// Every clip is on the hosting platform
    Uploaded,
    /// Recorded as processed in the ledger
    Done,
    /// Stopped with a failure reason
    Failed,
}

impl VodStatus {
    /// Get string representation of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            VodStatus::Received => "RECEIVED",
            VodStatus::Published => "PUBLISHED",
            VodStatus::ProjectCreated => "PROJECT_CREATED",
            VodStatus::AwaitingClips => "AWAITING_CLIPS",
            VodStatus::ClipsReady => "CLIPS_READY",
            VodStatus::Downloaded => "DOWNLOADED",
            VodStatus::Uploaded => "UPLOADED",
            VodStatus::Done => "DONE",
            VodStatus::Failed => "FAILED",
        }
    }

    /// Position in the forward sequence. `Failed` sorts after everything.
    fn rank(&self) -> u8 {
        match self {
            VodStatus::Received => 0,
            VodStatus::Published => 1,
            VodStatus::ProjectCreated => 2,
            VodStatus::AwaitingClips => 3,
            VodStatus::ClipsReady => 4,
            VodStatus::Downloaded => 5,
            VodStatus::Uploaded => 6,
            VodStatus::Done => 7,
            VodStatus::Failed => 8,
        }
    }

    /// Check if this is a terminal state (no more updates expected).
    pub fn is_terminal(&self) -> bool {
        matches!(self, VodStatus::Done | VodStatus::Failed)
    }

    /// Check whether `next` is a legal successor of `self`.
    pub fn can_advance_to(&self, next: VodStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }
}

impl std::fmt::Display for VodStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StatusTransitionError {
    #[error("cannot move from {from} to {to}")]
    Regression { from: VodStatus, to: VodStatus },

    #[error("{what}: expected {expected} entries, got {actual}")]
    Misaligned {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("upload for clip '{got}' recorded where clip '{expected}' was expected")]
    WrongClip { expected: String, got: String },
}

/// A clip produced by the clip service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRef {
    /// Clip identifier assigned by the clip service
    pub id: String,
    /// Where the rendered clip can be fetched
    pub download_url: String,
    /// Suggested title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Suggested description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Suggested hashtags
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hashtags: Option<String>,
}

/// Hosting-platform result for one clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub clip_id: String,
    pub video_id: String,
}

/// The unit of work for one VOD.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VodJob {
    pub vod_id: VodId,
    pub source_path: PathBuf,
    #[serde(default)]
    pub publish_url: String,
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub clip_refs: Vec<ClipRef>,
    #[serde(default)]
    pub local_clip_paths: Vec<PathBuf>,
    #[serde(default)]
    pub upload_results: Vec<UploadRecord>,
    pub status: VodStatus,
    /// Populated only when `status` is `Failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Status the job held when it failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<VodStatus>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VodJob {
    /// Create a freshly received job.
    pub fn new(vod_id: VodId, source_path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            vod_id,
            source_path: source_path.into(),
            publish_url: String::new(),
            project_id: String::new(),
            clip_refs: Vec::new(),
            local_clip_paths: Vec::new(),
            upload_results: Vec::new(),
            status: VodStatus::Received,
            failure_reason: None,
            failed_at: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Check if the job is in a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Move to `next`, refusing any regression.
    pub fn advance(&mut self, next: VodStatus) -> Result<(), StatusTransitionError> {
        if next == VodStatus::Failed || !self.status.can_advance_to(next) {
            return Err(StatusTransitionError::Regression {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Record the URL the clip service will fetch.
    pub fn record_published(&mut self, url: impl Into<String>) -> Result<(), StatusTransitionError> {
        self.advance(VodStatus::Published)?;
        self.publish_url = url.into();
        Ok(())
    }

    /// Record the clip service project.
    pub fn record_project(&mut self, project_id: impl Into<String>) -> Result<(), StatusTransitionError> {
        self.advance(VodStatus::ProjectCreated)?;
        self.project_id = project_id.into();
        Ok(())
    }

    /// Mark the start of polling.
    pub fn begin_waiting(&mut self) -> Result<(), StatusTransitionError> {
        self.advance(VodStatus::AwaitingClips)
    }

    /// Record the ready clip list.
    pub fn record_clips(&mut self, clips: Vec<ClipRef>) -> Result<(), StatusTransitionError> {
        self.advance(VodStatus::ClipsReady)?;
        self.clip_refs = clips;
        Ok(())
    }

    /// Record downloaded files; must cover every clip, in order.
    pub fn record_downloads(&mut self, paths: Vec<PathBuf>) -> Result<(), StatusTransitionError> {
        if paths.len() != self.clip_refs.len() {
            return Err(StatusTransitionError::Misaligned {
                what: "local_clip_paths",
                expected: self.clip_refs.len(),
                actual: paths.len(),
            });
        }
        self.advance(VodStatus::Downloaded)?;
        self.local_clip_paths = paths;
        Ok(())
    }

    /// Append one upload result. It must belong to the next clip in order.
    pub fn record_upload(&mut self, record: UploadRecord) -> Result<(), StatusTransitionError> {
        let index = self.upload_results.len();
        let expected = self.clip_refs.get(index).map(|c| c.id.clone()).ok_or(
            StatusTransitionError::Misaligned {
                what: "upload_results",
                expected: self.clip_refs.len(),
                actual: index + 1,
            },
        )?;
        if expected != record.clip_id {
            return Err(StatusTransitionError::WrongClip {
                expected,
                got: record.clip_id,
            });
        }
        self.upload_results.push(record);
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark every clip uploaded.
    pub fn finish_uploads(&mut self) -> Result<(), StatusTransitionError> {
        if self.upload_results.len() != self.clip_refs.len() {
            return Err(StatusTransitionError::Misaligned {
                what: "upload_results",
                expected: self.clip_refs.len(),
                actual: self.upload_results.len(),
            });
        }
        self.advance(VodStatus::Uploaded)
    }

    /// Mark the job done.
    pub fn complete(&mut self) -> Result<(), StatusTransitionError> {
        self.advance(VodStatus::Done)
    }

    /// Mark the job failed with a reason. No-op on an already terminal job.
    pub fn fail(&mut self, reason: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.failed_at = Some(self.status);
        self.status = VodStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
    }

    /// Hosting-platform video ids in clip order.
    pub fn video_ids(&self) -> Vec<String> {
        self.upload_results.iter().map(|r| r.video_id.clone()).collect()
    }
}
