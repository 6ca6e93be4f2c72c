//! Pipeline metrics.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_STARTED_TOTAL: &str = "vodcut_jobs_started_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vodcut_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vodcut_jobs_failed_total";
    pub const JOBS_SKIPPED_TOTAL: &str = "vodcut_jobs_skipped_total";
    pub const CLIPS_DOWNLOADED_TOTAL: &str = "vodcut_clips_downloaded_total";
    pub const CLIPS_UPLOADED_TOTAL: &str = "vodcut_clips_uploaded_total";
    pub const CLIP_WAIT_SECONDS: &str = "vodcut_clip_wait_seconds";
    pub const JOB_DURATION_SECONDS: &str = "vodcut_job_duration_seconds";
}

pub fn record_job_started(resumed: bool) {
    let labels = [("resumed", resumed.to_string())];
    counter!(names::JOBS_STARTED_TOTAL, &labels).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS).record(duration_secs);
}

/// Record a failed job, labelled by the status it failed in.
pub fn record_job_failed(stage: &str) {
    let labels = [("stage", stage.to_string())];
    counter!(names::JOBS_FAILED_TOTAL, &labels).increment(1);
}

/// Record a trigger that did not start a run (`already_processed`, `in_progress`).
pub fn record_job_skipped(reason: &str) {
    let labels = [("reason", reason.to_string())];
    counter!(names::JOBS_SKIPPED_TOTAL, &labels).increment(1);
}

pub fn record_clips_downloaded(count: usize) {
    counter!(names::CLIPS_DOWNLOADED_TOTAL).increment(count as u64);
}

pub fn record_clip_uploaded() {
    counter!(names::CLIPS_UPLOADED_TOTAL).increment(1);
}

pub fn record_clip_wait(duration_secs: f64) {
    histogram!(names::CLIP_WAIT_SECONDS).record(duration_secs);
}
