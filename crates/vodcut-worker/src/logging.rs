//! Structured logging.
//!
//! Process-wide subscriber setup and a per-VOD job logger with consistent
//! fields.

use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vodcut_models::{VodId, VodStatus};

/// Install the global subscriber.
///
/// ANSI text by default, JSON lines when `LOG_FORMAT=json`. `RUST_LOG` is
/// honored with `vodcut=info` added.
pub fn init_tracing() {
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "vodcut=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }
}

/// Job logger for one VOD's lifecycle.
#[derive(Debug, Clone)]
pub struct JobLogger {
    vod_id: String,
}

impl JobLogger {
    pub fn new(vod_id: &VodId) -> Self {
        Self {
            vod_id: vod_id.to_string(),
        }
    }

    /// Log the start of a run.
    pub fn log_start(&self, status: VodStatus, message: &str) {
        info!(vod_id = %self.vod_id, status = %status, "Job started: {}", message);
    }

    /// Log a step transition.
    pub fn log_progress(&self, status: VodStatus, message: &str) {
        info!(vod_id = %self.vod_id, status = %status, "Job progress: {}", message);
    }

    pub fn log_warning(&self, status: VodStatus, message: &str) {
        warn!(vod_id = %self.vod_id, status = %status, "Job warning: {}", message);
    }

    /// Log a failure with the status the job held when it failed.
    pub fn log_error(&self, status: VodStatus, message: &str) {
        error!(vod_id = %self.vod_id, status = %status, "Job failed: {}", message);
    }

    pub fn log_completion(&self, message: &str) {
        info!(vod_id = %self.vod_id, status = %VodStatus::Done, "Job completed: {}", message);
    }
}
