//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use vodcut_models::absolute_path;

use crate::error::{WorkerError, WorkerResult};

/// How VODs are discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerMode {
    /// Recorder posts `end_download` events to the listener
    Webhook,
    /// Scan the watch directory for finished recordings
    Poll,
}

impl TriggerMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerMode::Webhook => "webhook",
            TriggerMode::Poll => "poll",
        }
    }
}

impl FromStr for TriggerMode {
    type Err = WorkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "webhook" => Ok(TriggerMode::Webhook),
            "poll" => Ok(TriggerMode::Poll),
            other => Err(WorkerError::config_error(format!(
                "TRIGGER_MODE must be 'webhook' or 'poll', got '{}'",
                other
            ))),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub trigger_mode: TriggerMode,
    /// Exit after one handled VOD
    pub run_once: bool,
    /// Process this file and exit
    pub vod_file: Option<PathBuf>,
    /// Explicit id for `vod_file`
    pub vod_id: Option<String>,
    /// Recordings root
    pub watch_dir: PathBuf,
    /// Accepted media extensions, lowercase without the dot
    pub vod_extensions: Vec<String>,
    /// Watch-directory scan interval
    pub poll_interval: Duration,
    /// Minimum file age and stability window
    pub stable_for: Duration,
    /// Minimum size of a watch-directory candidate
    pub min_vod_size_bytes: u64,
    /// Prefix rewrite for webhook-reported paths
    pub source_path_rewrite: Option<(String, String)>,
    /// Ledger file
    pub ledger_path: PathBuf,
    /// Root for per-job clip downloads
    pub work_dir: PathBuf,
    /// Maximum concurrent downloads per job
    pub max_download_parallel: usize,
    /// Maximum VODs processed at once in listener mode
    pub max_concurrent_jobs: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            trigger_mode: TriggerMode::Webhook,
            run_once: true,
            vod_file: None,
            vod_id: None,
            watch_dir: PathBuf::from("./data/storage/vods"),
            vod_extensions: vec!["ts".into(), "mp4".into(), "mkv".into()],
            poll_interval: Duration::from_secs(20),
            stable_for: Duration::from_secs(120),
            min_vod_size_bytes: 200 * 1024 * 1024,
            source_path_rewrite: None,
            ledger_path: PathBuf::from("./processed_vods.json"),
            work_dir: PathBuf::from("./downloads"),
            max_download_parallel: 2,
            max_concurrent_jobs: 1,
        }
    }
}

fn env_text(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_number<T: FromStr>(name: &str, default: T) -> WorkerResult<T> {
    match env_text(name) {
        Some(v) => v
            .parse()
            .map_err(|_| WorkerError::config_error(format!("{} is not a valid number: {}", name, v))),
        None => Ok(default),
    }
}

/// `1`, `true`, `yes` and `on` are truthy, case-insensitively.
pub fn parse_bool(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Split a comma-separated extension list into lowercase, dotless entries.
pub fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> WorkerResult<Self> {
        let defaults = Self::default();

        let vod_file = env_text("VOD_FILE").map(PathBuf::from);
        let run_once = vod_file.is_some()
            || env_text("RUN_ONCE")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.run_once);

        let rewrite_from = env_text("SOURCE_PATH_REWRITE_FROM");
        let rewrite_to = std::env::var("SOURCE_PATH_REWRITE_TO")
            .map(|v| v.trim().to_string())
            .unwrap_or_default();

        let vod_extensions = env_text("VOD_EXTENSIONS")
            .map(|v| parse_extensions(&v))
            .unwrap_or(defaults.vod_extensions);
        if vod_extensions.is_empty() {
            return Err(WorkerError::config_error("VOD_EXTENSIONS lists no extensions"));
        }

        let config = Self {
            trigger_mode: match env_text("TRIGGER_MODE") {
                Some(mode) => mode.parse()?,
                None => defaults.trigger_mode,
            },
            run_once,
            vod_file,
            vod_id: env_text("VOD_ID"),
            watch_dir: absolute_path(
                &env_text("WATCH_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.watch_dir),
            ),
            vod_extensions,
            poll_interval: Duration::from_secs(env_number("POLL_INTERVAL_SEC", 20u64)?),
            stable_for: Duration::from_secs(env_number("STABLE_FOR_SEC", 120u64)?),
            min_vod_size_bytes: env_number("MIN_VOD_SIZE_MB", 200u64)?.saturating_mul(1024 * 1024),
            source_path_rewrite: rewrite_from.map(|from| (from, rewrite_to)),
            ledger_path: env_text("PROCESSED_STATE_FILE")
                .map(PathBuf::from)
                .unwrap_or(defaults.ledger_path),
            work_dir: env_text("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_download_parallel: env_number("MAX_DOWNLOAD_PARALLEL", 2usize)?,
            max_concurrent_jobs: env_number("MAX_CONCURRENT_JOBS", 1usize)?,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> WorkerResult<()> {
        if self.max_download_parallel == 0 {
            return Err(WorkerError::config_error("MAX_DOWNLOAD_PARALLEL must be at least 1"));
        }
        if self.max_concurrent_jobs == 0 {
            return Err(WorkerError::config_error("MAX_CONCURRENT_JOBS must be at least 1"));
        }
        if self.poll_interval.is_zero() {
            return Err(WorkerError::config_error("POLL_INTERVAL_SEC must be positive"));
        }
        Ok(())
    }
}
