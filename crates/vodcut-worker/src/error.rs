//! Worker error types.

use std::path::PathBuf;

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("Download of clip '{clip_id}' failed: {message}")]
    Download { clip_id: String, message: String },

    #[error("Publish failed: {0}")]
    Publish(#[from] vodcut_storage::PublishError),

    #[error("Clip service error: {0}")]
    ClipService(#[from] vodcut_opus::ClipServiceError),

    #[error("Upload failed: {0}")]
    Upload(#[from] vodcut_youtube::UploadError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] vodcut_ledger::LedgerError),

    #[error("Invalid job state: {0}")]
    State(#[from] vodcut_models::StatusTransitionError),

    #[error("Listener error: {0}")]
    Api(#[from] vodcut_api::ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkerError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn download(clip_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Download {
            clip_id: clip_id.into(),
            message: message.into(),
        }
    }

    /// Check if retrying the failed call could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            WorkerError::Download { .. } => true,
            WorkerError::Publish(e) => e.is_retryable(),
            WorkerError::ClipService(e) => e.is_retryable(),
            WorkerError::Upload(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Credentials must be renewed by an operator before uploads can work.
    pub fn needs_reauthorization(&self) -> bool {
        matches!(self, WorkerError::Upload(e) if e.is_auth_failure())
    }
}
