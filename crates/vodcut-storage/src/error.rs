//! Publish error types.

use std::path::PathBuf;

use thiserror::Error;

/// Result type for publish operations.
pub type PublishResult<T> = Result<T, PublishError>;

/// Errors that can occur while publishing a VOD.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to configure publisher: {0}")]
    Config(String),

    #[error("Filesystem error on {path}: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid credentials, access denied or quota exhaustion.
    #[error("Storage rejected credentials or quota: {0}")]
    StorageAuth(String),

    #[error("Storage request failed: {0}")]
    Network(String),

    #[error("Presign failed: {0}")]
    Presign(String),
}

impl PublishError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn filesystem(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            path: path.into(),
            source,
        }
    }

    /// Check if retrying the same call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PublishError::Network(_))
    }
}
