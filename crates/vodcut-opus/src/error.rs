//! Clip service error types.

use thiserror::Error;

pub type ClipServiceResult<T> = Result<T, ClipServiceError>;

#[derive(Debug, Error)]
pub enum ClipServiceError {
    #[error("Clip service configuration error: {0}")]
    Config(String),

    #[error("Clip service returned {status}: {body}")]
    RemoteService { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Clips not ready after {waited_secs}s ({polls} polls)")]
    ClipTimeout { waited_secs: u64, polls: u32 },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl ClipServiceError {
    /// Build from a non-2xx response.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let mut body = body.into();
        if body.len() > 512 {
            let mut cut = 512;
            while !body.is_char_boundary(cut) {
                cut -= 1;
            }
            body.truncate(cut);
        }
        Self::RemoteService { status, body }
    }

    /// Network failures, throttling and server errors may clear up on their own.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClipServiceError::Network(_) => true,
            ClipServiceError::RemoteService { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            ClipServiceError::RemoteService { status, .. } => Some(*status),
            ClipServiceError::Network(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(ClipServiceError::from_http_status(429, "").is_retryable());
        assert!(ClipServiceError::from_http_status(503, "").is_retryable());
        assert!(!ClipServiceError::from_http_status(400, "").is_retryable());
        assert!(!ClipServiceError::from_http_status(401, "").is_retryable());
        assert!(!ClipServiceError::InvalidResponse("x".into()).is_retryable());
        assert!(!ClipServiceError::ClipTimeout { waited_secs: 300, polls: 20 }.is_retryable());
    }

    #[test]
    fn test_body_is_truncated() {
        let err = ClipServiceError::from_http_status(500, "x".repeat(2000));
        match err {
            ClipServiceError::RemoteService { body, .. } => assert_eq!(body.len(), 512),
            other => panic!("unexpected {:?}", other),
        }
    }
}
