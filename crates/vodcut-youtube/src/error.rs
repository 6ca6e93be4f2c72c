//! Upload error types.

use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

pub type UploadResult<T> = Result<T, UploadError>;

/// 403 reasons that mean the account is out of quota rather than forbidden.
const QUOTA_REASONS: &[&str] = &[
    "quotaExceeded",
    "uploadLimitExceeded",
    "rateLimitExceeded",
    "userRateLimitExceeded",
];

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No usable credential: {0}. Run `youtube-authorize` to create one")]
    MissingCredential(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Upload quota exhausted: {message}")]
    Quota {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Transient upload failure: {message}")]
    Transient {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Upload rejected ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("Uploader configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl UploadError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Quota and transient failures are retried with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::Quota { .. } | UploadError::Transient { .. })
    }

    /// Credential problems need operator action and are never retried.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, UploadError::Auth(_) | UploadError::MissingCredential(_))
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            UploadError::MissingCredential(_) => "missing_credential",
            UploadError::Auth(_) => "auth",
            UploadError::Quota { .. } => "quota",
            UploadError::Transient { .. } => "transient",
            UploadError::Rejected { .. } => "rejected",
            UploadError::Config(_) => "config",
            UploadError::Io(_) => "io",
            UploadError::Json(_) => "json",
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            UploadError::Quota { retry_after, .. } | UploadError::Transient { retry_after, .. } => {
                *retry_after
            }
            _ => None,
        }
    }

    /// Classify a non-2xx API response. 401 is handled by the caller.
    pub fn from_response(status: u16, retry_after: Option<Duration>, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, truncate(body, 300));
        match status {
            429 => UploadError::Quota {
                message,
                retry_after,
            },
            403 if error_reasons(body).iter().any(|r| QUOTA_REASONS.contains(&r.as_str())) => {
                UploadError::Quota {
                    message,
                    retry_after,
                }
            }
            401 | 403 => UploadError::Auth(message),
            s if s >= 500 => UploadError::Transient {
                message,
                retry_after,
            },
            _ => UploadError::Rejected {
                status,
                body: truncate(body, 300),
            },
        }
    }
}

impl From<reqwest::Error> for UploadError {
    fn from(e: reqwest::Error) -> Self {
        UploadError::transient(e.to_string())
    }
}

/// `error.errors[].reason` values from a Google API error body.
fn error_reasons(body: &str) -> Vec<String> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Vec::new();
    };
    value
        .pointer("/error/errors")
        .and_then(Value::as_array)
        .map(|errors| {
            errors
                .iter()
                .filter_map(|e| e.get("reason").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn truncate(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

/// Parse a `Retry-After` header given in seconds.
pub(crate) fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn google_error(reason: &str) -> String {
        json!({"error": {"code": 403, "message": "x", "errors": [{"reason": reason, "domain": "youtube.quota"}]}})
            .to_string()
    }

    #[test]
    fn test_quota_reasons() {
        let err = UploadError::from_response(403, None, &google_error("quotaExceeded"));
        assert!(matches!(err, UploadError::Quota { .. }));
        assert!(err.is_retryable());

        let err = UploadError::from_response(403, None, &google_error("uploadLimitExceeded"));
        assert!(matches!(err, UploadError::Quota { .. }));

        let err = UploadError::from_response(429, Some(Duration::from_secs(7)), "");
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
    }

    #[test]
    fn test_forbidden_is_auth() {
        let err = UploadError::from_response(403, None, &google_error("forbidden"));
        assert!(err.is_auth_failure());
        assert!(!err.is_retryable());

        let err = UploadError::from_response(403, None, "not json");
        assert!(err.is_auth_failure());
    }

    #[test]
    fn test_server_errors_are_transient() {
        assert!(UploadError::from_response(503, None, "").is_retryable());
        let err = UploadError::from_response(400, None, "bad metadata");
        assert!(matches!(err, UploadError::Rejected { status: 400, .. }));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_truncate_respects_chars() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("hi", 5), "hi");
    }
}
