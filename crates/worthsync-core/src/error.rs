use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the sync layer.
///
/// Cloneable so that one deduplicated fetch outcome can be handed to every
/// caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid JSON: {0}")]
    Parse(String),

    #[error("Request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("Configuration error: {0}")]
    Config(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl SyncError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!(
            "{}... (truncated, {} total bytes)",
            &body[..end],
            body.len()
        )
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        SyncError::Status {
            status: status.as_u16(),
            body: Self::truncate_body(body),
        }
    }

    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network(_) | SyncError::Timeout(_) => true,
            SyncError::Status { status, .. } => *status == 429 || *status >= 500,
            SyncError::Parse(_) | SyncError::Config(_) => false,
        }
    }

    /// Map a transport error from a client whose per-request deadline is
    /// `deadline`; reqwest itself does not report it.
    pub fn from_request(err: reqwest::Error, deadline: Duration) -> Self {
        if err.is_timeout() {
            SyncError::Timeout(deadline)
        } else if err.is_decode() {
            SyncError::Parse(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, SyncError::Timeout(_))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Parse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_truncates_body() {
        let body = "x".repeat(2000);
        let err = SyncError::from_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR, &body);
        match err {
            SyncError::Status { status, body } => {
                assert_eq!(status, 500);
                assert!(body.starts_with(&"x".repeat(500)));
                assert!(body.ends_with("(truncated, 2000 total bytes)"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        // Leading ASCII byte puts byte 500 in the middle of a two-byte char
        let body = format!("a{}", "é".repeat(400));
        let truncated = SyncError::truncate_body(&body);
        assert!(truncated.starts_with('a'));
        assert!(truncated.contains("truncated, 801 total bytes"));
    }

    #[test]
    fn test_is_retryable() {
        assert!(SyncError::Network("reset".into()).is_retryable());
        assert!(SyncError::Timeout(Duration::from_secs(1)).is_retryable());
        assert!(SyncError::Status { status: 503, body: String::new() }.is_retryable());
        assert!(SyncError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(!SyncError::Status { status: 404, body: String::new() }.is_retryable());
        assert!(!SyncError::Parse("eof".into()).is_retryable());
    }

    #[test]
    fn test_timeout_is_distinct_from_network() {
        let timeout = SyncError::Timeout(Duration::from_millis(250));
        assert!(timeout.is_timeout());
        assert!(!SyncError::Network("x".into()).is_timeout());
        assert_eq!(timeout.to_string(), "Request timed out after 250ms");
    }
}
