use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

/// Errors a detail fetch can fail with
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Request timeout")]
    Timeout,

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP {code}")]
    Status {
        code: u16,
        /// Server-requested wait before the next attempt
        retry_after: Option<Duration>,
    },

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Malformed data: {0}")]
    Malformed(String),

    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Returns true if another attempt may succeed
    ///
    /// Timeouts and connection failures always qualify; status errors only
    /// when their code is in `retryable_statuses`. Parse and data errors
    /// never do.
    pub fn is_transient(&self, retryable_statuses: &HashSet<u16>) -> bool {
        match self {
            Self::Timeout | Self::Connection(_) => true,
            Self::Status { code, .. } => retryable_statuses.contains(code),
            Self::Parse(_) | Self::Malformed(_) | Self::Other(_) => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Status { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connection(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Status {
                code: status.as_u16(),
                retry_after: None,
            }
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else if e.is_request() || e.is_body() {
            // Resets and truncated bodies surface here
            Self::Connection(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> HashSet<u16> {
        [408, 413, 429, 500, 502, 503, 504].into_iter().collect()
    }

    #[test]
    fn test_transient_classes() {
        let statuses = defaults();

        assert!(FetchError::Timeout.is_transient(&statuses));
        assert!(FetchError::Connection("reset".into()).is_transient(&statuses));
        for code in [408, 413, 429, 500, 502, 503, 504] {
            let err = FetchError::Status {
                code,
                retry_after: None,
            };
            assert!(err.is_transient(&statuses), "{} should retry", code);
        }
    }

    #[test]
    fn test_permanent_classes() {
        let statuses = defaults();

        for code in [400, 401, 403, 404, 410, 501] {
            let err = FetchError::Status {
                code,
                retry_after: None,
            };
            assert!(!err.is_transient(&statuses), "{} should not retry", code);
        }
        assert!(!FetchError::Parse("bad json".into()).is_transient(&statuses));
        assert!(!FetchError::Malformed("empty".into()).is_transient(&statuses));
    }
}
