use crate::retrieval::RejectReason;
use crate::transport::is_concurrent_flow_limit;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DownloadOutcome {
    /// `bytes_written` counts only the bytes transferred by the call that produced the outcome.
    Succeeded { path: PathBuf, bytes_written: u64 },
    Failed(FailureReason),
    Skipped(SkipReason),
}

impl DownloadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DownloadOutcome::Succeeded { .. })
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            DownloadOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

#[derive(Error, Clone, Debug, PartialEq, Eq)]
pub enum FailureReason {
    #[error("network error: {reason}")]
    Network { reason: String },

    #[error("HTTP status {status}{}", cause_suffix(.cause))]
    Http { status: u16, cause: Option<String> },

    #[error("checksum mismatch: expected {expected}, got {actual}")]
    InvalidChecksum { expected: String, actual: String },

    #[error("product is still offline")]
    StillOffline,

    #[error("product went offline")]
    Offline,

    #[error("retrieval rejected: {0}")]
    Rejected(RejectReason),

    #[error("invalid credentials")]
    Unauthorized,

    #[error("insufficient disk space")]
    InsufficientSpace,

    #[error("I/O error: {0}")]
    Io(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("cancelled")]
    Cancelled,

    #[error("batch deadline exceeded")]
    DeadlineExceeded,

    #[error("internal error: {0}")]
    Internal(String),
}

fn cause_suffix(cause: &Option<String>) -> String {
    cause.as_deref().map(|c| format!(": {c}")).unwrap_or_default()
}

impl FailureReason {
    /// Failures the orchestrator retries automatically.
    pub fn is_retryable(&self) -> bool {
        match self {
            FailureReason::Network { .. } => true,
            FailureReason::Http { status, cause } => {
                *status >= 500
                    || *status == 429
                    || (*status == 403 && is_concurrent_flow_limit(cause.as_deref()))
            }
            _ => false,
        }
    }
}

#[derive(Error, Clone, Copy, Debug, PartialEq, Eq)]
pub enum SkipReason {
    #[error("another download to the same destination is in progress")]
    AlreadyInProgress,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Simultaneous transfers
    pub concurrency: usize,
    /// Simultaneous metadata, probe and trigger requests
    pub catalog_concurrency: usize,
    /// Transfer attempts per item, counting the first one
    pub max_attempts: u32,
    pub retry_delay: Duration,
    /// Wait between two probes of an offline item
    pub poll_interval: Duration,
    /// Minimum time between two retrieval triggers for the same item
    pub trigger_interval: Duration,
    /// How long one item may stay offline before it is given up. `None` waits forever.
    pub offline_timeout: Option<Duration>,
    pub batch_timeout: Option<Duration>,
    pub verify_checksum: bool,
    pub file_extension: String,
    /// Stop the remaining items as soon as one of them fails.
    pub fail_fast: bool,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            catalog_concurrency: 10,
            max_attempts: 10,
            retry_delay: Duration::from_secs(10),
            poll_interval: Duration::from_secs(60),
            trigger_interval: Duration::from_secs(600),
            offline_timeout: Some(Duration::from_secs(12 * 60 * 60)),
            batch_timeout: None,
            verify_checksum: true,
            file_extension: "zip".to_string(),
            fail_fast: false,
        }
    }
}

impl DownloadOptions {
    /// Returns the list of problems, empty when the options are usable.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.concurrency == 0 {
            problems.push("concurrency must be at least 1".to_string());
        }
        if self.catalog_concurrency == 0 {
            problems.push("catalog_concurrency must be at least 1".to_string());
        }
        if self.max_attempts == 0 {
            problems.push("max_attempts must be at least 1".to_string());
        }
        if self.poll_interval.is_zero() {
            problems.push("poll_interval must be greater than zero".to_string());
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_failures() {
        assert!(FailureReason::Network { reason: "reset".into() }.is_retryable());
        for status in [500, 502, 503, 429] {
            assert!(
                FailureReason::Http { status, cause: None }.is_retryable(),
                "{status} should be retried"
            );
        }
        assert!(
            FailureReason::Http {
                status: 403,
                cause: Some("Maximum number of 2 concurrent flows achieved".into()),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_permanent_failures() {
        for reason in [
            FailureReason::Http { status: 404, cause: None },
            FailureReason::Http { status: 403, cause: None },
            FailureReason::InvalidChecksum {
                expected: "aa".into(),
                actual: "bb".into(),
            },
            FailureReason::Unauthorized,
            FailureReason::InsufficientSpace,
            FailureReason::Offline,
            FailureReason::Cancelled,
        ] {
            assert!(!reason.is_retryable(), "{reason} should not be retried");
        }
    }

    #[test]
    fn test_default_options_are_valid() {
        assert!(DownloadOptions::default().validate().is_empty());

        let options = DownloadOptions {
            concurrency: 0,
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(options.validate().len(), 2);
    }

    #[test]
    fn test_http_failure_display() {
        let reason = FailureReason::Http {
            status: 503,
            cause: Some("Service Unavailable".into()),
        };
        assert_eq!(reason.to_string(), "HTTP status 503: Service Unavailable");
        assert_eq!(
            FailureReason::Http { status: 500, cause: None }.to_string(),
            "HTTP status 500"
        );
    }
}
