//! Router error types.

use std::time::Duration;

use thiserror::Error;

pub type RouterResult<T> = Result<T, RouterError>;

/// Errors surfaced to callers of the router's setup APIs.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Rule engine error: {0}")]
    RuleEngine(#[from] RuleEngineError),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl RouterError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Rule registration errors. Returned at registration time, never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleEngineError {
    #[error("Rule with id '{0}' is already registered")]
    DuplicateRule(String),

    #[error("Rule with id '{0}' is not registered")]
    RuleNotFound(String),
}

/// Metadata probe/parse failures.
///
/// Always recovered locally: the classifier falls back to complexity
/// scoring and the rule engine issues a conservative decision.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("Unsupported media location: {0}")]
    UnsupportedLocation(String),

    #[error("Probe request failed: {0}")]
    ProbeFailed(String),

    #[error("Probe returned HTTP {status} for {location}")]
    HttpStatus { status: u16, location: String },

    #[error("Could not determine media size for {0}")]
    MissingSize(String),

    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClassificationError {
    pub fn probe_failed(msg: impl Into<String>) -> Self {
        Self::ProbeFailed(msg.into())
    }
}

impl From<reqwest::Error> for ClassificationError {
    fn from(e: reqwest::Error) -> Self {
        Self::ProbeFailed(e.to_string())
    }
}

/// Render backend failures. Eligible for the fallback cascade.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("no backend registered")]
    Unavailable,

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    #[error("cancelled")]
    Cancelled,
}

impl BackendError {
    pub fn failed(reason: impl Into<String>) -> Self {
        Self::Failed(reason.into())
    }

    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    /// Whether the backend was actually invoked (and may have consumed resources).
    pub fn was_dispatched(&self) -> bool {
        !matches!(self, BackendError::Unavailable)
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            BackendError::Failed(_) => "failed",
            BackendError::Timeout(_) => "timeout",
            BackendError::Unavailable => "unavailable",
            BackendError::Http(_) => "http",
            BackendError::InvalidResponse(_) => "invalid_response",
            BackendError::Cancelled => "cancelled",
        }
    }
}

/// Pre-processing failures. Non-fatal: the original media is used.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("FFmpeg not found in PATH")]
    FfmpegNotFound,

    #[error("FFmpeg command failed: {message}")]
    FfmpegFailed {
        message: String,
        exit_code: Option<i32>,
    },

    #[error("Cannot preprocess {0}: only local media can be rewritten")]
    UnsupportedSource(String),

    #[error("Preprocessing timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PreprocessError {
    pub fn ffmpeg_failed(message: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self::FfmpegFailed {
            message: message.into(),
            exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_messages() {
        assert_eq!(BackendError::failed("out of memory").to_string(), "out of memory");
        assert_eq!(
            BackendError::Timeout(Duration::from_secs(300)).to_string(),
            "timed out after 300s"
        );
        assert!(!BackendError::Unavailable.was_dispatched());
        assert!(BackendError::failed("x").was_dispatched());
    }

    #[test]
    fn test_router_error_from_rule_engine() {
        let err: RouterError = RuleEngineError::DuplicateRule("size-huge".into()).into();
        assert!(err.to_string().contains("size-huge"));
    }
}
