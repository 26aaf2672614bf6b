//! Error types for Pencraft.
//!
//! Library crates use [`PencraftError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which capability port a failure originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    Completion,
    Search,
    Scrape,
    Trends,
    Storage,
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Completion => "completion",
            Self::Search => "search",
            Self::Scrape => "scrape",
            Self::Trends => "trends",
            Self::Storage => "storage",
        };
        f.write_str(name)
    }
}

/// Top-level error type for all Pencraft operations.
#[derive(Debug, thiserror::Error)]
pub enum PencraftError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transport error from a capability port.
    #[error("{capability} unavailable: {message}")]
    CapabilityUnavailable {
        capability: Capability,
        message: String,
    },

    /// A capability call exceeded its deadline.
    #[error("{capability} timed out after {after:?}")]
    Timeout {
        capability: Capability,
        after: Duration,
    },

    /// A page could not be fetched or yielded no text.
    #[error("scrape failed for {url}: {message}")]
    ScrapeFailed { url: String, message: String },

    /// Storage read of a path that does not exist.
    #[error("not found: {path:?}")]
    NotFound { path: PathBuf },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Every search attempt failed for a topic.
    #[error("research unavailable: {0}")]
    ResearchUnavailable(String),

    /// Outline could not be produced.
    #[error("planning error: {0}")]
    Planning(String),

    /// Section drafting failed for the whole stage.
    #[error("writing error: {0}")]
    Writing(String),

    /// Assembly received structurally invalid input.
    #[error("formatting error: {0}")]
    Formatting(String),

    /// Post-generation check failed (word band, citations, job settings).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Could not parse a response or document.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// The batch was cancelled externally.
    #[error("cancelled: {0}")]
    Cancelled(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PencraftError>;

/// Machine-readable error classification recorded in job results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ConfigError,
    CapabilityUnavailable,
    ResearchUnavailable,
    PlanningError,
    WritingError,
    FormattingError,
    ValidationError,
    IoError,
    ParseError,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_owned))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

impl PencraftError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Transport failure on the given port.
    pub fn unavailable(capability: Capability, msg: impl Into<String>) -> Self {
        Self::CapabilityUnavailable {
            capability,
            message: msg.into(),
        }
    }

    /// Only transport failures and timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::CapabilityUnavailable { .. } | Self::Timeout { .. }
        )
    }

    /// Classify this error for job reporting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config { .. } => ErrorKind::ConfigError,
            Self::CapabilityUnavailable { .. } | Self::Timeout { .. } | Self::ScrapeFailed { .. } => {
                ErrorKind::CapabilityUnavailable
            }
            Self::NotFound { .. } | Self::Io { .. } => ErrorKind::IoError,
            Self::ResearchUnavailable(_) => ErrorKind::ResearchUnavailable,
            Self::Planning(_) => ErrorKind::PlanningError,
            Self::Writing(_) => ErrorKind::WritingError,
            Self::Formatting(_) => ErrorKind::FormattingError,
            Self::Validation { .. } => ErrorKind::ValidationError,
            Self::Parse { .. } => ErrorKind::ParseError,
            Self::Cancelled(_) => ErrorKind::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PencraftError::config("missing API key");
        assert_eq!(err.to_string(), "config error: missing API key");

        let err = PencraftError::unavailable(Capability::Completion, "connection refused");
        assert_eq!(
            err.to_string(),
            "completion unavailable: connection refused"
        );
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(PencraftError::unavailable(Capability::Search, "503").is_retryable());
        assert!(
            PencraftError::Timeout {
                capability: Capability::Scrape,
                after: Duration::from_secs(1),
            }
            .is_retryable()
        );
        assert!(!PencraftError::Writing("all sections failed".into()).is_retryable());
        assert!(
            !PencraftError::io("/tmp/x", std::io::Error::other("disk full")).is_retryable()
        );
    }

    #[test]
    fn kinds_are_snake_case() {
        assert_eq!(
            PencraftError::ResearchUnavailable("x".into()).kind().to_string(),
            "research_unavailable"
        );
        assert_eq!(
            PencraftError::Cancelled("stop".into()).kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            PencraftError::NotFound {
                path: "a.md".into()
            }
            .kind(),
            ErrorKind::IoError
        );
    }
}
