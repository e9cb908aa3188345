//! Error types for modcrawl.
//!
//! Library crates use [`ModCrawlError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all modcrawl operations.
#[derive(Debug, thiserror::Error)]
pub enum ModCrawlError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// A line of the index feed is not a flat `{...}` record.
    #[error("malformed record at line {line}: {reason}")]
    MalformedRecord { line: usize, reason: String },

    /// The buffer is too short to hold even a single record.
    #[error("truncated input: {len} bytes, expected at least {min}")]
    TruncatedInput { len: usize, min: usize },

    /// A retry domain ran past its step budget.
    #[error("backoff exhausted for {domain} after {attempts} attempts")]
    BackoffExhausted { domain: String, attempts: u32 },

    /// Connection, TLS, or timeout failure talking to a remote service.
    #[error("transport error: {0}")]
    Transport(String),

    /// Non-success HTTP status that is not a rate-limit signal.
    #[error("HTTP {status} from {url}")]
    Http { url: String, status: u16 },

    /// The requested resource does not exist upstream.
    #[error("not found: {0}")]
    NotFound(String),

    /// A caller-supplied deadline expired.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        operation: String,
        elapsed: Duration,
    },

    /// Database or sink layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad identifier, bad wire row, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, ModCrawlError>;

impl ModCrawlError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a malformed-record error for a 1-based line number.
    pub fn malformed(line: usize, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            line,
            reason: reason.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Create a timeout error for a named operation.
    pub fn timeout(operation: impl Into<String>, elapsed: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            elapsed,
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the orchestrator may retry the failed operation.
    ///
    /// Only transport-level failures qualify; decode failures reject the page
    /// and exhausted backoff is a hard stop for its domain.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) | Self::Timeout { .. } => true,
            Self::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = ModCrawlError::config("missing database path");
        assert_eq!(err.to_string(), "config error: missing database path");

        let err = ModCrawlError::malformed(3, "missing closing brace");
        assert_eq!(
            err.to_string(),
            "malformed record at line 3: missing closing brace"
        );

        let err = ModCrawlError::BackoffExhausted {
            domain: "index".into(),
            attempts: 6,
        };
        assert!(err.to_string().contains("after 6 attempts"));
    }

    #[test]
    fn transient_classification() {
        assert!(ModCrawlError::Transport("reset".into()).is_transient());
        assert!(
            ModCrawlError::Http {
                url: "https://x".into(),
                status: 503
            }
            .is_transient()
        );
        assert!(
            !ModCrawlError::Http {
                url: "https://x".into(),
                status: 400
            }
            .is_transient()
        );
        assert!(!ModCrawlError::TruncatedInput { len: 3, min: 30 }.is_transient());
        assert!(
            !ModCrawlError::BackoffExhausted {
                domain: "index".into(),
                attempts: 6
            }
            .is_transient()
        );
    }
}
