//! Error types for PaperScout.
//!
//! Library crates use [`PaperScoutError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all PaperScout operations.
#[derive(Debug, thiserror::Error)]
pub enum PaperScoutError {
    /// Configuration loading or validation error. Fatal at startup.
    #[error("config error: {message}")]
    Config { message: String },

    /// Transient network/HTTP failure talking to a provider. Retryable.
    #[error("network error: {0}")]
    Network(String),

    /// Provider signalled throttling (HTTP 429). Retryable with backoff.
    #[error("rate limited: {message}")]
    RateLimited { message: String },

    /// Response did not match the expected schema. Consumes a retry attempt.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Table or checkpoint persistence error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Relevance-scoring error (worker pool, client setup).
    #[error("scoring error: {0}")]
    Scoring(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (empty result set, malformed record, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PaperScoutError>;

impl PaperScoutError {
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

    /// Create a rate-limit error from any displayable message.
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited {
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

    /// Whether a failed attempt with this error may be retried.
    ///
    /// Parse errors are not retryable for the attempt itself but still
    /// count against the caller's retry budget.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::RateLimited { .. })
    }
}
