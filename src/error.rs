//! Error handling for classrank.
//!
//! The engine never lets an error escape uncaught across the engine/UI
//! boundary: cold-load failures are returned for explicit manual retry,
//! background failures land in the coordinator's error mailbox, and storage
//! failures degrade to cache misses at the store layer.

use std::io;

use thiserror::Error;

/// Main error type for engine operations.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Operation canceled")]
    Canceled,

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("No cached catalog for tenant: {0}")]
    CacheMiss(String),

    #[error("Unknown tenant: {0}")]
    UnknownTenant(String),
}

impl EngineError {
    /// Whether a manual retry of the same operation can reasonably succeed.
    ///
    /// Transient backend and timeout failures are retryable; cancellations,
    /// config problems, and data errors are not.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Backend(_) | Self::Timeout(_))
    }

    /// Whether this error was caused by cooperative cancellation.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Result type alias using `EngineError`.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(EngineError::Backend("503".into()).is_transient());
        assert!(EngineError::Timeout("cold load".into()).is_transient());
        assert!(!EngineError::Canceled.is_transient());
        assert!(!EngineError::Config("bad".into()).is_transient());
        assert!(!EngineError::CacheMiss("uw".into()).is_transient());
    }

    #[test]
    fn test_canceled_classification() {
        assert!(EngineError::Canceled.is_canceled());
        assert!(!EngineError::Backend("x".into()).is_canceled());
    }

    #[test]
    fn test_display_messages() {
        let err = EngineError::UnknownTenant("madison".into());
        assert!(err.to_string().contains("madison"));
        let err = EngineError::CacheMiss("uw".into());
        assert!(err.to_string().contains("uw"));
    }
}
