//! Error types for Enrich
//!
//! One error type shared by every layer. It is `Clone` because a single
//! failed computation is delivered to every waiter attached to it.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Enrich error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    // ========================================================================
    // Input
    // ========================================================================
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // ========================================================================
    // Execution
    // ========================================================================
    #[error("Executor failed for {fingerprint}: {message}")]
    ExecutorFailure {
        fingerprint: String,
        message: String,
    },

    #[error("Timeout exceeded for {fingerprint} after {timeout_ms}ms")]
    TimeoutExceeded { fingerprint: String, timeout_ms: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Work queue is closed")]
    QueueClosed,

    // ========================================================================
    // Storage
    // ========================================================================
    #[error("Durable store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    // ========================================================================
    // General
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error came out of the executor (timeouts included)
    pub fn is_executor_failure(&self) -> bool {
        matches!(
            self,
            Error::ExecutorFailure { .. } | Error::TimeoutExceeded { .. }
        )
    }

    /// Transient errors worth another attempt by a retry wrapper
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ExecutorFailure { .. }
                | Error::TimeoutExceeded { .. }
                | Error::StoreUnavailable(_)
        )
    }

    /// Errors that can be shown to a user as-is
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::InvalidInput(_) | Error::NotFound(_) | Error::Cancelled | Error::Config(_)
        )
    }

    /// Executor failure helper
    pub fn executor(fingerprint: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Error::ExecutorFailure {
            fingerprint: fingerprint.to_string(),
            message: message.into(),
        }
    }

    /// Timeout helper
    pub fn timeout(fingerprint: impl std::fmt::Display, timeout: std::time::Duration) -> Self {
        Error::TimeoutExceeded {
            fingerprint: fingerprint.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }
    }
}

// ============================================================================
// From impls (external errors)
// ============================================================================

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::StoreUnavailable(e.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_timeout_is_executor_failure() {
        let err = Error::timeout("abc", Duration::from_millis(1500));
        assert!(err.is_executor_failure());
        assert_eq!(
            err.to_string(),
            "Timeout exceeded for abc after 1500ms"
        );
    }

    #[test]
    fn test_invalid_input_not_retryable() {
        let err = Error::InvalidInput("empty unit".into());
        assert!(!err.is_retryable());
        assert!(err.is_user_facing());
    }

    #[test]
    fn test_clone_preserves_equality() {
        let err = Error::executor("fp", "model unavailable");
        assert_eq!(err.clone(), err);
    }
}
