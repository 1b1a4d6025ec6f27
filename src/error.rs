//! Error types for the risk-triage library.
//!
//! This module provides custom error types using `thiserror` for better error handling
//! and more specific error messages throughout the application.
//!
//! Errors split into two families that the workers treat differently:
//! validation failures are fatal and never retried, while I/O failures
//! (analyzer, storage, queue, notification) are transient and retried under
//! the bounded retry policy.

use thiserror::Error;

/// Errors that can occur in the risk-triage application.
#[derive(Error, Debug)]
pub enum TriageError {
    /// Malformed job payload or invalid input. Never retried.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid configuration. Never retried.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// External text-interpretation service failure
    #[error("Analyzer error: {0}")]
    Analyzer(String),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Connection pool errors
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Durable queue errors
    #[error("Queue error: {0}")]
    Queue(String),

    /// Notification dispatch failure
    #[error("Notification error: {0}")]
    Notification(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Binary serialization errors
    #[error("Binary serialization error: {0}")]
    Bincode(#[from] bincode::Error),

    /// General error with context
    #[error("{0}")]
    Other(String),
}

/// Convenience type alias for Result with TriageError
pub type Result<T> = std::result::Result<T, TriageError>;

impl TriageError {
    /// Whether a job that failed with this error should be retried.
    ///
    /// Validation and configuration errors are permanent; everything else is
    /// assumed to be a transient I/O fault.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::InvalidConfig(_))
    }
}

impl From<anyhow::Error> for TriageError {
    fn from(err: anyhow::Error) -> Self {
        TriageError::Other(err.to_string())
    }
}

impl From<sled::Error> for TriageError {
    fn from(err: sled::Error) -> Self {
        TriageError::Queue(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_transient() {
        assert!(!TriageError::Validation("bad payload".into()).is_transient());
        assert!(!TriageError::InvalidConfig("bad level".into()).is_transient());
    }

    #[test]
    fn io_errors_are_transient() {
        assert!(TriageError::Analyzer("timeout".into()).is_transient());
        assert!(TriageError::Queue("tree closed".into()).is_transient());
        assert!(TriageError::Notification("smtp refused".into()).is_transient());
    }
}
