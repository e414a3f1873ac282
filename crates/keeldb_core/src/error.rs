//! Error types for KeelDB core.

use crate::clock::Micros;
use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Boxed error raised by user code inside a transaction body.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in KeelDB core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Backend error.
    #[error("backend error: {0}")]
    Backend(#[from] keeldb_backend::BackendError),

    /// JSON encoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A persisted log line cannot be parsed or does not follow its predecessor.
    #[error("malformed log at line {line}: {message}")]
    MalformedLog {
        /// 1-based line number in the log file.
        line: usize,
        /// Description of the problem.
        message: String,
    },

    /// The log signature does not match the expected one.
    #[error("log signature mismatch: expected {expected:?}, found {found:?}")]
    SignatureMismatch {
        /// Signature requested by configuration.
        expected: String,
        /// Signature found in the file.
        found: String,
    },

    /// An append would move the log head backwards.
    #[error("timestamp regression: head is at {head}, got {us}")]
    TimestampRegression {
        /// Current head of the log.
        head: Micros,
        /// Rejected timestamp.
        us: Micros,
    },

    /// A replicated entry does not carry the next dense index.
    #[error("index mismatch: expected {expected}, got {actual}")]
    IndexMismatch {
        /// Index the log expects next.
        expected: u64,
        /// Index found in the entry.
        actual: u64,
    },

    /// A previous write failed; the log refuses further appends.
    #[error("log is poisoned after a failed write")]
    LogPoisoned,

    /// Read-write transaction submitted to a follower storage.
    #[error("write attempted on a follower storage")]
    WriteOnFollower,

    /// `flip_to_master` called on a master storage.
    #[error("storage is already master")]
    AlreadyMaster,

    /// `become_master` called on a master stream.
    #[error("stream is already master")]
    AlreadyMasterStream,

    /// The stream's publisher is lent to a replicator.
    #[error("stream publisher is still borrowed")]
    PublisherStillBorrowed,

    /// Another storage already writes to the stream.
    #[error("stream already has a writing storage")]
    WriterClaimed,

    /// Local append attempted while the stream is not master.
    #[error("stream is not master, local appends are rejected")]
    NotMasterStream,

    /// `become_following` called while the stream has no authority to lend.
    #[error("stream authority is not available to lend")]
    AuthorityUnavailable,

    /// Transaction submitted after graceful shutdown.
    #[error("storage is shutting down")]
    ShutDown,

    /// Error raised by a transaction body.
    #[error("transaction failed: {0}")]
    Domain(BoxError),

    /// A transaction body panicked.
    #[error("transaction panicked: {0}")]
    Panicked(String),

    /// Invalid operation in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },
}

impl CoreError {
    /// Creates a malformed log error.
    pub fn malformed_log(line: usize, message: impl Into<String>) -> Self {
        Self::MalformedLog {
            line,
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Returns true for failures caused by the master/follower protocol.
    #[must_use]
    pub fn is_role_violation(&self) -> bool {
        matches!(
            self,
            Self::WriteOnFollower
                | Self::AlreadyMaster
                | Self::AlreadyMasterStream
                | Self::PublisherStillBorrowed
                | Self::WriterClaimed
                | Self::NotMasterStream
                | Self::AuthorityUnavailable
        )
    }

    /// Returns true for failures that make a log unusable.
    #[must_use]
    pub fn is_persistence_failure(&self) -> bool {
        matches!(
            self,
            Self::Backend(_)
                | Self::Io(_)
                | Self::MalformedLog { .. }
                | Self::SignatureMismatch { .. }
                | Self::LogPoisoned
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_classification() {
        assert!(CoreError::WriteOnFollower.is_role_violation());
        assert!(CoreError::PublisherStillBorrowed.is_role_violation());
        assert!(CoreError::WriterClaimed.is_role_violation());
        assert!(!CoreError::ShutDown.is_role_violation());
        assert!(CoreError::LogPoisoned.is_persistence_failure());
        assert!(CoreError::malformed_log(3, "bad").is_persistence_failure());
    }

    #[test]
    fn error_display() {
        let err = CoreError::TimestampRegression { head: 10, us: 5 };
        let msg = err.to_string();
        assert!(msg.contains("10"));
        assert!(msg.contains('5'));
        assert_eq!(
            CoreError::malformed_log(2, "missing tab").to_string(),
            "malformed log at line 2: missing tab"
        );
    }
}
