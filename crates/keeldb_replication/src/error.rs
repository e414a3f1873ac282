//! Error types for replication.

use keeldb_core::CoreError;
use thiserror::Error;

/// Result type for replication operations.
pub type ReplicationResult<T> = Result<T, ReplicationError>;

/// Errors that can occur while serving or following a log.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// HTTP client error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The master answered with a non-success status.
    #[error("master answered with status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// The master closed the log stream.
    #[error("log stream closed by master")]
    Disconnected,

    /// A received chunk is not a valid log line.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local stream error.
    #[error("stream error: {0}")]
    Core(#[from] CoreError),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Every reconnect attempt failed.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Last error seen.
        last: String,
    },

    /// A background task panicked or was cancelled.
    #[error("task error: {0}")]
    Task(String),
}

impl ReplicationError {
    /// Creates a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns true if reconnecting may succeed.
    ///
    /// Only connection-level failures are retried. Anything the local log
    /// rejects stops the replicator.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReplicationError::Http(e) => !e.is_builder(),
            ReplicationError::Status { status } => *status >= 500,
            ReplicationError::Disconnected | ReplicationError::Io(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(ReplicationError::Disconnected.is_retryable());
        assert!(ReplicationError::Status { status: 503 }.is_retryable());
        assert!(!ReplicationError::Status { status: 400 }.is_retryable());
        assert!(!ReplicationError::protocol("bad line").is_retryable());
        assert!(!ReplicationError::Core(CoreError::IndexMismatch {
            expected: 1,
            actual: 3
        })
        .is_retryable());
    }

    #[test]
    fn error_display() {
        let err = ReplicationError::RetriesExhausted {
            attempts: 4,
            last: "connection refused".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains('4'));
        assert!(msg.contains("connection refused"));
    }
}
