//! Error types for backend operations.

use std::io;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors that can occur during backend operations.
#[derive(Debug, Error)]
pub enum BackendError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the store.
    #[error("read beyond end of backend: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current backend size.
        size: u64,
    },

    /// An in-memory backend ran into its configured capacity. Bytes up to
    /// the capacity were written.
    #[error("backend capacity of {capacity} bytes exhausted")]
    CapacityExhausted {
        /// The configured capacity.
        capacity: u64,
    },

    /// The stored bytes cannot be used.
    #[error("backend corrupted: {0}")]
    Corrupted(String),

    /// Another process holds the file lock.
    #[error("file is locked by another writer: {0}")]
    Locked(String),

    /// The backend was opened read-only.
    #[error("backend is read-only")]
    ReadOnly,
}
