//! Process-memory backend for tests and ephemeral logs.

use crate::backend::{check_range, Backend};
use crate::error::{BackendError, BackendResult};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
struct Buffer {
    bytes: Vec<u8>,
    capacity: Option<u64>,
    syncs: u64,
}

/// A byte store kept in process memory.
///
/// Clones share one buffer: a test can keep a handle while a log owns
/// another, inspect what was written, then reopen a log over the same bytes.
///
/// A capacity makes the backend behave like a disk that fills up. An append
/// crossing it writes the bytes that still fit, then fails with
/// [`BackendError::CapacityExhausted`], leaving a torn last line behind.
///
/// # Example
///
/// ```rust
/// use keeldb_backend::{Backend, InMemoryBackend};
///
/// let handle = InMemoryBackend::new().with_capacity(8);
/// let mut backend = handle.clone();
/// assert_eq!(backend.append(b"one\n").unwrap(), 0);
/// assert!(backend.append(b"three\n").is_err());
/// assert_eq!(handle.bytes(), b"one\nthre");
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryBackend {
    buffer: Arc<RwLock<Buffer>>,
}

impl InMemoryBackend {
    /// Creates an empty backend without a capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend already holding `bytes`, as if a log had been
    /// written to it before.
    #[must_use]
    pub fn with_data(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            buffer: Arc::new(RwLock::new(Buffer {
                bytes: bytes.into(),
                ..Buffer::default()
            })),
        }
    }

    /// Limits the total size to `capacity` bytes.
    #[must_use]
    pub fn with_capacity(self, capacity: u64) -> Self {
        self.set_capacity(Some(capacity));
        self
    }

    /// Changes the capacity of every handle sharing this buffer. `None`
    /// removes the limit.
    pub fn set_capacity(&self, capacity: Option<u64>) {
        self.buffer.write().capacity = capacity;
    }

    /// Copy of the stored bytes.
    #[must_use]
    pub fn bytes(&self) -> Vec<u8> {
        self.buffer.read().bytes.clone()
    }

    /// Stored bytes as text, with invalid UTF-8 replaced.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.buffer.read().bytes).into_owned()
    }

    /// Number of completed `sync` calls.
    #[must_use]
    pub fn sync_count(&self) -> u64 {
        self.buffer.read().syncs
    }
}

impl Backend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> BackendResult<Vec<u8>> {
        let buffer = self.buffer.read();
        check_range(offset, len, buffer.bytes.len() as u64)?;
        // Checked above, so the range fits in memory.
        let start = offset as usize;
        Ok(buffer.bytes[start..start + len].to_vec())
    }

    fn append(&mut self, data: &[u8]) -> BackendResult<u64> {
        let mut buffer = self.buffer.write();
        let offset = buffer.bytes.len() as u64;
        match buffer.capacity {
            Some(capacity) if offset.saturating_add(data.len() as u64) > capacity => {
                let room = usize::try_from(capacity.saturating_sub(offset)).unwrap_or(data.len());
                buffer.bytes.extend_from_slice(&data[..room.min(data.len())]);
                Err(BackendError::CapacityExhausted { capacity })
            }
            _ => {
                buffer.bytes.extend_from_slice(data);
                Ok(offset)
            }
        }
    }

    fn flush(&mut self) -> BackendResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> BackendResult<()> {
        self.buffer.write().syncs += 1;
        Ok(())
    }

    fn size(&self) -> BackendResult<u64> {
        Ok(self.buffer.read().bytes.len() as u64)
    }
}
