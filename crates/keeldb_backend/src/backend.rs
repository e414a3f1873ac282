//! Backend trait definition.

use crate::error::BackendResult;

/// A low-level append-only byte store.
///
/// # Invariants
///
/// - `append` returns the offset where data was written
/// - `read_at` returns exactly the bytes previously written at that offset
/// - `flush` pushes appended data to the OS, `sync` makes it durable
/// - Bytes are never modified once appended
pub trait Backend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the range extends beyond the current size or
    /// an I/O error occurs.
    fn read_at(&self, offset: u64, len: usize) -> BackendResult<Vec<u8>>;

    /// Reads everything currently stored.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn read_all(&self) -> BackendResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size).map_err(|_| {
            crate::BackendError::Corrupted(format!("backend of {size} bytes does not fit in memory"))
        })?;
        self.read_at(0, len)
    }

    /// Appends data to the end of the store and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> BackendResult<u64>;

    /// Flushes pending writes to the OS.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush operation fails.
    fn flush(&mut self) -> BackendResult<()>;

    /// Syncs data and metadata to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync operation fails.
    fn sync(&mut self) -> BackendResult<()>;

    /// Returns the current size in bytes; the offset of the next append.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> BackendResult<u64>;
}

/// Fails with `ReadPastEnd` unless `len` bytes at `offset` lie within `size`.
pub(crate) fn check_range(offset: u64, len: usize, size: u64) -> BackendResult<()> {
    let end = u64::try_from(len)
        .ok()
        .and_then(|len| offset.checked_add(len));
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(crate::BackendError::ReadPastEnd { offset, len, size }),
    }
}
