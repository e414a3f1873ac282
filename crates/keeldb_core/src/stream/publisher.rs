//! Borrowed write authority.

use super::Stream;
use crate::clock::Micros;
use crate::error::CoreResult;
use crate::mutation::LogEntry;
use crate::types::IndexAndTimestamp;
use std::fmt;

/// Write authority lent out of a [`Stream`].
///
/// Only one publisher exists per stream at a time, and it cannot be cloned.
/// Dropping it returns the authority; the stream is then following but free
/// to become master again.
pub struct Publisher<E> {
    stream: Stream<E>,
}

impl<E: LogEntry> Publisher<E> {
    pub(super) fn new(stream: Stream<E>) -> Self {
        Self { stream }
    }

    /// Appends an entry stamped with the stream clock, never below the head.
    ///
    /// # Errors
    ///
    /// Returns any log append error.
    pub fn publish(&self, entry: E) -> CoreResult<IndexAndTimestamp> {
        self.stream.shared.append_now(entry)
    }

    /// Appends an entry stamped `us`.
    ///
    /// # Errors
    ///
    /// Returns any log append error.
    pub fn publish_at(&self, entry: E, us: Micros) -> CoreResult<IndexAndTimestamp> {
        self.stream.shared.append(entry, us)
    }

    /// Appends a line copied from another log, byte for byte.
    ///
    /// # Errors
    ///
    /// Returns `MalformedLog`, `IndexMismatch`, `TimestampRegression` or any
    /// write error.
    pub fn publish_raw(&self, raw: &str) -> CoreResult<IndexAndTimestamp> {
        self.stream.shared.append_raw(raw)
    }

    /// Advances the in-memory head of the stream. Nothing is appended.
    pub fn update_head(&self, us: Micros) {
        self.stream.shared.update_head(us);
    }

    /// Number of entries in the stream.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.stream.size()
    }

    /// Head of the stream.
    #[must_use]
    pub fn head(&self) -> Micros {
        self.stream.head()
    }

    /// The stream this publisher writes to.
    #[must_use]
    pub fn stream(&self) -> &Stream<E> {
        &self.stream
    }
}

impl<E> Drop for Publisher<E> {
    fn drop(&mut self) {
        self.stream.shared.release_publisher();
    }
}

impl<E> fmt::Debug for Publisher<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Publisher").finish_non_exhaustive()
    }
}
