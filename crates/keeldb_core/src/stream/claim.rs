//! Exclusive writer reservation held by a master storage.

use super::Stream;
use std::fmt;
use std::sync::atomic::Ordering;

/// Marks a master stream as written by exactly one storage.
///
/// While a claim lives, [`Stream::claim_writer`] fails and the stream
/// refuses to lend its authority. Dropping the claim frees the stream.
pub struct WriterClaim<E> {
    stream: Stream<E>,
}

impl<E> WriterClaim<E> {
    pub(super) fn new(stream: Stream<E>) -> Self {
        Self { stream }
    }

    /// The claimed stream.
    #[must_use]
    pub fn stream(&self) -> &Stream<E> {
        &self.stream
    }
}

impl<E> Drop for WriterClaim<E> {
    fn drop(&mut self) {
        self.stream.shared.writer.store(false, Ordering::SeqCst);
        tracing::debug!("stream writer claim released");
    }
}

impl<E> fmt::Debug for WriterClaim<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriterClaim").finish_non_exhaustive()
    }
}
