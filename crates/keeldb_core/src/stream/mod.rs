//! Publish/subscribe wrapper around a [`Log`] with single-writer authority.
//!
//! A [`Stream`] is either master, accepting local appends, or following.
//! [`Stream::become_following`] moves the authority out into a [`Publisher`];
//! while the publisher lives the stream rejects local appends and cannot be
//! made master again. Dropping the publisher returns the authority in the
//! following state, from which [`Stream::become_master`] succeeds.
//!
//! A master storage additionally holds a [`WriterClaim`], so at most one
//! storage writes to a stream at a time.
//!
//! Readers either pull entries with [`Stream::iter_from`], block on a
//! [`Subscription`], or await head changes through [`Stream::watch_head`].

mod claim;
mod mirror;
mod publisher;
mod subscription;

pub use claim::WriterClaim;
pub use mirror::StreamMirror;
pub use publisher::Publisher;
pub use subscription::{StreamEvent, Subscription};

use crate::clock::{Micros, SharedClock, SystemClock};
use crate::error::{CoreError, CoreResult};
use crate::log::Log;
use crate::mutation::LogEntry;
use crate::types::IndexAndTimestamp;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// Size and head of a stream, as published to watchers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamHead {
    /// Number of entries.
    pub size: u64,
    /// Current head timestamp.
    pub head: Micros,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Authority {
    Master,
    Following { lent: bool },
}

pub(crate) struct Shared<E> {
    log: Mutex<Log<E>>,
    changed: Condvar,
    authority: Mutex<Authority>,
    writer: AtomicBool,
    head_tx: watch::Sender<StreamHead>,
    clock: SharedClock,
}

/// A shared, cloneable handle to a log and its write authority.
pub struct Stream<E> {
    shared: Arc<Shared<E>>,
}

impl<E> Clone for Stream<E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<E: LogEntry> Stream<E> {
    /// Creates a master stream over `log`, stamping entries with the system clock.
    #[must_use]
    pub fn new(log: Log<E>) -> Self {
        Self::with_clock(log, SystemClock::shared())
    }

    /// Creates a master stream over `log` using `clock`.
    #[must_use]
    pub fn with_clock(log: Log<E>, clock: SharedClock) -> Self {
        let (head_tx, _) = watch::channel(StreamHead {
            size: log.size(),
            head: log.head(),
        });
        Self {
            shared: Arc::new(Shared {
                log: Mutex::new(log),
                changed: Condvar::new(),
                authority: Mutex::new(Authority::Master),
                writer: AtomicBool::new(false),
                head_tx,
                clock,
            }),
        }
    }

    /// Creates a master stream over an empty in-memory log.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Log::in_memory())
    }

    /// Returns true if local appends are accepted.
    #[must_use]
    pub fn is_master(&self) -> bool {
        *self.shared.authority.lock() == Authority::Master
    }

    /// Returns true while a [`Publisher`] holds the authority.
    #[must_use]
    pub fn is_publisher_lent(&self) -> bool {
        *self.shared.authority.lock() == Authority::Following { lent: true }
    }

    /// Reserves the stream for a single writing storage.
    ///
    /// # Errors
    ///
    /// Returns `NotMasterStream` when the stream is following, or
    /// `WriterClaimed` while another claim is alive.
    pub fn claim_writer(&self) -> CoreResult<WriterClaim<E>> {
        let authority = self.shared.authority.lock();
        if *authority != Authority::Master {
            return Err(CoreError::NotMasterStream);
        }
        if self
            .shared
            .writer
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(CoreError::WriterClaimed);
        }
        drop(authority);
        tracing::debug!("stream writer claimed");
        Ok(WriterClaim::new(self.clone()))
    }

    /// Appends an entry stamped with the stream clock.
    ///
    /// The timestamp is never below the current head.
    ///
    /// # Errors
    ///
    /// Returns `NotMasterStream` when the stream is following, or any log
    /// append error.
    pub fn publish(&self, entry: E) -> CoreResult<IndexAndTimestamp> {
        let authority = self.shared.authority.lock();
        if *authority != Authority::Master {
            return Err(CoreError::NotMasterStream);
        }
        let position = self.shared.append_now(entry);
        drop(authority);
        position
    }

    /// Appends an entry stamped `us`.
    ///
    /// # Errors
    ///
    /// Returns `NotMasterStream` when the stream is following, or any log
    /// append error.
    pub fn publish_at(&self, entry: E, us: Micros) -> CoreResult<IndexAndTimestamp> {
        let authority = self.shared.authority.lock();
        if *authority != Authority::Master {
            return Err(CoreError::NotMasterStream);
        }
        let mut log = self.shared.log.lock();
        self.shared.append_locked(&mut log, entry, us)
    }

    /// Advances the head without appending.
    ///
    /// Only the in-memory head moves. After the log is reopened the head
    /// is the last entry's timestamp again.
    ///
    /// # Errors
    ///
    /// Returns `NotMasterStream` when the stream is following.
    pub fn update_head(&self, us: Micros) -> CoreResult<()> {
        let authority = self.shared.authority.lock();
        if *authority != Authority::Master {
            return Err(CoreError::NotMasterStream);
        }
        self.shared.update_head(us);
        Ok(())
    }

    /// Lends the write authority to the returned [`Publisher`].
    ///
    /// # Errors
    ///
    /// Returns `AuthorityUnavailable` if the stream is not master, and
    /// `WriterClaimed` while a master storage writes to it.
    pub fn become_following(&self) -> CoreResult<Publisher<E>> {
        let mut authority = self.shared.authority.lock();
        if *authority != Authority::Master {
            return Err(CoreError::AuthorityUnavailable);
        }
        if self.is_writer_claimed() {
            return Err(CoreError::WriterClaimed);
        }
        *authority = Authority::Following { lent: true };
        tracing::info!("stream authority lent to publisher");
        Ok(Publisher::new(self.clone()))
    }

    /// Takes the write authority back.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyMasterStream` if the stream is master, or
    /// `PublisherStillBorrowed` while a [`Publisher`] is alive.
    pub fn become_master(&self) -> CoreResult<()> {
        let mut authority = self.shared.authority.lock();
        match *authority {
            Authority::Master => Err(CoreError::AlreadyMasterStream),
            Authority::Following { lent: true } => Err(CoreError::PublisherStillBorrowed),
            Authority::Following { lent: false } => {
                *authority = Authority::Master;
                tracing::info!("stream became master");
                Ok(())
            }
        }
    }

    /// Number of entries.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.shared.log.lock().size()
    }

    /// Current head timestamp: the later of the last entry's timestamp and
    /// any head update made since the log was opened.
    #[must_use]
    pub fn head(&self) -> Micros {
        self.shared.log.lock().head()
    }

    /// Size and head, read together.
    #[must_use]
    pub fn status(&self) -> StreamHead {
        let log = self.shared.log.lock();
        StreamHead {
            size: log.size(),
            head: log.head(),
        }
    }

    /// Returns the entry at `index`.
    #[must_use]
    pub fn get(&self, index: u64) -> Option<(IndexAndTimestamp, Arc<E>)> {
        self.shared.log.lock().get(index)
    }

    /// Returns the persisted line of the entry at `index`.
    ///
    /// # Errors
    ///
    /// Returns an error if the log backend cannot be read.
    pub fn raw_line(&self, index: u64) -> CoreResult<Option<String>> {
        self.shared.log.lock().raw_line(index)
    }

    /// Lazily iterates over entries from `from`, including ones appended
    /// while iterating.
    #[must_use]
    pub fn iter_from(&self, from: u64) -> StreamIter<E> {
        StreamIter {
            stream: self.clone(),
            next: from,
        }
    }

    /// Creates a blocking subscription starting at `from`.
    #[must_use]
    pub fn subscribe(&self, from: u64) -> Subscription<E> {
        Subscription::new(self.clone(), from)
    }

    /// Receiver notified on every append and head update.
    #[must_use]
    pub fn watch_head(&self) -> watch::Receiver<StreamHead> {
        self.shared.head_tx.subscribe()
    }

    /// Clock used by [`Stream::publish`].
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.shared.clock
    }
}

impl<E: LogEntry> Shared<E> {
    fn append_locked(
        &self,
        log: &mut Log<E>,
        entry: E,
        us: Micros,
    ) -> CoreResult<IndexAndTimestamp> {
        let position = log.append(entry, us)?;
        self.notify(log);
        Ok(position)
    }

    pub(crate) fn append(&self, entry: E, us: Micros) -> CoreResult<IndexAndTimestamp> {
        let mut log = self.log.lock();
        self.append_locked(&mut log, entry, us)
    }

    pub(crate) fn append_raw(&self, raw: &str) -> CoreResult<IndexAndTimestamp> {
        let mut log = self.log.lock();
        let position = log.append_raw(raw)?;
        self.notify(&log);
        Ok(position)
    }

    pub(crate) fn update_head(&self, us: Micros) {
        let mut log = self.log.lock();
        if us > log.head() {
            log.update_head(us);
            self.notify(&log);
        }
    }

    pub(crate) fn append_now(&self, entry: E) -> CoreResult<IndexAndTimestamp> {
        let mut log = self.log.lock();
        let us = self.clock.now_us().max(log.head());
        self.append_locked(&mut log, entry, us)
    }

    fn notify(&self, log: &Log<E>) {
        self.head_tx.send_replace(StreamHead {
            size: log.size(),
            head: log.head(),
        });
        self.changed.notify_all();
    }
}

impl<E> Stream<E> {
    /// Returns true while a storage holds the [`WriterClaim`].
    #[must_use]
    pub fn is_writer_claimed(&self) -> bool {
        self.shared.writer.load(Ordering::SeqCst)
    }

    /// Wakes every blocked subscriber so it can notice a stop request.
    pub fn wake_subscribers(&self) {
        let _log = self.shared.log.lock();
        self.shared.changed.notify_all();
    }
}

impl<E> Shared<E> {
    pub(crate) fn release_publisher(&self) {
        let mut authority = self.authority.lock();
        if *authority == (Authority::Following { lent: true }) {
            *authority = Authority::Following { lent: false };
            tracing::info!("stream publisher returned");
        }
    }
}

impl<E> fmt::Debug for Stream<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("authority", &*self.shared.authority.lock())
            .field("writer_claimed", &self.is_writer_claimed())
            .field("head", &*self.shared.head_tx.borrow())
            .finish_non_exhaustive()
    }
}

/// Lazy, restartable iterator over a stream's entries.
///
/// Each step reads one entry under the log lock; entries appended while
/// iterating are picked up.
pub struct StreamIter<E> {
    stream: Stream<E>,
    next: u64,
}

impl<E: LogEntry> Iterator for StreamIter<E> {
    type Item = (IndexAndTimestamp, Arc<E>);

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.stream.get(self.next)?;
        self.next += 1;
        Some(item)
    }
}
