//! Typed in-memory containers.
//!
//! A storage schema is a fixed list of named containers. Every container
//! mutates its in-memory state immediately and journals each change together
//! with the information needed to undo it. At commit the engine reads the
//! journaled changes and then forgets them; on rollback the container undoes
//! them in reverse order.
//!
//! Two container families exist:
//!
//! - [`Dictionary`]: a map from a key to an entry.
//! - [`Matrix`]: entries addressed by a `(row, col)` pair, with a shape
//!   ([`ManyToMany`], [`OneToMany`], [`OneToOne`]) deciding which side is
//!   unique.

mod dictionary;
mod index;
mod matrix;

pub use dictionary::Dictionary;
pub use index::{IndexKind, Key, KeyMap, Ordered, Unordered};
pub use matrix::{
    ColUnique, ManyToMany, ManyToManyMatrix, Matrix, OneToMany, OneToManyMatrix, OneToOne,
    OneToOneMatrix, Relation, RowUnique,
};

use crate::clock::{Micros, SharedClock};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt::{self, Debug};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// An entry stored in a [`Dictionary`].
pub trait DictEntry: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Key the entry is stored under.
    type Key: Key;

    /// Payload of a partial update. Use `()` when the entry has none.
    type Patch: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Returns the key of this entry.
    fn key(&self) -> Self::Key;

    /// Applies a partial update in place.
    fn apply_patch(&mut self, patch: &Self::Patch) {
        let _ = patch;
    }
}

/// An entry stored in a [`Matrix`].
pub trait MatrixEntry: Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Row key.
    type Row: Key;

    /// Column key.
    type Col: Key;

    /// Returns the row of this entry.
    fn row(&self) -> Self::Row;

    /// Returns the column of this entry.
    fn col(&self) -> Self::Col;
}

struct JournalInner {
    clock: SharedClock,
    seq: AtomicU64,
}

/// Clock and change sequence shared by every container of one storage.
///
/// The sequence orders changes across containers so that a transaction's
/// mutations are persisted in the order they were made.
#[derive(Clone)]
pub struct Journal {
    inner: Arc<JournalInner>,
}

impl Journal {
    /// Creates a journal stamping changes with `clock`.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            inner: Arc::new(JournalInner {
                clock,
                seq: AtomicU64::new(0),
            }),
        }
    }

    /// Samples the clock.
    #[must_use]
    pub fn now_us(&self) -> Micros {
        self.inner.clock.now_us()
    }

    /// Returns the next change sequence number.
    pub fn next_seq(&self) -> u64 {
        self.inner.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the clock.
    #[must_use]
    pub fn clock(&self) -> &SharedClock {
        &self.inner.clock
    }
}

impl Debug for Journal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Journal")
            .field("clock", &self.inner.clock)
            .field("seq", &self.inner.seq.load(Ordering::Relaxed))
            .finish()
    }
}

/// Behaviour shared by every container.
pub trait Container {
    /// Change record produced by this container.
    type Change;

    /// Name of the container within its schema.
    fn field_name(&self) -> &'static str;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Returns true if the container holds no entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Journaled changes, each paired with its sequence number.
    fn pending_changes(&self) -> Vec<(u64, Self::Change)>;

    /// Forgets journaled changes, making them permanent.
    fn commit(&mut self);

    /// Undoes every journaled change, most recent first.
    fn rollback(&mut self);

    /// Applies a logged change without journaling it.
    fn replay(&mut self, change: &Self::Change);
}
