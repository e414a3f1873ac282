//! Mutation and transaction records.
//!
//! These are the durable representation of "what changed". A storage's own
//! mutation type is an enum declared next to its schema, one variant per
//! container and change kind, wrapping the generic payloads defined here:
//!
//! ```rust,ignore
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! enum Mutation {
//!     RecordUpdated(Updated<Record>),
//!     RecordDeleted(Deleted<String>),
//! }
//! ```
//!
//! With serde's default external tagging this persists as
//! `{"RecordUpdated":{"us":100,"data":{...}}}`.

use crate::clock::Micros;
use crate::container::{DictEntry, MatrixEntry};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// A key now maps to `data`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Updated<E> {
    /// Time of the change.
    pub us: Micros,
    /// The new value.
    pub data: E,
}

/// A key was removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deleted<K> {
    /// Time of the change.
    pub us: Micros,
    /// The removed key.
    pub key: K,
}

/// A partial update was applied to the value under `key`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patched<K, P> {
    /// Time of the change.
    pub us: Micros,
    /// The patched key.
    pub key: K,
    /// The patch payload.
    pub patch: P,
}

/// A change made to a dictionary.
#[derive(Debug, Clone, PartialEq)]
pub enum DictChange<E: DictEntry> {
    /// Entry added or overwritten.
    Updated(Updated<E>),
    /// Entry erased.
    Deleted(Deleted<E::Key>),
    /// Entry patched in place.
    Patched(Patched<E::Key, E::Patch>),
}

impl<E: DictEntry> DictChange<E> {
    /// Returns the timestamp of the change.
    #[must_use]
    pub fn us(&self) -> Micros {
        match self {
            Self::Updated(u) => u.us,
            Self::Deleted(d) => d.us,
            Self::Patched(p) => p.us,
        }
    }
}

/// A change made to a matrix. Keys are `(row, col)` pairs.
#[derive(Debug, Clone, PartialEq)]
pub enum MatrixChange<E: MatrixEntry> {
    /// Entry added or overwritten.
    Updated(Updated<E>),
    /// Entry erased, explicitly or by uniqueness enforcement.
    Deleted(Deleted<(E::Row, E::Col)>),
}

impl<E: MatrixEntry> MatrixChange<E> {
    /// Returns the timestamp of the change.
    #[must_use]
    pub fn us(&self) -> Micros {
        match self {
            Self::Updated(u) => u.us,
            Self::Deleted(d) => d.us,
        }
    }
}

/// Timing and free-form metadata of a transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionMeta {
    /// Sampled when the commit lock was acquired.
    pub begin_us: Micros,
    /// Sampled when the mutations were finalized.
    pub end_us: Micros,
    /// Meta fields present at commit time.
    pub fields: BTreeMap<String, String>,
}

/// An atomic batch of mutations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction<M> {
    /// Timing and meta fields.
    pub meta: TransactionMeta,
    /// Mutations in the order they were made.
    pub mutations: Vec<M>,
}

impl<M> Transaction<M> {
    /// Returns true if the transaction carries no mutations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Anything that can be stored in a log.
pub trait LogEntry: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> LogEntry for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Bounds required of a storage mutation type.
pub trait MutationRecord: LogEntry + Clone + Debug {}

impl<T> MutationRecord for T where T: LogEntry + Clone + Debug {}

/// A stream entry that may carry a storage transaction.
///
/// Plain storages log `Transaction<M>` directly. Streams shared with
/// out-of-band publishers use a tagged union implementing this trait, and
/// entries that are not transactions still consume an index.
pub trait TransactionEntry<M>: LogEntry {
    /// Wraps a committed transaction.
    fn from_transaction(transaction: Transaction<M>) -> Self;

    /// Returns the transaction carried by this entry, if any.
    fn as_transaction(&self) -> Option<&Transaction<M>>;
}

impl<M: LogEntry> TransactionEntry<M> for Transaction<M> {
    fn from_transaction(transaction: Transaction<M>) -> Self {
        transaction
    }

    fn as_transaction(&self) -> Option<&Transaction<M>> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Record {
        name: String,
        value: i64,
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Mutation {
        RecordUpdated(Updated<Record>),
        RecordDeleted(Deleted<String>),
    }

    #[test]
    fn transaction_json_layout() {
        let transaction = Transaction {
            meta: TransactionMeta {
                begin_us: 100,
                end_us: 101,
                fields: BTreeMap::new(),
            },
            mutations: vec![Mutation::RecordUpdated(Updated {
                us: 100,
                data: Record {
                    name: "one".into(),
                    value: 1,
                },
            })],
        };

        let json = serde_json::to_string(&transaction).unwrap();
        assert_eq!(
            json,
            r#"{"meta":{"begin_us":100,"end_us":101,"fields":{}},"mutations":[{"RecordUpdated":{"us":100,"data":{"name":"one","value":1}}}]}"#
        );
        let back: Transaction<Mutation> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, transaction);
    }

    #[test]
    fn deleted_json_layout() {
        let m = Mutation::RecordDeleted(Deleted {
            us: 7,
            key: "one".into(),
        });
        assert_eq!(
            serde_json::to_string(&m).unwrap(),
            r#"{"RecordDeleted":{"us":7,"key":"one"}}"#
        );
    }

    #[test]
    fn plain_transaction_is_its_own_entry() {
        let transaction: Transaction<Mutation> = Transaction {
            meta: TransactionMeta::default(),
            mutations: vec![],
        };
        assert!(transaction.is_empty());
        let entry = Transaction::from_transaction(transaction.clone());
        assert_eq!(entry.as_transaction(), Some(&transaction));
    }
}
