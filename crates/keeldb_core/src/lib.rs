//! # KeelDB Core
//!
//! Embedded transactional store with replicated, append-only persistence.
//!
//! This crate provides:
//! - Typed containers: dictionaries and one/many-sided matrices
//! - A transaction engine with rollback, meta fields and futures
//! - A line-oriented JSON log over any `keeldb_backend` backend
//! - Streams with single-writer authority, subscriptions and mirroring
//!
//! ## Example
//!
//! ```rust,ignore
//! let storage: Storage<Inventory> = Storage::in_memory_master(StorageConfig::default())?;
//! storage
//!     .read_write(|txn| {
//!         txn.items.add(Item::new("bolt", 12));
//!         txn.set_meta_field("user", "alice");
//!         Ok(())
//!     })
//!     .wait();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod clock;
pub mod config;
pub mod container;
pub mod error;
pub mod log;
pub mod mutation;
pub mod storage;
pub mod stream;
pub mod types;

pub use clock::{Clock, Micros, SharedClock, StepClock, SystemClock};
pub use config::{LogConfig, StorageConfig};
pub use container::{
    Container, DictEntry, Dictionary, IndexKind, Journal, ManyToMany, ManyToManyMatrix, Matrix,
    MatrixEntry, OneToMany, OneToManyMatrix, OneToOne, OneToOneMatrix, Ordered, Relation,
    Unordered,
};
pub use error::{BoxError, CoreError, CoreResult};
pub use log::Log;
pub use mutation::{
    Deleted, DictChange, LogEntry, MatrixChange, MutationRecord, Patched, Transaction,
    TransactionEntry, TransactionMeta, Updated,
};
pub use storage::{
    Abort, ChangeSet, ReadOnly, ReadWrite, Schema, Storage, TransactionFuture, TransactionOutcome,
};
pub use stream::{
    Publisher, Stream, StreamEvent, StreamHead, StreamMirror, Subscription, WriterClaim,
};
pub use types::{IndexAndTimestamp, Role};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
