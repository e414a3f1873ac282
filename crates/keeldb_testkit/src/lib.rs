//! # KeelDB Testkit
//!
//! Test utilities for KeelDB.
//!
//! This crate provides:
//! - A sample schema covering every container shape
//! - Storage and file-log helpers with deterministic clocks
//! - Property-based operation generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keeldb_testkit::prelude::*;
//!
//! #[test]
//! fn counts_records() {
//!     let storage = sample_master(1_000);
//!     storage.read_write(|txn| {
//!         txn.records.add(Record::new("one", 1));
//!         Ok(())
//!     }).wait();
//!     assert_eq!(snapshot(&storage).records.len(), 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
