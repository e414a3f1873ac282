//! # KeelDB Backend
//!
//! Append-only byte backends underneath KeelDB logs.
//!
//! Backends are **opaque byte stores**: they never interpret what they hold.
//! The log format (one JSON record per line) belongs to `keeldb_core`.
//!
//! ## Design Principles
//!
//! - Backends only read, append and flush; nothing is rewritten in place
//! - Must be `Send + Sync` so a log can move between threads
//! - File backends hold an advisory lock so two writers never share a file
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For tests and ephemeral storages, with a
//!   capacity limit for simulating full disks
//! - [`FileBackend`] - For persistent logs using OS file APIs
//!
//! ## Example
//!
//! ```rust
//! use keeldb_backend::{Backend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world\n").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::Backend;
pub use error::{BackendError, BackendResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
