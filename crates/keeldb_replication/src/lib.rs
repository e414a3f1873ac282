//! # KeelDB Replication
//!
//! Streams a KeelDB log over HTTP and follows a remote master.
//!
//! This crate provides:
//! - [`LogServer`]: an axum router exposing a stream's raw log lines
//! - [`Replicator`]: a tokio task copying a remote log into a local
//!   [`Publisher`](keeldb_core::Publisher)
//! - Retry with exponential backoff for dropped connections
//!
//! # Protocol
//!
//! `GET /log?from=<index>&follow=<bool>` answers with a chunked body of log
//! lines, exactly as persisted by the master, starting at entry `from`. With
//! `follow=true` the response never ends: new entries are sent as they are
//! appended, and head moves without entries are sent as `#head\t<us>` lines.
//! Idle connections receive the current head again every
//! [`ServerConfig::head_interval`].
//!
//! `GET /status` answers `{"size":..,"head":..,"master":..}`.
//!
//! # Example
//!
//! ```rust,ignore
//! // master process
//! let server = LogServer::bind(master_stream.clone(), ServerConfig::default()).await?;
//!
//! // follower process
//! let publisher = follower_stream.become_following()?;
//! let replicator = Replicator::start(publisher, ReplicatorConfig::new(format!("http://{}", addr)))?;
//! // ... later, to promote the follower:
//! let publisher = replicator.stop().await?;
//! drop(publisher);
//! follower_storage.flip_to_master()?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
// Production code MUST NOT use panic!/unwrap()/expect()
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod error;
mod replicator;
mod server;

pub use config::{ReplicatorConfig, RetryConfig, ServerConfig};
pub use error::{ReplicationError, ReplicationResult};
pub use replicator::{Replicator, ReplicatorState};
pub use server::{router, LogServer, StatusResponse};
