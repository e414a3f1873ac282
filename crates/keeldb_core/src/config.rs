//! Log and storage configuration.

use crate::clock::{SharedClock, SystemClock};
use std::time::Duration;

/// Configuration for opening a persisted log.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Whether to flush the backend after every append.
    pub sync_on_append: bool,

    /// Signature written as the first line of fresh files and checked on reopen.
    pub signature: Option<String>,

    /// Whether to create missing parent directories.
    pub create_dirs: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            sync_on_append: true,
            signature: None,
            create_dirs: true,
        }
    }
}

impl LogConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to flush after every append.
    #[must_use]
    pub const fn sync_on_append(mut self, value: bool) -> Self {
        self.sync_on_append = value;
        self
    }

    /// Sets the signature line.
    #[must_use]
    pub fn signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    /// Sets whether to create missing parent directories.
    #[must_use]
    pub const fn create_dirs(mut self, value: bool) -> Self {
        self.create_dirs = value;
        self
    }
}

/// Configuration for a storage.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Clock used for transaction and mutation timestamps.
    pub clock: SharedClock,

    /// Upper bound on how long the replay thread sleeps between checks
    /// for new entries or a stop request.
    pub replay_poll_interval: Duration,

    /// Name given to the transaction worker thread.
    pub worker_name: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            clock: SystemClock::shared(),
            replay_poll_interval: Duration::from_millis(50),
            worker_name: "keeldb-txn".to_string(),
        }
    }
}

impl StorageConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the clock.
    #[must_use]
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Sets the replay poll interval.
    #[must_use]
    pub const fn replay_poll_interval(mut self, interval: Duration) -> Self {
        self.replay_poll_interval = interval;
        self
    }

    /// Sets the worker thread name.
    #[must_use]
    pub fn worker_name(mut self, name: impl Into<String>) -> Self {
        self.worker_name = name.into();
        self
    }
}
