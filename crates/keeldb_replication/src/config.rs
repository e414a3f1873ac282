//! Server and replicator configuration.

use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for the log server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// How often an idle follow connection receives the current head.
    pub head_interval: Duration,
    /// Maximum number of lines sent in one body chunk.
    pub max_chunk_lines: usize,
}

impl ServerConfig {
    /// Creates a new server configuration.
    #[must_use]
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            head_interval: Duration::from_secs(1),
            max_chunk_lines: 256,
        }
    }

    /// Sets the idle head interval.
    #[must_use]
    pub fn with_head_interval(mut self, interval: Duration) -> Self {
        self.head_interval = interval;
        self
    }

    /// Sets the maximum lines per chunk. Zero is treated as one.
    #[must_use]
    pub fn with_max_chunk_lines(mut self, lines: usize) -> Self {
        self.max_chunk_lines = lines.max(1);
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(SocketAddr::from(([127, 0, 0, 1], 7070)))
    }
}

/// Configuration for a remote replicator.
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// Base URL of the master's log server (e.g. `http://10.0.0.1:7070`).
    pub base_url: String,
    /// Reconnect behaviour.
    pub retry: RetryConfig,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
}

impl ReplicatorConfig {
    /// Creates a replicator configuration for the given master.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            retry: RetryConfig::default(),
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Sets the retry configuration.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// URL of the log endpoint, following from `from`.
    #[must_use]
    pub fn log_url(&self, from: u64) -> String {
        format!(
            "{}/log?from={from}&follow=true",
            self.base_url.trim_end_matches('/')
        )
    }
}

/// Configuration for reconnect behaviour.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of consecutive failed attempts.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration allowing `max_attempts` consecutive failures.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Retries forever.
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(u32::MAX)
    }

    /// Gives up after the first failure.
    #[must_use]
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Returns true once `failures` consecutive failures exhaust the budget.
    #[must_use]
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }

    /// Delay before attempt `attempt` (0-indexed; the first attempt is immediate).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            // Up to 25% extra
            Duration::from_secs_f64(delay_secs + delay_secs * 0.25 * jitter())
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(10)
    }
}

fn jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
