//! Injectable microsecond clocks.
//!
//! Every timestamp the engine produces (transaction begin/end, per-mutation
//! `us`, stream entry `us`) comes from a [`Clock`]. Production code uses
//! [`SystemClock`]; tests drive time with [`StepClock`].

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since the Unix epoch.
pub type Micros = u64;

/// A source of microsecond timestamps.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current time in microseconds.
    fn now_us(&self) -> Micros;
}

/// Shared clock handle.
pub type SharedClock = Arc<dyn Clock>;

/// Wall clock that never returns the same value twice.
///
/// Two calls within the same microsecond yield strictly increasing values,
/// so log timestamps stay ordered even under bursts of commits.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: Mutex<Micros>,
}

impl SystemClock {
    /// Creates a new system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a shared system clock.
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(Self::new())
    }
}

impl Clock for SystemClock {
    fn now_us(&self) -> Micros {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_micros()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        let mut last = self.last.lock();
        let now = wall.max(last.saturating_add(1));
        *last = now;
        now
    }
}

/// Deterministic clock for tests.
///
/// Returns `start`, `start + step`, `start + 2 * step`, ... on successive
/// calls. [`StepClock::set`] jumps to an arbitrary value.
#[derive(Debug)]
pub struct StepClock {
    next: Mutex<Micros>,
    step: Micros,
}

impl StepClock {
    /// Creates a clock starting at `start` advancing by `step` per call.
    #[must_use]
    pub fn new(start: Micros, step: Micros) -> Self {
        Self {
            next: Mutex::new(start),
            step,
        }
    }

    /// Creates a shared step clock.
    #[must_use]
    pub fn shared(start: Micros, step: Micros) -> Arc<Self> {
        Arc::new(Self::new(start, step))
    }

    /// Sets the value returned by the next call.
    pub fn set(&self, next: Micros) {
        *self.next.lock() = next;
    }

    /// Returns the value the next call will produce, without advancing.
    #[must_use]
    pub fn peek(&self) -> Micros {
        *self.next.lock()
    }
}

impl Clock for StepClock {
    fn now_us(&self) -> Micros {
        let mut next = self.next.lock();
        let now = *next;
        *next = now.saturating_add(self.step);
        now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_strictly_increases() {
        let clock = SystemClock::new();
        let mut prev = clock.now_us();
        for _ in 0..1000 {
            let now = clock.now_us();
            assert!(now > prev);
            prev = now;
        }
    }

    #[test]
    fn step_clock_sequence() {
        let clock = StepClock::new(1000, 1);
        assert_eq!(clock.now_us(), 1000);
        assert_eq!(clock.now_us(), 1001);
        clock.set(5000);
        assert_eq!(clock.peek(), 5000);
        assert_eq!(clock.now_us(), 5000);
        assert_eq!(clock.now_us(), 5001);
    }
}
