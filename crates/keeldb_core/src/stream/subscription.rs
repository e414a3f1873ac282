//! Blocking subscriptions.

use super::Stream;
use crate::clock::Micros;
use crate::mutation::LogEntry;
use crate::types::IndexAndTimestamp;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Something a subscriber observes.
#[derive(Debug)]
pub enum StreamEvent<E> {
    /// The next entry, in index order.
    Entry(IndexAndTimestamp, Arc<E>),
    /// The head moved past the last delivered entry without a new entry.
    Head(Micros),
}

/// Cursor over a stream that blocks until something new happens.
///
/// Entries are delivered in strictly increasing index order. Once every
/// entry has been delivered, a head update is delivered as [`StreamEvent::Head`].
#[derive(Debug)]
pub struct Subscription<E> {
    stream: Stream<E>,
    next: u64,
    seen_head: Micros,
}

impl<E: LogEntry> Subscription<E> {
    pub(super) fn new(stream: Stream<E>, from: u64) -> Self {
        Self {
            stream,
            next: from,
            seen_head: 0,
        }
    }

    /// Index of the next entry to deliver.
    #[must_use]
    pub fn next_index(&self) -> u64 {
        self.next
    }

    /// Returns the next event without blocking.
    pub fn poll(&mut self) -> Option<StreamEvent<E>> {
        self.wait(Duration::ZERO)
    }

    /// Returns the next event, blocking for at most `timeout`.
    ///
    /// Returns `None` on timeout or when woken by
    /// [`Stream::wake_subscribers`] with nothing new.
    pub fn wait(&mut self, timeout: Duration) -> Option<StreamEvent<E>> {
        let deadline = Instant::now().checked_add(timeout);
        let shared = &self.stream.shared;
        let mut log = shared.log.lock();
        loop {
            if let Some((position, entry)) = log.get(self.next) {
                self.next += 1;
                self.seen_head = self.seen_head.max(position.us);
                return Some(StreamEvent::Entry(position, entry));
            }
            if log.size() <= self.next && log.head() > self.seen_head {
                self.seen_head = log.head();
                return Some(StreamEvent::Head(self.seen_head));
            }
            if timeout.is_zero() {
                return None;
            }

            let before = (log.size(), log.head());
            match deadline {
                Some(deadline) => {
                    if shared.changed.wait_until(&mut log, deadline).timed_out() {
                        return None;
                    }
                }
                None => shared.changed.wait(&mut log),
            }
            if (log.size(), log.head()) == before {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Log;
    use serde_json::{json, Value};
    use std::thread;

    #[test]
    fn delivers_entries_then_head() {
        let stream: Stream<Value> = Stream::in_memory();
        stream.publish_at(json!(1), 10).unwrap();
        stream.publish_at(json!(2), 20).unwrap();
        stream.update_head(30).unwrap();

        let mut sub = stream.subscribe(0);
        assert!(matches!(sub.poll(), Some(StreamEvent::Entry(p, _)) if p.index == 0));
        assert!(matches!(sub.poll(), Some(StreamEvent::Entry(p, _)) if p.index == 1));
        assert!(matches!(sub.poll(), Some(StreamEvent::Head(30))));
        assert!(sub.poll().is_none());
        assert_eq!(sub.next_index(), 2);
    }

    #[test]
    fn wait_times_out() {
        let stream: Stream<Value> = Stream::new(Log::in_memory());
        let mut sub = stream.subscribe(0);
        assert!(sub.wait(Duration::from_millis(20)).is_none());
    }

    #[test]
    fn wait_wakes_on_append() {
        let stream: Stream<Value> = Stream::in_memory();
        let mut sub = stream.subscribe(0);
        let writer = stream.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            writer.publish_at(json!("late"), 5).unwrap();
        });

        let event = sub.wait(Duration::from_secs(5));
        assert!(matches!(event, Some(StreamEvent::Entry(p, _)) if p.index == 0));
        handle.join().unwrap();
    }

    #[test]
    fn wake_subscribers_returns_early() {
        let stream: Stream<Value> = Stream::in_memory();
        let mut sub = stream.subscribe(0);
        let waker = stream.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            waker.wake_subscribers();
        });

        let started = Instant::now();
        assert!(sub.wait(Duration::from_secs(10)).is_none());
        assert!(started.elapsed() < Duration::from_secs(10));
        handle.join().unwrap();
    }
}
