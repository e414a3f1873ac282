//! In-process replication between two streams.

use super::{Publisher, Stream, StreamEvent};
use crate::error::{CoreError, CoreResult};
use crate::mutation::LogEntry;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Copies every line and head update of a source stream into a publisher.
///
/// Lines are copied verbatim, so the target log ends up byte-identical to
/// the source. A background thread does the copying until [`stop`] hands the
/// publisher back.
///
/// [`stop`]: StreamMirror::stop
pub struct StreamMirror<E: LogEntry> {
    source: Stream<E>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<Publisher<E>>>,
}

impl<E: LogEntry> StreamMirror<E> {
    /// Starts mirroring `source` into `publisher`, from the publisher's size.
    ///
    /// # Errors
    ///
    /// Returns an error if the mirror thread cannot be spawned.
    pub fn start(source: Stream<E>, publisher: Publisher<E>, poll: Duration) -> CoreResult<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new()
            .name("keeldb-mirror".to_string())
            .spawn({
                let source = source.clone();
                let stop = Arc::clone(&stop);
                move || run(&source, publisher, &stop, poll)
            })?;
        Ok(Self {
            source,
            stop,
            handle: Some(handle),
        })
    }

    /// Returns true once the mirror thread has exited, after an error or stop.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stops mirroring and returns the publisher.
    ///
    /// # Errors
    ///
    /// Returns `Panicked` if the mirror thread panicked.
    pub fn stop(mut self) -> CoreResult<Publisher<E>> {
        self.halt()
            .ok_or_else(|| CoreError::invalid_operation("mirror already stopped"))?
    }

    fn halt(&mut self) -> Option<CoreResult<Publisher<E>>> {
        let handle = self.handle.take()?;
        self.stop.store(true, Ordering::SeqCst);
        self.source.wake_subscribers();
        Some(
            handle
                .join()
                .map_err(|_| CoreError::Panicked("mirror thread panicked".to_string())),
        )
    }
}

fn run<E: LogEntry>(
    source: &Stream<E>,
    publisher: Publisher<E>,
    stop: &AtomicBool,
    poll: Duration,
) -> Publisher<E> {
    let mut subscription = source.subscribe(publisher.size());
    tracing::debug!(from = subscription.next_index(), "mirror started");

    while !stop.load(Ordering::SeqCst) {
        let result = match subscription.wait(poll) {
            Some(StreamEvent::Entry(position, _)) => match source.raw_line(position.index) {
                Ok(Some(raw)) => publisher.publish_raw(&raw).map(drop),
                Ok(None) => Err(CoreError::invalid_operation(format!(
                    "source entry {position} vanished"
                ))),
                Err(e) => Err(e),
            },
            Some(StreamEvent::Head(us)) => {
                publisher.update_head(us);
                Ok(())
            }
            None => Ok(()),
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "mirror stopped after error");
            break;
        }
    }

    tracing::debug!(size = publisher.size(), "mirror stopped");
    publisher
}

impl<E: LogEntry> Drop for StreamMirror<E> {
    fn drop(&mut self) {
        let _ = self.halt();
    }
}

impl<E: LogEntry> fmt::Debug for StreamMirror<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamMirror")
            .field("running", &!self.is_finished())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Log;
    use serde_json::{json, Value};
    use std::time::Instant;

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn mirror_copies_lines_and_head() {
        let source: Stream<Value> = Stream::in_memory();
        source.publish_at(json!({"n": 1}), 10).unwrap();

        let target: Stream<Value> = Stream::new(Log::in_memory());
        let publisher = target.become_following().unwrap();
        let mirror = StreamMirror::start(source.clone(), publisher, Duration::from_millis(10)).unwrap();

        source.publish_at(json!({"n": 2}), 20).unwrap();
        source.update_head(35).unwrap();
        wait_until(|| target.size() == 2 && target.head() == 35);

        for i in 0..2 {
            assert_eq!(source.raw_line(i).unwrap(), target.raw_line(i).unwrap());
        }

        let publisher = mirror.stop().unwrap();
        assert!(target.is_publisher_lent());
        drop(publisher);
        target.become_master().unwrap();
        target.publish(json!({"n": 3})).unwrap();
        assert_eq!(target.size(), 3);
    }
}
