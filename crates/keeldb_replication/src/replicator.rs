//! Remote replicator: follows a master's log server into a local publisher.

use crate::config::ReplicatorConfig;
use crate::error::{ReplicationError, ReplicationResult};
use futures::StreamExt;
use keeldb_core::log::line::{self, Line};
use keeldb_core::{LogEntry, Publisher};
use std::fmt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// What a replicator is doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicatorState {
    /// Opening a connection; `attempt` counts consecutive failures so far.
    Connecting {
        /// Consecutive failed attempts before this one.
        attempt: u32,
    },
    /// Connected and copying lines.
    Streaming,
    /// Stopped on request.
    Stopped,
    /// Gave up; the message describes the last error.
    Failed(String),
}

/// Copies a remote log into a local stream through its [`Publisher`].
///
/// Lines are appended verbatim with [`Publisher::publish_raw`], so the local
/// log ends up byte-identical to the master's. Dropped connections are
/// retried with exponential backoff; anything the local log rejects stops
/// the replicator. [`Replicator::stop`] hands the publisher back so the
/// local stream can be promoted.
pub struct Replicator<E: LogEntry> {
    stop_tx: watch::Sender<bool>,
    state_rx: watch::Receiver<ReplicatorState>,
    handle: Option<JoinHandle<Publisher<E>>>,
}

impl<E: LogEntry> Replicator<E> {
    /// Starts following `config.base_url` from the publisher's current size.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or no runtime is
    /// available.
    pub fn start(publisher: Publisher<E>, config: ReplicatorConfig) -> ReplicationResult<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| ReplicationError::Task(e.to_string()))?;
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()?;

        let (stop_tx, stop_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(ReplicatorState::Connecting { attempt: 0 });
        let handle = runtime.spawn(run(client, config, publisher, stop_rx, state_tx));

        Ok(Self {
            stop_tx,
            state_rx,
            handle: Some(handle),
        })
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ReplicatorState {
        self.state_rx.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ReplicatorState> {
        self.state_rx.clone()
    }

    /// Returns true once the replicator task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stops replicating and returns the publisher.
    ///
    /// Works whether the replicator is still running or already failed.
    ///
    /// # Errors
    ///
    /// Returns `Task` if the replicator task panicked.
    pub async fn stop(mut self) -> ReplicationResult<Publisher<E>> {
        self.stop_tx.send_replace(true);
        let handle = self
            .handle
            .take()
            .ok_or_else(|| ReplicationError::Task("replicator already stopped".to_string()))?;
        handle
            .await
            .map_err(|e| ReplicationError::Task(e.to_string()))
    }
}

impl<E: LogEntry> Drop for Replicator<E> {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
    }
}

impl<E: LogEntry> fmt::Debug for Replicator<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Replicator")
            .field("state", &*self.state_rx.borrow())
            .finish_non_exhaustive()
    }
}

async fn run<E: LogEntry>(
    client: reqwest::Client,
    config: ReplicatorConfig,
    publisher: Publisher<E>,
    mut stop_rx: watch::Receiver<bool>,
    state_tx: watch::Sender<ReplicatorState>,
) -> Publisher<E> {
    let mut failures = 0u32;

    loop {
        if *stop_rx.borrow() {
            break;
        }
        let delay = config.retry.delay_for_attempt(failures);
        if !delay.is_zero() {
            tokio::select! {
                _ = stop_rx.changed() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        state_tx.send_replace(ReplicatorState::Connecting { attempt: failures });
        let result = tokio::select! {
            result = follow(&client, &config, &publisher, &state_tx) => result,
            _ = stop_rx.changed() => break,
        };

        let error = result.err().unwrap_or(ReplicationError::Disconnected);
        if *state_tx.borrow() == ReplicatorState::Streaming {
            failures = 0;
        }
        failures = failures.saturating_add(1);

        if !error.is_retryable() || config.retry.is_exhausted(failures) {
            let error = if error.is_retryable() {
                ReplicationError::RetriesExhausted {
                    attempts: failures,
                    last: error.to_string(),
                }
            } else {
                error
            };
            tracing::error!(error = %error, size = publisher.size(), "replicator stopped");
            state_tx.send_replace(ReplicatorState::Failed(error.to_string()));
            return publisher;
        }
        tracing::warn!(error = %error, attempt = failures, "replication connection lost, reconnecting");
    }

    tracing::info!(size = publisher.size(), "replicator stopped on request");
    state_tx.send_replace(ReplicatorState::Stopped);
    publisher
}

/// One connection: returns when the master closes the body or on error.
async fn follow<E: LogEntry>(
    client: &reqwest::Client,
    config: &ReplicatorConfig,
    publisher: &Publisher<E>,
    state_tx: &watch::Sender<ReplicatorState>,
) -> ReplicationResult<()> {
    let from = publisher.size();
    let response = client.get(config.log_url(from)).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ReplicationError::Status {
            status: status.as_u16(),
        });
    }

    state_tx.send_replace(ReplicatorState::Streaming);
    tracing::info!(from, master = %config.base_url, "replication connected");

    let mut body = response.bytes_stream();
    let mut pending = Vec::new();
    while let Some(chunk) = body.next().await {
        pending.extend_from_slice(&chunk?);
        while let Some(end) = pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=end).collect();
            let raw = std::str::from_utf8(&raw).map_err(|e| ReplicationError::protocol(e.to_string()))?;
            apply_line(publisher, raw)?;
        }
    }
    Ok(())
}

fn apply_line<E: LogEntry>(publisher: &Publisher<E>, raw: &str) -> ReplicationResult<()> {
    match line::parse(raw).map_err(ReplicationError::Protocol)? {
        Line::Entry { .. } => {
            let position = publisher.publish_raw(raw)?;
            tracing::trace!(%position, "replicated entry");
        }
        Line::Directive {
            name: line::HEAD_DIRECTIVE,
            value,
        } => {
            let us = value
                .parse()
                .map_err(|_| ReplicationError::protocol(format!("bad head value {value:?}")))?;
            publisher.update_head(us);
        }
        Line::Directive { name, .. } => {
            tracing::debug!(name, "ignoring directive");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keeldb_core::Stream;
    use serde_json::{json, Value};

    #[test]
    fn apply_line_appends_entries_and_heads() {
        let master: Stream<Value> = Stream::in_memory();
        master.publish_at(json!({"n": 1}), 40).unwrap();
        let raw = master.raw_line(0).unwrap().unwrap();

        let follower: Stream<Value> = Stream::in_memory();
        let publisher = follower.become_following().unwrap();
        apply_line(&publisher, &raw).unwrap();
        apply_line(&publisher, "#head\t90\n").unwrap();
        apply_line(&publisher, "#signature\tother\n").unwrap();

        assert_eq!(follower.size(), 1);
        assert_eq!(follower.head(), 90);
        assert_eq!(follower.raw_line(0).unwrap(), Some(raw));
    }

    #[test]
    fn apply_line_rejects_garbage() {
        let follower: Stream<Value> = Stream::in_memory();
        let publisher = follower.become_following().unwrap();

        let err = apply_line(&publisher, "garbage\n").unwrap_err();
        assert!(matches!(err, ReplicationError::Protocol(_)));
        assert!(!err.is_retryable());

        let err = apply_line(&publisher, "#head\tsoon\n").unwrap_err();
        assert!(matches!(err, ReplicationError::Protocol(_)));

        let err = apply_line(&publisher, "{\"index\":4,\"us\":1}\t1\n").unwrap_err();
        assert!(matches!(err, ReplicationError::Core(_)));
    }
}
