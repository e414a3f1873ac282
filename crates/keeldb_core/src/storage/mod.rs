//! Storage façade and transaction engine.
//!
//! A [`Storage`] owns the containers of a [`Schema`] and the [`Stream`] its
//! committed transactions go to. All work on the containers happens on one
//! worker thread per storage, under one commit lock:
//!
//! ```text
//! submit ─► worker ─► lock ─► begin_us ─► body ─► collect ─► end_us ─► append ─► unlock ─► resolve
//!                                           │
//!                                           └─► rollback (reverse order) ─► unlock ─► resolve
//! ```
//!
//! A master storage accepts read-write transactions and holds its stream's
//! [`WriterClaim`], so no second storage can write to it. A following storage
//! applies entries of its stream in index order on a replay thread, and only
//! accepts read-only transactions until [`Storage::flip_to_master`].

mod schema;
mod transaction;

pub use schema::{ChangeSet, Schema};
pub use transaction::{Abort, ReadOnly, ReadWrite, TransactionFuture, TransactionOutcome};

use crate::clock::{Micros, SharedClock};
use crate::config::StorageConfig;
use crate::container::Journal;
use crate::error::{CoreError, CoreResult};
use crate::log::Log;
use crate::mutation::{Transaction, TransactionEntry, TransactionMeta};
use crate::stream::{Stream, WriterClaim};
use crate::types::{IndexAndTimestamp, Role};
use parking_lot::{Condvar, Mutex};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    count: u64,
    last_us: Micros,
}

struct ReplayWorker {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

struct Inner<S, E> {
    schema: Mutex<S>,
    stream: Stream<E>,
    clock: SharedClock,
    master: AtomicBool,
    writer: Mutex<Option<WriterClaim<E>>>,
    shut_down: AtomicBool,
    progress: Mutex<Progress>,
    applied: Condvar,
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    replay: Mutex<Option<ReplayWorker>>,
    config: StorageConfig,
}

/// An embedded transactional store over a [`Stream`].
///
/// `E` is the stream entry type; it defaults to plain transactions.
pub struct Storage<S: Schema, E = Transaction<<S as Schema>::Mutation>> {
    inner: Arc<Inner<S, E>>,
}

impl<S, E> Storage<S, E>
where
    S: Schema,
    E: TransactionEntry<S::Mutation>,
{
    /// Creates a master storage over `stream`, replaying its entries first.
    ///
    /// # Errors
    ///
    /// Returns `NotMasterStream` if the stream does not hold the write
    /// authority, `WriterClaimed` if another storage writes to it, or an
    /// error if the worker thread cannot be spawned.
    pub fn master(stream: Stream<E>, config: StorageConfig) -> CoreResult<Self> {
        let claim = stream.claim_writer()?;
        let storage = Self::build(stream, config, Some(claim))?;
        {
            let mut schema = storage.inner.schema.lock();
            storage.inner.catch_up(&mut schema);
        }
        tracing::info!(
            entries = storage.applied_count(),
            fields = ?S::field_names(),
            "master storage ready"
        );
        Ok(storage)
    }

    /// Creates a master storage over a fresh in-memory log.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be spawned.
    pub fn in_memory_master(config: StorageConfig) -> CoreResult<Self> {
        let stream = Stream::with_clock(Log::in_memory(), config.clock.clone());
        Self::master(stream, config)
    }

    /// Creates a following storage that replays `stream` as it grows.
    ///
    /// # Errors
    ///
    /// Returns an error if a thread cannot be spawned.
    pub fn following(stream: Stream<E>, config: StorageConfig) -> CoreResult<Self> {
        let storage = Self::build(stream, config, None)?;
        Inner::start_replay(&storage.inner)?;
        tracing::info!(fields = ?S::field_names(), "following storage started");
        Ok(storage)
    }

    fn build(
        stream: Stream<E>,
        config: StorageConfig,
        claim: Option<WriterClaim<E>>,
    ) -> CoreResult<Self> {
        let journal = Journal::new(config.clock.clone());
        let (tx, rx) = mpsc::channel::<Job>();
        let worker = thread::Builder::new()
            .name(config.worker_name.clone())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                        tracing::error!("storage job panicked");
                    }
                }
            })?;

        let inner = Arc::new(Inner {
            schema: Mutex::new(S::new(&journal)),
            stream,
            clock: config.clock.clone(),
            master: AtomicBool::new(claim.is_some()),
            writer: Mutex::new(claim),
            shut_down: AtomicBool::new(false),
            progress: Mutex::new(Progress::default()),
            applied: Condvar::new(),
            jobs: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            replay: Mutex::new(None),
            config,
        });
        Ok(Self { inner })
    }

    /// Runs `body` against an immutable view of the containers.
    pub fn read_only<T, F>(&self, body: F) -> TransactionFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&ReadOnly<'_, S>) -> T + Send + 'static,
    {
        self.submit(move |inner| inner.run_read_only(body))
    }

    /// Runs `body` against a mutable view of the containers and commits its
    /// mutations as one transaction.
    ///
    /// Fails with `WriteOnFollower` without running `body` on a follower.
    pub fn read_write<T, F>(&self, body: F) -> TransactionFuture<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut ReadWrite<'_, S>) -> Result<T, Abort<T>> + Send + 'static,
    {
        if !self.is_master() {
            return TransactionFuture::ready(TransactionOutcome::Failed(CoreError::WriteOnFollower));
        }
        self.submit(move |inner| inner.run_read_write(body))
    }

    /// Like [`read_write`](Self::read_write), then passes the committed or
    /// rolled-back value to `then`, outside the commit lock.
    ///
    /// A panic in `then` resolves the future as `Panicked`. The transaction
    /// stays committed.
    pub fn read_write_then<T, U, F, G>(&self, body: F, then: G) -> TransactionFuture<U>
    where
        T: Send + 'static,
        U: Send + 'static,
        F: FnOnce(&mut ReadWrite<'_, S>) -> Result<T, Abort<T>> + Send + 'static,
        G: FnOnce(T) -> U + Send + 'static,
    {
        if !self.is_master() {
            return TransactionFuture::ready(TransactionOutcome::Failed(CoreError::WriteOnFollower));
        }
        self.submit(move |inner| {
            let outcome = inner.run_read_write(body);
            match panic::catch_unwind(AssertUnwindSafe(move || outcome.map(then))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(&*payload);
                    tracing::warn!(%message, "transaction continuation panicked");
                    TransactionOutcome::Failed(CoreError::Panicked(message))
                }
            }
        })
    }

    fn submit<T, W>(&self, work: W) -> TransactionFuture<T>
    where
        T: Send + 'static,
        W: FnOnce(&Inner<S, E>) -> TransactionOutcome<T> + Send + 'static,
    {
        if self.inner.shut_down.load(Ordering::SeqCst) {
            return TransactionFuture::ready(TransactionOutcome::Failed(CoreError::ShutDown));
        }
        let (tx, rx) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let job: Job = Box::new(move || {
            let _ = tx.send(work(&inner));
        });
        if let Some(jobs) = self.inner.jobs.lock().as_ref() {
            // A closed channel drops the job, which resolves the future as shut down.
            let _ = jobs.send(job);
        }
        TransactionFuture::new(rx)
    }

    /// Returns true if the storage accepts read-write transactions.
    #[must_use]
    pub fn is_master(&self) -> bool {
        self.inner.master.load(Ordering::SeqCst)
    }

    /// Current role.
    #[must_use]
    pub fn role(&self) -> Role {
        if self.is_master() {
            Role::Master
        } else {
            Role::Follower
        }
    }

    /// The stream this storage writes to or replays.
    #[must_use]
    pub fn stream(&self) -> &Stream<E> {
        &self.inner.stream
    }

    /// Names of the containers.
    #[must_use]
    pub fn field_names(&self) -> &'static [&'static str] {
        S::field_names()
    }

    /// Turns a following storage into a master.
    ///
    /// Drains every entry already in the stream, stops replaying and takes
    /// the stream's write authority if it is not master yet.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyMaster` on a master storage,
    /// `PublisherStillBorrowed` while a replicator still holds the stream's
    /// publisher, and `WriterClaimed` while another storage writes to the
    /// stream.
    pub fn flip_to_master(&self) -> CoreResult<()> {
        if self.is_master() {
            return Err(CoreError::AlreadyMaster);
        }
        if self.inner.stream.is_publisher_lent() {
            return Err(CoreError::PublisherStillBorrowed);
        }
        if self.inner.stream.is_writer_claimed() {
            return Err(CoreError::WriterClaimed);
        }
        self.inner.stop_replay();

        let mut schema = self.inner.schema.lock();
        let claimed = match self.inner.stream.become_master() {
            Ok(()) | Err(CoreError::AlreadyMasterStream) => self.inner.stream.claim_writer(),
            Err(e) => Err(e),
        };
        let claim = match claimed {
            Ok(claim) => claim,
            Err(e) => {
                drop(schema);
                Inner::start_replay(&self.inner)?;
                return Err(e);
            }
        };
        self.inner.catch_up(&mut schema);
        *self.inner.writer.lock() = Some(claim);
        self.inner.master.store(true, Ordering::SeqCst);
        drop(schema);

        tracing::info!(entries = self.applied_count(), "storage flipped to master");
        Ok(())
    }

    /// Timestamp up to which the stream has been applied.
    ///
    /// Once every entry is applied this is the stream head, which may be
    /// later than the last entry.
    #[must_use]
    pub fn last_applied_timestamp(&self) -> Micros {
        let progress = *self.inner.progress.lock();
        self.inner.last_applied(progress)
    }

    /// Number of stream entries applied to the containers.
    #[must_use]
    pub fn applied_count(&self) -> u64 {
        self.inner.progress.lock().count
    }

    /// Blocks until [`last_applied_timestamp`](Self::last_applied_timestamp)
    /// reaches `us`, or `timeout` elapses. Returns whether it was reached.
    pub fn wait_for_applied(&self, us: Micros, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut progress = self.inner.progress.lock();
        loop {
            if self.inner.last_applied(*progress) >= us {
                return true;
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .inner
                        .applied
                        .wait_until(&mut progress, deadline)
                        .timed_out()
                    {
                        return self.inner.last_applied(*progress) >= us;
                    }
                }
                None => self.inner.applied.wait(&mut progress),
            }
        }
    }

    /// Rejects every later submission with `ShutDown`. Transactions already
    /// submitted still run.
    pub fn graceful_shutdown(&self) {
        if !self.inner.shut_down.swap(true, Ordering::SeqCst) {
            self.inner.jobs.lock().take();
            tracing::info!("storage shutting down");
        }
    }

    /// Returns true after [`graceful_shutdown`](Self::graceful_shutdown).
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}

impl<S, E> Inner<S, E>
where
    S: Schema,
    E: TransactionEntry<S::Mutation>,
{
    fn run_read_only<T>(&self, body: impl FnOnce(&ReadOnly<'_, S>) -> T) -> TransactionOutcome<T> {
        let schema = self.schema.lock();
        let view = ReadOnly::new(&*schema);
        match panic::catch_unwind(AssertUnwindSafe(|| body(&view))) {
            Ok(value) => TransactionOutcome::Committed(value),
            Err(payload) => TransactionOutcome::Failed(CoreError::Panicked(panic_message(&*payload))),
        }
    }

    fn run_read_write<T>(
        &self,
        body: impl FnOnce(&mut ReadWrite<'_, S>) -> Result<T, Abort<T>>,
    ) -> TransactionOutcome<T> {
        let mut schema = self.schema.lock();
        if !self.master.load(Ordering::SeqCst) {
            return TransactionOutcome::Failed(CoreError::WriteOnFollower);
        }
        self.catch_up(&mut schema);

        let begin_us = self.clock.now_us();
        let mut fields = BTreeMap::new();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let mut view = ReadWrite::new(&mut *schema, begin_us, &mut fields);
            body(&mut view)
        }));

        let value = match result {
            Ok(Ok(value)) => value,
            Ok(Err(Abort::Rollback(value))) => {
                schema.rollback();
                tracing::debug!(begin_us, "transaction rolled back");
                return TransactionOutcome::RolledBack(value);
            }
            Ok(Err(Abort::Fail(error))) => {
                schema.rollback();
                tracing::debug!(begin_us, %error, "transaction failed");
                return TransactionOutcome::Failed(CoreError::Domain(error));
            }
            Err(payload) => {
                schema.rollback();
                let message = panic_message(&*payload);
                tracing::warn!(begin_us, %message, "transaction panicked");
                return TransactionOutcome::Failed(CoreError::Panicked(message));
            }
        };

        let mut changes = ChangeSet::new();
        schema.collect_changes(&mut changes);
        if changes.is_empty() {
            return TransactionOutcome::Committed(value);
        }

        let end_us = self.clock.now_us().max(self.stream.head());
        let transaction = Transaction {
            meta: TransactionMeta {
                begin_us,
                end_us,
                fields,
            },
            mutations: changes.into_mutations(),
        };
        let count = transaction.mutations.len();
        match self
            .stream
            .publish_at(E::from_transaction(transaction), end_us)
        {
            Ok(position) => {
                schema.commit();
                self.advance_past(&mut schema, position);
                tracing::debug!(%position, mutations = count, "transaction committed");
                TransactionOutcome::Committed(value)
            }
            Err(error) => {
                schema.rollback();
                tracing::error!(%error, "transaction append failed");
                TransactionOutcome::Failed(error)
            }
        }
    }

    /// Applies every stream entry not applied yet. Caller holds the schema lock.
    fn catch_up(&self, schema: &mut S) {
        let from = self.progress.lock().count;
        let mut applied = None;
        for (position, entry) in self.stream.iter_from(from) {
            if let Some(transaction) = entry.as_transaction() {
                for mutation in &transaction.mutations {
                    schema.replay(mutation);
                }
            }
            applied = Some(position);
        }
        match applied {
            Some(position) => {
                tracing::trace!(%position, "replayed up to");
                self.mark_applied(position.index + 1, position.us);
            }
            None => {
                let _progress = self.progress.lock();
                self.applied.notify_all();
            }
        }
    }

    /// Marks everything up to our own entry at `position` as applied.
    ///
    /// Entries published on the stream directly can land between catch-up
    /// and our append; transactions among them are replayed late.
    fn advance_past(&self, schema: &mut S, position: IndexAndTimestamp) {
        let from = self.progress.lock().count;
        for (skipped, entry) in self.stream.iter_from(from) {
            if skipped.index >= position.index {
                break;
            }
            if let Some(transaction) = entry.as_transaction() {
                tracing::warn!(position = %skipped, "replaying transaction published around a commit");
                for mutation in &transaction.mutations {
                    schema.replay(mutation);
                }
            }
        }
        self.mark_applied(position.index + 1, position.us);
    }

    fn mark_applied(&self, count: u64, us: Micros) {
        let mut progress = self.progress.lock();
        progress.count = count;
        progress.last_us = progress.last_us.max(us);
        self.applied.notify_all();
    }

    fn last_applied(&self, progress: Progress) -> Micros {
        let status = self.stream.status();
        if progress.count >= status.size {
            progress.last_us.max(status.head)
        } else {
            progress.last_us
        }
    }

    fn start_replay(this: &Arc<Self>) -> CoreResult<()> {
        let stop = Arc::new(AtomicBool::new(false));
        let handle = thread::Builder::new()
            .name(format!("{}-replay", this.config.worker_name))
            .spawn({
                let inner = Arc::clone(this);
                let stop = Arc::clone(&stop);
                move || inner.replay_loop(&stop)
            })?;
        *this.replay.lock() = Some(ReplayWorker { stop, handle });
        Ok(())
    }

    fn replay_loop(&self, stop: &AtomicBool) {
        let mut subscription = self.stream.subscribe(self.progress.lock().count);
        {
            let mut schema = self.schema.lock();
            self.catch_up(&mut schema);
        }
        while !stop.load(Ordering::SeqCst) {
            if subscription.wait(self.config.replay_poll_interval).is_some() {
                let mut schema = self.schema.lock();
                self.catch_up(&mut schema);
            }
        }
        tracing::debug!("replay stopped");
    }

    fn stop_replay(&self) {
        let Some(worker) = self.replay.lock().take() else {
            return;
        };
        worker.stop.store(true, Ordering::SeqCst);
        self.stream.wake_subscribers();
        if worker.handle.join().is_err() {
            tracing::error!("replay thread panicked");
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl<S: Schema, E> Drop for Storage<S, E> {
    fn drop(&mut self) {
        self.inner.shut_down.store(true, Ordering::SeqCst);
        self.inner.jobs.lock().take();

        if let Some(worker) = self.inner.replay.lock().take() {
            worker.stop.store(true, Ordering::SeqCst);
            self.inner.stream.wake_subscribers();
            let _ = worker.handle.join();
        }
        if let Some(handle) = self.inner.worker.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
        self.inner.writer.lock().take();
    }
}

impl<S: Schema, E> fmt::Debug for Storage<S, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Storage")
            .field("fields", &S::field_names())
            .field("master", &self.inner.master.load(Ordering::SeqCst))
            .field("progress", &*self.inner.progress.lock())
            .field("shut_down", &self.inner.shut_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::StepClock;
    use crate::container::{Container, DictEntry, Dictionary};
    use crate::mutation::{Deleted, DictChange, Patched, Updated};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Item {
        name: String,
        qty: i64,
    }

    impl DictEntry for Item {
        type Key = String;
        type Patch = i64;

        fn key(&self) -> String {
            self.name.clone()
        }

        fn apply_patch(&mut self, delta: &i64) {
            self.qty += delta;
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Mutation {
        ItemUpdated(Updated<Item>),
        ItemDeleted(Deleted<String>),
        ItemPatched(Patched<String, i64>),
    }

    struct Inventory {
        items: Dictionary<Item>,
    }

    impl Schema for Inventory {
        type Mutation = Mutation;

        fn new(journal: &Journal) -> Self {
            Self {
                items: Dictionary::new(journal, "items"),
            }
        }

        fn collect_changes(&self, changes: &mut ChangeSet<Mutation>) {
            changes.collect(&self.items, |change| match change {
                DictChange::Updated(u) => Mutation::ItemUpdated(u),
                DictChange::Deleted(d) => Mutation::ItemDeleted(d),
                DictChange::Patched(p) => Mutation::ItemPatched(p),
            });
        }

        fn commit(&mut self) {
            self.items.commit();
        }

        fn rollback(&mut self) {
            self.items.rollback();
        }

        fn replay(&mut self, mutation: &Mutation) {
            match mutation {
                Mutation::ItemUpdated(u) => self.items.replay_updated(u),
                Mutation::ItemDeleted(d) => self.items.replay_deleted(d),
                Mutation::ItemPatched(p) => self.items.replay_patched(p),
            }
        }

        fn field_names() -> &'static [&'static str] {
            &["items"]
        }
    }

    #[derive(Debug, thiserror::Error)]
    #[error("out of stock")]
    struct OutOfStock;

    fn reserve(available: i64) -> Result<(), OutOfStock> {
        if available > 0 {
            Ok(())
        } else {
            Err(OutOfStock)
        }
    }

    fn item(name: &str, qty: i64) -> Item {
        Item {
            name: name.to_string(),
            qty,
        }
    }

    fn master_at(start: Micros) -> Storage<Inventory> {
        Storage::in_memory_master(StorageConfig::default().clock(StepClock::shared(start, 1)))
            .unwrap()
    }

    fn names(storage: &Storage<Inventory>) -> Vec<String> {
        storage
            .read_only(|txn| txn.items.keys().cloned().collect::<Vec<_>>())
            .wait()
            .committed()
            .unwrap()
    }

    #[test]
    fn commit_writes_one_line() {
        let storage = master_at(1000);
        let outcome = storage
            .read_write(|txn| {
                txn.items.add(item("one", 1));
                txn.items.add(item("two", 2));
                Ok(())
            })
            .wait();
        assert!(outcome.is_committed());

        assert_eq!(storage.stream().size(), 1);
        assert_eq!(
            storage.stream().raw_line(0).unwrap().unwrap(),
            "{\"index\":0,\"us\":1003}\t{\"meta\":{\"begin_us\":1000,\"end_us\":1003,\"fields\":{}},\
             \"mutations\":[{\"ItemUpdated\":{\"us\":1001,\"data\":{\"name\":\"one\",\"qty\":1}}},\
             {\"ItemUpdated\":{\"us\":1002,\"data\":{\"name\":\"two\",\"qty\":2}}}]}\n"
        );
        assert_eq!(storage.last_applied_timestamp(), 1003);
        assert_eq!(storage.applied_count(), 1);
    }

    #[test]
    fn rollback_leaves_no_trace() {
        let storage = master_at(1);
        storage
            .read_write(|txn| {
                txn.items.add(item("keep", 1));
                Ok(())
            })
            .wait();

        let outcome = storage
            .read_write(|txn| {
                txn.items.add(item("temp", 1));
                txn.items.patch(&"keep".to_string(), 10);
                txn.items.erase(&"keep".to_string());
                Err(Abort::rollback_with(7))
            })
            .wait();

        assert!(matches!(outcome, TransactionOutcome::RolledBack(Some(7))));
        assert_eq!(storage.stream().size(), 1);
        assert_eq!(names(&storage), vec!["keep"]);
        let qty = storage
            .read_only(|txn| txn.items.get(&"keep".to_string()).map(|i| i.qty))
            .wait()
            .committed()
            .flatten();
        assert_eq!(qty, Some(1));
    }

    #[test]
    fn domain_error_fails_and_rolls_back() {
        let storage = master_at(1);
        let outcome = storage
            .read_write(|txn| {
                txn.items.add(item("a", 1));
                reserve(0)?;
                Ok(())
            })
            .wait();

        match outcome {
            TransactionOutcome::Failed(CoreError::Domain(e)) => assert_eq!(e.to_string(), "out of stock"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(names(&storage).is_empty());
        assert_eq!(storage.stream().size(), 0);
    }

    #[test]
    fn panic_fails_and_rolls_back() {
        let storage = master_at(1);
        let outcome = storage
            .read_write(|txn| -> Result<(), Abort<()>> {
                txn.items.add(item("a", 1));
                panic!("boom");
            })
            .wait();

        assert!(matches!(outcome, TransactionOutcome::Failed(CoreError::Panicked(ref m)) if m == "boom"));
        assert!(names(&storage).is_empty());

        // The worker survives the panic.
        assert!(storage
            .read_write(|txn| {
                txn.items.add(item("b", 1));
                Ok(())
            })
            .wait()
            .is_committed());
    }

    #[test]
    fn empty_transaction_is_not_logged() {
        let storage = master_at(1);
        let outcome = storage
            .read_write(|txn| {
                txn.set_meta_field("user", "alice");
                txn.items.erase(&"missing".to_string());
                Ok(5)
            })
            .wait();
        assert_eq!(outcome.committed(), Some(5));
        assert_eq!(storage.stream().size(), 0);
    }

    #[test]
    fn only_meta_fields_present_at_commit_persist() {
        let storage = master_at(1);
        storage
            .read_write(|txn| {
                txn.set_meta_field("user", "alice");
                txn.set_meta_field("tmp", "x");
                txn.erase_meta_field("tmp");
                txn.items.add(item("a", 1));
                Ok(())
            })
            .wait();

        let (_, entry) = storage.stream().get(0).unwrap();
        let fields: Vec<(&str, &str)> = entry
            .meta
            .fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(fields, vec![("user", "alice")]);
    }

    #[test]
    fn read_write_then_receives_value_outside_lock() {
        let storage = master_at(1);
        let committed = storage
            .read_write_then(
                |txn| {
                    txn.items.add(item("a", 1));
                    Ok(txn.items.len())
                },
                |len| len * 10,
            )
            .wait();
        assert_eq!(committed.committed(), Some(10));

        let rolled = storage
            .read_write_then(|_| Err(Abort::rollback_with(3usize)), |v| v + 1)
            .wait();
        assert!(matches!(rolled, TransactionOutcome::RolledBack(Some(4))));
    }

    #[test]
    fn follower_replays_and_rejects_writes() {
        let master = master_at(1);
        for i in 0..3 {
            master
                .read_write(move |txn| {
                    txn.items.add(item(&format!("k{i}"), i));
                    Ok(())
                })
                .wait();
        }

        let follower: Storage<Inventory> =
            Storage::following(master.stream().clone(), StorageConfig::default()).unwrap();
        assert!(follower.wait_for_applied(master.stream().head(), Duration::from_secs(5)));
        assert_eq!(names(&follower), names(&master));
        assert_eq!(follower.role(), Role::Follower);

        let outcome = follower
            .read_write(|txn| {
                txn.items.add(item("x", 1));
                Ok(())
            })
            .wait();
        assert!(matches!(outcome, TransactionOutcome::Failed(CoreError::WriteOnFollower)));

        master
            .read_write(|txn| {
                txn.items.erase(&"k0".to_string());
                Ok(())
            })
            .wait();
        assert!(follower.wait_for_applied(master.stream().head(), Duration::from_secs(5)));
        assert_eq!(names(&follower), vec!["k1", "k2"]);
    }

    #[test]
    fn flip_to_master_checks_roles() {
        let master = master_at(1);
        assert!(matches!(master.flip_to_master(), Err(CoreError::AlreadyMaster)));

        let stream: Stream<Transaction<Mutation>> = Stream::in_memory();
        let publisher = stream.become_following().unwrap();
        publisher
            .publish_at(
                Transaction {
                    meta: TransactionMeta::default(),
                    mutations: vec![Mutation::ItemUpdated(Updated {
                        us: 5,
                        data: item("r", 1),
                    })],
                },
                5,
            )
            .unwrap();

        assert!(matches!(
            Storage::<Inventory>::master(stream.clone(), StorageConfig::default()),
            Err(CoreError::NotMasterStream)
        ));

        let follower: Storage<Inventory> =
            Storage::following(stream.clone(), StorageConfig::default()).unwrap();
        assert!(matches!(
            follower.flip_to_master(),
            Err(CoreError::PublisherStillBorrowed)
        ));

        drop(publisher);
        follower.flip_to_master().unwrap();
        assert!(follower.is_master());
        assert!(stream.is_master());
        assert_eq!(names(&follower), vec!["r"]);
        assert!(follower
            .read_write(|txn| {
                txn.items.add(item("s", 2));
                Ok(())
            })
            .wait()
            .is_committed());
        assert_eq!(stream.size(), 2);
    }

    #[test]
    fn only_one_storage_writes_to_a_stream() {
        let first = master_at(1);
        let stream = first.stream().clone();
        assert!(matches!(
            Storage::<Inventory>::master(stream.clone(), StorageConfig::default()),
            Err(CoreError::WriterClaimed)
        ));

        let follower: Storage<Inventory> =
            Storage::following(stream.clone(), StorageConfig::default()).unwrap();
        assert!(matches!(
            follower.flip_to_master(),
            Err(CoreError::WriterClaimed)
        ));
        assert!(!follower.is_master());

        assert!(first
            .read_write(|txn| {
                txn.items.add(item("x", 1));
                Ok(())
            })
            .wait()
            .is_committed());
        assert!(follower.wait_for_applied(stream.head(), Duration::from_secs(5)));
        assert_eq!(names(&follower), vec!["x"]);

        drop(first);
        assert!(!stream.is_writer_claimed());
        follower.flip_to_master().unwrap();
        assert!(stream.is_writer_claimed());
        assert!(follower
            .read_write(|txn| {
                txn.items.add(item("y", 2));
                Ok(())
            })
            .wait()
            .is_committed());
        assert_eq!(names(&follower), vec!["x", "y"]);
        assert_eq!(follower.applied_count(), stream.size());
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Entry {
        Txn(Transaction<Mutation>),
        Note(String),
    }

    impl TransactionEntry<Mutation> for Entry {
        fn from_transaction(transaction: Transaction<Mutation>) -> Self {
            Self::Txn(transaction)
        }

        fn as_transaction(&self) -> Option<&Transaction<Mutation>> {
            match self {
                Self::Txn(transaction) => Some(transaction),
                Self::Note(_) => None,
            }
        }
    }

    fn quantities(storage: &Storage<Inventory, Entry>) -> Vec<(String, i64)> {
        storage
            .read_only(|txn| {
                txn.items
                    .iter()
                    .map(|i| (i.name.clone(), i.qty))
                    .collect::<Vec<_>>()
            })
            .wait()
            .committed()
            .unwrap()
    }

    #[test]
    fn external_entries_share_the_index_space() {
        let clock: SharedClock = StepClock::shared(10, 1);
        let stream: Stream<Entry> = Stream::with_clock(Log::in_memory(), clock.clone());
        let master: Storage<Inventory, Entry> =
            Storage::master(stream.clone(), StorageConfig::default().clock(clock)).unwrap();

        stream.publish(Entry::Note("boot".to_string())).unwrap();
        assert!(master
            .read_write(|txn| {
                txn.items.add(item("a", 1));
                Ok(())
            })
            .wait()
            .is_committed());

        // A note lands between catch-up and the commit's own append.
        let side = stream.clone();
        assert!(master
            .read_write(move |txn| {
                txn.items.patch(&"a".to_string(), 2);
                txn.items.add(item("b", 5));
                side.publish(Entry::Note("during".to_string())).unwrap();
                Ok(())
            })
            .wait()
            .is_committed());
        stream.publish(Entry::Note("after".to_string())).unwrap();

        let indexes: Vec<u64> = stream.iter_from(0).map(|(p, _)| p.index).collect();
        assert_eq!(indexes, vec![0, 1, 2, 3, 4]);
        assert!(matches!(&*stream.get(2).unwrap().1, Entry::Note(n) if n == "during"));
        assert!(matches!(&*stream.get(3).unwrap().1, Entry::Txn(_)));
        assert_eq!(master.applied_count(), 4);

        let follower: Storage<Inventory, Entry> =
            Storage::following(stream.clone(), StorageConfig::default()).unwrap();
        assert!(follower.wait_for_applied(stream.head(), Duration::from_secs(5)));
        assert_eq!(follower.applied_count(), stream.size());
        assert_eq!(
            quantities(&follower),
            vec![("a".to_string(), 3), ("b".to_string(), 5)]
        );
        assert_eq!(quantities(&follower), quantities(&master));
    }

    #[test]
    fn panic_in_continuation_keeps_worker_alive() {
        let storage = master_at(1);
        let outcome = storage
            .read_write_then(
                |txn| {
                    txn.items.add(item("a", 1));
                    Ok(())
                },
                |()| -> usize { panic!("after commit") },
            )
            .wait();

        assert!(matches!(outcome, TransactionOutcome::Failed(CoreError::Panicked(ref m)) if m == "after commit"));
        assert!(!storage.is_shut_down());
        assert_eq!(storage.stream().size(), 1);
        assert_eq!(names(&storage), vec!["a"]);
        assert!(storage
            .read_write(|txn| {
                txn.items.add(item("b", 2));
                Ok(())
            })
            .wait()
            .is_committed());
    }

    #[test]
    fn master_over_existing_stream_replays_it() {
        let first = master_at(1);
        first
            .read_write(|txn| {
                txn.items.add(item("a", 1));
                txn.items.patch(&"a".to_string(), 4);
                Ok(())
            })
            .wait();
        let stream = first.stream().clone();
        drop(first);

        let second: Storage<Inventory> = Storage::master(stream, StorageConfig::default()).unwrap();
        let qty = second
            .read_only(|txn| txn.items.get(&"a".to_string()).map(|i| i.qty))
            .wait()
            .committed()
            .flatten();
        assert_eq!(qty, Some(5));
    }

    #[test]
    fn shutdown_rejects_new_submissions() {
        let storage = master_at(1);
        let in_flight = storage.read_write(|txn| {
            txn.items.add(item("a", 1));
            Ok(())
        });
        storage.graceful_shutdown();
        assert!(storage.is_shut_down());

        assert!(in_flight.wait().is_committed());
        assert!(matches!(
            storage.read_only(|_| ()).wait(),
            TransactionOutcome::Failed(CoreError::ShutDown)
        ));
    }

    #[test]
    fn wait_for_applied_times_out() {
        let storage = master_at(1);
        assert!(!storage.wait_for_applied(1_000_000, Duration::from_millis(20)));
        assert!(storage.wait_for_applied(0, Duration::ZERO));
    }
}
