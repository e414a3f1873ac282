//! Sample schema and storage helpers.
//!
//! [`Sample`] holds one container of every shape so that a single storage
//! exercises dictionaries, patches and all three matrix relations.

use keeldb_backend::{Backend, FileBackend};
use keeldb_core::{
    ChangeSet, Container, Deleted, DictChange, DictEntry, Dictionary, Journal, Log, LogConfig,
    ManyToManyMatrix, MatrixChange, MatrixEntry, Micros, OneToManyMatrix, OneToOneMatrix, Patched,
    Schema, StepClock, Storage, StorageConfig, Stream, Transaction, Unordered, Updated,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

/// A named counter stored in a dictionary.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Record {
    /// Dictionary key.
    pub name: String,
    /// Counter value, adjusted by patches.
    pub value: i64,
}

impl Record {
    /// Creates a record.
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

impl DictEntry for Record {
    type Key = String;
    type Patch = i64;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn apply_patch(&mut self, delta: &i64) {
        self.value += delta;
    }
}

/// A matrix cell with a numeric row and a string column.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Cell {
    /// Row key.
    pub row: u32,
    /// Column key.
    pub col: String,
    /// Payload.
    pub value: i64,
}

impl Cell {
    /// Creates a cell.
    pub fn new(row: u32, col: impl Into<String>, value: i64) -> Self {
        Self {
            row,
            col: col.into(),
            value,
        }
    }
}

impl MatrixEntry for Cell {
    type Row = u32;
    type Col = String;

    fn row(&self) -> u32 {
        self.row
    }

    fn col(&self) -> String {
        self.col.clone()
    }
}

/// Mutations of [`Sample`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleMutation {
    /// `records` entry added or overwritten.
    RecordUpdated(Updated<Record>),
    /// `records` entry removed.
    RecordDeleted(Deleted<String>),
    /// `records` entry patched.
    RecordPatched(Patched<String, i64>),
    /// `uone_to_uone` cell added.
    PairUpdated(Updated<Cell>),
    /// `uone_to_uone` cell removed.
    PairDeleted(Deleted<(u32, String)>),
    /// `owners` cell added.
    OwnerUpdated(Updated<Cell>),
    /// `owners` cell removed.
    OwnerDeleted(Deleted<(u32, String)>),
    /// `links` cell added.
    LinkUpdated(Updated<Cell>),
    /// `links` cell removed.
    LinkDeleted(Deleted<(u32, String)>),
}

/// Schema with one container of each shape.
pub struct Sample {
    /// Ordered dictionary of records.
    pub records: Dictionary<Record>,
    /// One-to-one matrix on unordered indexes.
    pub uone_to_uone: OneToOneMatrix<Cell, Unordered, Unordered>,
    /// Each column owned by at most one row.
    pub owners: OneToManyMatrix<Cell>,
    /// Unconstrained links.
    pub links: ManyToManyMatrix<Cell>,
}

impl Schema for Sample {
    type Mutation = SampleMutation;

    fn new(journal: &Journal) -> Self {
        Self {
            records: Dictionary::new(journal, "records"),
            uone_to_uone: OneToOneMatrix::new(journal, "uone_to_uone"),
            owners: OneToManyMatrix::new(journal, "owners"),
            links: ManyToManyMatrix::new(journal, "links"),
        }
    }

    fn collect_changes(&self, changes: &mut ChangeSet<SampleMutation>) {
        changes.collect(&self.records, |change| match change {
            DictChange::Updated(u) => SampleMutation::RecordUpdated(u),
            DictChange::Deleted(d) => SampleMutation::RecordDeleted(d),
            DictChange::Patched(p) => SampleMutation::RecordPatched(p),
        });
        changes.collect(&self.uone_to_uone, |change| match change {
            MatrixChange::Updated(u) => SampleMutation::PairUpdated(u),
            MatrixChange::Deleted(d) => SampleMutation::PairDeleted(d),
        });
        changes.collect(&self.owners, |change| match change {
            MatrixChange::Updated(u) => SampleMutation::OwnerUpdated(u),
            MatrixChange::Deleted(d) => SampleMutation::OwnerDeleted(d),
        });
        changes.collect(&self.links, |change| match change {
            MatrixChange::Updated(u) => SampleMutation::LinkUpdated(u),
            MatrixChange::Deleted(d) => SampleMutation::LinkDeleted(d),
        });
    }

    fn commit(&mut self) {
        self.records.commit();
        self.uone_to_uone.commit();
        self.owners.commit();
        self.links.commit();
    }

    fn rollback(&mut self) {
        self.records.rollback();
        self.uone_to_uone.rollback();
        self.owners.rollback();
        self.links.rollback();
    }

    fn replay(&mut self, mutation: &SampleMutation) {
        match mutation {
            SampleMutation::RecordUpdated(u) => self.records.replay_updated(u),
            SampleMutation::RecordDeleted(d) => self.records.replay_deleted(d),
            SampleMutation::RecordPatched(p) => self.records.replay_patched(p),
            SampleMutation::PairUpdated(u) => self.uone_to_uone.replay_updated(u),
            SampleMutation::PairDeleted(d) => self.uone_to_uone.replay_deleted(d),
            SampleMutation::OwnerUpdated(u) => self.owners.replay_updated(u),
            SampleMutation::OwnerDeleted(d) => self.owners.replay_deleted(d),
            SampleMutation::LinkUpdated(u) => self.links.replay_updated(u),
            SampleMutation::LinkDeleted(d) => self.links.replay_deleted(d),
        }
    }

    fn field_names() -> &'static [&'static str] {
        &["records", "uone_to_uone", "owners", "links"]
    }
}

/// Comparable copy of a [`Sample`], including last-modified timestamps.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SampleState {
    /// Records in key order, with their last-modified timestamp.
    pub records: Vec<(Record, Option<Micros>)>,
    /// `uone_to_uone` cells, sorted.
    pub uone_to_uone: Vec<(Cell, Option<Micros>)>,
    /// `owners` cells, sorted.
    pub owners: Vec<(Cell, Option<Micros>)>,
    /// `links` cells, sorted.
    pub links: Vec<(Cell, Option<Micros>)>,
}

impl Sample {
    /// Captures the current contents.
    pub fn state(&self) -> SampleState {
        SampleState {
            records: self
                .records
                .iter()
                .map(|r| (r.clone(), self.records.last_modified(&r.name)))
                .collect(),
            uone_to_uone: sorted_cells(self.uone_to_uone.iter(), |c| {
                self.uone_to_uone.last_modified(&c.row, &c.col)
            }),
            owners: sorted_cells(self.owners.iter(), |c| {
                self.owners.last_modified(&c.row, &c.col)
            }),
            links: sorted_cells(self.links.iter(), |c| self.links.last_modified(&c.row, &c.col)),
        }
    }
}

fn sorted_cells<'a>(
    cells: impl Iterator<Item = &'a Cell>,
    modified: impl Fn(&Cell) -> Option<Micros>,
) -> Vec<(Cell, Option<Micros>)> {
    let mut out: Vec<_> = cells.map(|c| (c.clone(), modified(c))).collect();
    out.sort();
    out
}

/// Storage over [`Sample`].
pub type SampleStorage = Storage<Sample>;

/// Stream of [`Sample`] transactions.
pub type SampleStream = Stream<Transaction<SampleMutation>>;

/// Storage config with a step clock starting at `start`.
pub fn step_config(start: Micros) -> StorageConfig {
    StorageConfig::default()
        .clock(StepClock::shared(start, 1))
        .replay_poll_interval(Duration::from_millis(10))
}

/// In-memory master storage with a step clock starting at `start`.
pub fn sample_master(start: Micros) -> SampleStorage {
    Storage::in_memory_master(step_config(start)).expect("Failed to create master storage")
}

/// Snapshot of a storage, taken inside a read-only transaction.
pub fn snapshot(storage: &SampleStorage) -> SampleState {
    storage
        .read_only(|txn| txn.state())
        .wait()
        .committed()
        .expect("Snapshot transaction failed")
}

/// Waits until `follower` has applied everything up to `master`'s head.
pub fn wait_caught_up(follower: &SampleStorage, master: &SampleStream) -> bool {
    follower.wait_for_applied(master.head(), Duration::from_secs(5))
}

/// File logs in a temporary directory removed on drop.
pub struct TestLogs {
    dir: TempDir,
}

impl TestLogs {
    /// Creates an empty temporary directory.
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Path of the log called `name`.
    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(format!("{name}.log"))
    }

    /// Opens, or creates, the log called `name` as a stream.
    pub fn stream(&self, name: &str) -> SampleStream {
        let log = Log::open_file(&self.path(name), LogConfig::default())
            .expect("Failed to open file log");
        Stream::new(log)
    }

    /// Raw bytes of the log called `name`.
    pub fn bytes(&self, name: &str) -> Vec<u8> {
        FileBackend::open_read_only(&self.path(name))
            .and_then(|backend| backend.read_all())
            .expect("Failed to read log file")
    }
}

impl Default for TestLogs {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_names_match_containers() {
        let storage = sample_master(1);
        assert_eq!(
            storage.field_names(),
            &["records", "uone_to_uone", "owners", "links"]
        );
    }

    #[test]
    fn state_reports_last_modified() {
        let storage = sample_master(10);
        storage
            .read_write(|txn| {
                txn.records.add(Record::new("a", 1));
                txn.links.add(Cell::new(1, "x", 2));
                Ok(())
            })
            .wait();

        let state = snapshot(&storage);
        assert_eq!(state.records, vec![(Record::new("a", 1), Some(11))]);
        assert_eq!(state.links, vec![(Cell::new(1, "x", 2), Some(12))]);
        assert!(state.owners.is_empty());
    }

    #[test]
    fn file_logs_reopen() {
        let logs = TestLogs::new();
        let stream = logs.stream("main");
        let storage: SampleStorage =
            Storage::master(stream, step_config(1)).expect("master storage");
        storage
            .read_write(|txn| {
                txn.records.add(Record::new("a", 1));
                Ok(())
            })
            .wait();
        drop(storage);

        let reopened = logs.stream("main");
        assert_eq!(reopened.size(), 1);
        assert!(!logs.bytes("main").is_empty());
    }
}
