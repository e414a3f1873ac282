//! Key to entry map.

use super::index::{IndexKind, KeyMap, Ordered};
use super::{Container, DictEntry, Journal};
use crate::clock::Micros;
use crate::mutation::{Deleted, DictChange, Patched, Updated};
use std::fmt;

struct Undo<E: DictEntry> {
    key: E::Key,
    previous: Option<E>,
    previous_modified: Option<Micros>,
}

struct Pending<E: DictEntry> {
    seq: u64,
    change: DictChange<E>,
    undo: Undo<E>,
}

/// A map from key to entry.
///
/// `add` overwrites, `erase` of an absent key does nothing. Each effective
/// mutation is journaled until the owning transaction commits or rolls back.
pub struct Dictionary<E: DictEntry, O: IndexKind = Ordered> {
    name: &'static str,
    journal: Journal,
    entries: O::Map<E::Key, E>,
    last_modified: O::Map<E::Key, Micros>,
    pending: Vec<Pending<E>>,
}

impl<E: DictEntry, O: IndexKind> Dictionary<E, O> {
    /// Creates an empty dictionary named `name`.
    #[must_use]
    pub fn new(journal: &Journal, name: &'static str) -> Self {
        Self {
            name,
            journal: journal.clone(),
            entries: Default::default(),
            last_modified: Default::default(),
            pending: Vec::new(),
        }
    }

    /// Inserts or overwrites the entry under its key.
    pub fn add(&mut self, entry: E) {
        let us = self.journal.now_us();
        let key = entry.key();
        let previous = self.entries.insert(key.clone(), entry.clone());
        let previous_modified = self.last_modified.insert(key.clone(), us);
        self.record(
            DictChange::Updated(Updated { us, data: entry }),
            Undo {
                key,
                previous,
                previous_modified,
            },
        );
    }

    /// Removes the entry under `key`, if any.
    pub fn erase(&mut self, key: &E::Key) {
        let Some(previous) = self.entries.remove(key) else {
            return;
        };
        let us = self.journal.now_us();
        let previous_modified = self.last_modified.insert(key.clone(), us);
        self.record(
            DictChange::Deleted(Deleted {
                us,
                key: key.clone(),
            }),
            Undo {
                key: key.clone(),
                previous: Some(previous),
                previous_modified,
            },
        );
    }

    /// Applies a partial update to the entry under `key`.
    ///
    /// Returns false, and records nothing, when the key is absent.
    pub fn patch(&mut self, key: &E::Key, patch: E::Patch) -> bool {
        let Some(entry) = self.entries.get_mut(key) else {
            return false;
        };
        let previous = entry.clone();
        entry.apply_patch(&patch);
        let us = self.journal.now_us();
        let previous_modified = self.last_modified.insert(key.clone(), us);
        self.record(
            DictChange::Patched(Patched {
                us,
                key: key.clone(),
                patch,
            }),
            Undo {
                key: key.clone(),
                previous: Some(previous),
                previous_modified,
            },
        );
        true
    }

    /// Returns the entry under `key`.
    #[must_use]
    pub fn get(&self, key: &E::Key) -> Option<&E> {
        self.entries.get(key)
    }

    /// Returns true if an entry exists under `key`.
    #[must_use]
    pub fn has(&self, key: &E::Key) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the dictionary is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Timestamp of the latest add, erase or patch of `key`.
    #[must_use]
    pub fn last_modified(&self, key: &E::Key) -> Option<Micros> {
        self.last_modified.get(key).copied()
    }

    /// Iterates over entries in index order.
    pub fn iter(&self) -> impl Iterator<Item = &E> + '_ {
        self.entries.iter().map(|(_, entry)| entry)
    }

    /// Iterates over keys in index order.
    pub fn keys(&self) -> impl Iterator<Item = &E::Key> + '_ {
        self.entries.iter().map(|(key, _)| key)
    }

    /// Applies a logged `Updated` change.
    pub fn replay_updated(&mut self, change: &Updated<E>) {
        let key = change.data.key();
        self.entries.insert(key.clone(), change.data.clone());
        self.last_modified.insert(key, change.us);
    }

    /// Applies a logged `Deleted` change.
    pub fn replay_deleted(&mut self, change: &Deleted<E::Key>) {
        self.entries.remove(&change.key);
        self.last_modified.insert(change.key.clone(), change.us);
    }

    /// Applies a logged `Patched` change.
    pub fn replay_patched(&mut self, change: &Patched<E::Key, E::Patch>) {
        if let Some(entry) = self.entries.get_mut(&change.key) {
            entry.apply_patch(&change.patch);
            self.last_modified.insert(change.key.clone(), change.us);
        }
    }

    fn record(&mut self, change: DictChange<E>, undo: Undo<E>) {
        let seq = self.journal.next_seq();
        self.pending.push(Pending { seq, change, undo });
    }
}

impl<E: DictEntry, O: IndexKind> Container for Dictionary<E, O> {
    type Change = DictChange<E>;

    fn field_name(&self) -> &'static str {
        self.name
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn pending_changes(&self) -> Vec<(u64, DictChange<E>)> {
        self.pending
            .iter()
            .map(|pending| (pending.seq, pending.change.clone()))
            .collect()
    }

    fn commit(&mut self) {
        self.pending.clear();
    }

    fn rollback(&mut self) {
        while let Some(Pending { undo, .. }) = self.pending.pop() {
            match undo.previous {
                Some(entry) => self.entries.insert(undo.key.clone(), entry),
                None => self.entries.remove(&undo.key),
            };
            match undo.previous_modified {
                Some(us) => self.last_modified.insert(undo.key, us),
                None => self.last_modified.remove(&undo.key),
            };
        }
    }

    fn replay(&mut self, change: &DictChange<E>) {
        match change {
            DictChange::Updated(c) => self.replay_updated(c),
            DictChange::Deleted(c) => self.replay_deleted(c),
            DictChange::Patched(c) => self.replay_patched(c),
        }
    }
}

impl<E: DictEntry, O: IndexKind> fmt::Debug for Dictionary<E, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dictionary")
            .field("name", &self.name)
            .field("len", &self.entries.len())
            .field("pending", &self.pending.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::StepClock;
    use crate::container::Unordered;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Counter {
        name: String,
        value: i64,
    }

    impl DictEntry for Counter {
        type Key = String;
        type Patch = i64;

        fn key(&self) -> String {
            self.name.clone()
        }

        fn apply_patch(&mut self, delta: &i64) {
            self.value += delta;
        }
    }

    fn counter(name: &str, value: i64) -> Counter {
        Counter {
            name: name.to_string(),
            value,
        }
    }

    fn dictionary() -> Dictionary<Counter> {
        Dictionary::new(&Journal::new(StepClock::shared(100, 1)), "counters")
    }

    fn drain(dict: &mut Dictionary<Counter>) -> Vec<(u64, DictChange<Counter>)> {
        let changes = dict.pending_changes();
        dict.commit();
        changes
    }

    #[test]
    fn add_overwrites_with_single_update() {
        let mut dict = dictionary();
        dict.add(counter("a", 1));
        dict.add(counter("a", 2));

        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(&"a".to_string()).map(|c| c.value), Some(2));
        assert_eq!(dict.last_modified(&"a".to_string()), Some(101));

        let changes = drain(&mut dict);
        assert_eq!(changes.len(), 2);
        assert!(changes
            .iter()
            .all(|(_, change)| matches!(change, DictChange::Updated(_))));
    }

    #[test]
    fn erase_absent_key_is_noop() {
        let mut dict = dictionary();
        dict.erase(&"missing".to_string());
        assert!(drain(&mut dict).is_empty());
        assert_eq!(dict.last_modified(&"missing".to_string()), None);
    }

    #[test]
    fn erase_records_timestamp() {
        let mut dict = dictionary();
        dict.add(counter("a", 1));
        dict.erase(&"a".to_string());
        assert!(!dict.has(&"a".to_string()));
        assert_eq!(dict.last_modified(&"a".to_string()), Some(101));

        let changes = drain(&mut dict);
        assert_eq!(
            changes[1].1,
            DictChange::Deleted(Deleted {
                us: 101,
                key: "a".to_string()
            })
        );
    }

    #[test]
    fn patch_updates_in_place() {
        let mut dict = dictionary();
        dict.add(counter("a", 1));
        assert!(dict.patch(&"a".to_string(), 5));
        assert!(!dict.patch(&"b".to_string(), 5));
        assert_eq!(dict.get(&"a".to_string()).map(|c| c.value), Some(6));
        assert_eq!(drain(&mut dict).len(), 2);
    }

    #[test]
    fn rollback_restores_previous_state() {
        let mut dict = dictionary();
        dict.add(counter("a", 1));
        drain(&mut dict);

        dict.add(counter("a", 10));
        dict.add(counter("b", 2));
        dict.patch(&"a".to_string(), 1);
        dict.erase(&"a".to_string());
        dict.rollback();

        assert_eq!(dict.len(), 1);
        assert_eq!(dict.get(&"a".to_string()), Some(&counter("a", 1)));
        assert_eq!(dict.last_modified(&"a".to_string()), Some(100));
        assert_eq!(dict.last_modified(&"b".to_string()), None);
        assert!(drain(&mut dict).is_empty());
    }

    #[test]
    fn replay_matches_live_changes() {
        let mut live = dictionary();
        live.add(counter("a", 1));
        live.add(counter("b", 2));
        live.patch(&"a".to_string(), 3);
        live.erase(&"b".to_string());

        let mut replica = dictionary();
        for (_, change) in drain(&mut live) {
            replica.replay(&change);
        }

        assert_eq!(replica.iter().collect::<Vec<_>>(), live.iter().collect::<Vec<_>>());
        assert_eq!(replica.last_modified(&"b".to_string()), Some(103));
        assert!(drain(&mut replica).is_empty());
    }

    #[test]
    fn ordered_keys_iterate_sorted() {
        let mut dict = dictionary();
        for name in ["c", "a", "b"] {
            dict.add(counter(name, 0));
        }
        let keys: Vec<&str> = dict.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
    }

    #[test]
    fn unordered_dictionary_has_same_contents() {
        let journal = Journal::new(StepClock::shared(1, 1));
        let mut dict: Dictionary<Counter, Unordered> = Dictionary::new(&journal, "counters");
        dict.add(counter("x", 1));
        dict.add(counter("y", 2));
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.field_name(), "counters");
    }
}
