//! Schema description: the fixed set of containers a storage owns.

use crate::container::{Container, Journal};
use crate::mutation::MutationRecord;

/// The containers of a storage and the mapping of their changes to the
/// storage's mutation type.
///
/// Implementations list every container explicitly:
///
/// ```rust,ignore
/// impl Schema for Inventory {
///     type Mutation = Mutation;
///
///     fn new(journal: &Journal) -> Self {
///         Self { items: Dictionary::new(journal, "items") }
///     }
///
///     fn collect_changes(&self, changes: &mut ChangeSet<Mutation>) {
///         changes.collect(&self.items, |change| match change {
///             DictChange::Updated(u) => Mutation::ItemUpdated(u),
///             DictChange::Deleted(d) => Mutation::ItemDeleted(d),
///             DictChange::Patched(p) => Mutation::ItemPatched(p),
///         });
///     }
///
///     fn commit(&mut self) {
///         self.items.commit();
///     }
///
///     fn rollback(&mut self) {
///         self.items.rollback();
///     }
///
///     fn replay(&mut self, mutation: &Mutation) {
///         match mutation {
///             Mutation::ItemUpdated(u) => self.items.replay_updated(u),
///             Mutation::ItemDeleted(d) => self.items.replay_deleted(d),
///             Mutation::ItemPatched(p) => self.items.replay_patched(p),
///         }
///     }
///
///     fn field_names() -> &'static [&'static str] {
///         &["items"]
///     }
/// }
/// ```
pub trait Schema: Send + 'static {
    /// Persisted mutation type, one variant per container and change kind.
    type Mutation: MutationRecord;

    /// Creates empty containers sharing `journal`.
    fn new(journal: &Journal) -> Self;

    /// Adds every journaled change of every container to `changes`.
    fn collect_changes(&self, changes: &mut ChangeSet<Self::Mutation>);

    /// Makes journaled changes permanent in every container.
    fn commit(&mut self);

    /// Undoes journaled changes in every container.
    fn rollback(&mut self);

    /// Applies one logged mutation.
    fn replay(&mut self, mutation: &Self::Mutation);

    /// Names of the containers, in declaration order.
    fn field_names() -> &'static [&'static str];
}

/// Changes gathered from several containers, ordered at the end by the
/// journal sequence so mutations come out in the order they were made.
#[derive(Debug)]
pub struct ChangeSet<M> {
    items: Vec<(u64, M)>,
}

impl<M> Default for ChangeSet<M> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<M> ChangeSet<M> {
    /// Creates an empty change set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds the journaled changes of `container`, converted with `wrap`.
    pub fn collect<C, F>(&mut self, container: &C, wrap: F)
    where
        C: Container,
        F: Fn(C::Change) -> M,
    {
        self.items.extend(
            container
                .pending_changes()
                .into_iter()
                .map(|(seq, change)| (seq, wrap(change))),
        );
    }

    /// Number of gathered changes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if nothing was gathered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the mutations in the order they were made.
    #[must_use]
    pub fn into_mutations(mut self) -> Vec<M> {
        self.items.sort_by_key(|(seq, _)| *seq);
        self.items.into_iter().map(|(_, m)| m).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::StepClock;
    use crate::container::{DictEntry, Dictionary};
    use crate::mutation::DictChange;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tag(String);

    impl DictEntry for Tag {
        type Key = String;
        type Patch = ();

        fn key(&self) -> String {
            self.0.clone()
        }
    }

    #[test]
    fn mutations_follow_journal_order_across_containers() {
        let journal = Journal::new(StepClock::shared(1, 1));
        let mut left: Dictionary<Tag> = Dictionary::new(&journal, "left");
        let mut right: Dictionary<Tag> = Dictionary::new(&journal, "right");
        left.add(Tag("a".into()));
        right.add(Tag("b".into()));
        left.add(Tag("c".into()));

        let mut changes = ChangeSet::new();
        let label = |side: &'static str| {
            move |change: DictChange<Tag>| match change {
                DictChange::Updated(u) => format!("{side}:{}", u.data.0),
                _ => String::new(),
            }
        };
        changes.collect(&left, label("left"));
        changes.collect(&right, label("right"));
        assert_eq!(changes.len(), 3);
        assert_eq!(
            changes.into_mutations(),
            vec!["left:a", "right:b", "left:c"]
        );
    }
}
