//! Key maps backing container indexes.
//!
//! The ordering axis of a container is a type parameter implementing
//! [`IndexKind`]: [`Ordered`] stores keys in a `BTreeMap` and iterates them in
//! key order, [`Unordered`] stores them in a `HashMap`. The axis changes
//! iteration order only, never uniqueness semantics.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::hash::Hash;

/// Bounds required of every container key.
pub trait Key:
    Clone + Eq + Ord + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Key for T where
    T: Clone + Eq + Ord + Hash + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

/// Minimal map interface shared by ordered and unordered indexes.
pub trait KeyMap<K: Key, V>: Default {
    /// Returns the value stored under `key`.
    fn get(&self, key: &K) -> Option<&V>;

    /// Returns a mutable reference to the value stored under `key`.
    fn get_mut(&mut self, key: &K) -> Option<&mut V>;

    /// Inserts a value, returning the previous one.
    fn insert(&mut self, key: K, value: V) -> Option<V>;

    /// Removes a value, returning it.
    fn remove(&mut self, key: &K) -> Option<V>;

    /// Returns the number of keys.
    fn len(&self) -> usize;

    /// Returns true if the map holds no keys.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `key` is present.
    fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Iterates over entries in the map's native order.
    fn iter(&self) -> Box<dyn Iterator<Item = (&K, &V)> + '_>;
}

impl<K: Key, V> KeyMap<K, V> for BTreeMap<K, V> {
    fn get(&self, key: &K) -> Option<&V> {
        BTreeMap::get(self, key)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        BTreeMap::get_mut(self, key)
    }

    fn insert(&mut self, key: K, value: V) -> Option<V> {
        BTreeMap::insert(self, key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        BTreeMap::remove(self, key)
    }

    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&K, &V)> + '_> {
        Box::new(BTreeMap::iter(self))
    }
}

impl<K: Key, V> KeyMap<K, V> for HashMap<K, V> {
    fn get(&self, key: &K) -> Option<&V> {
        HashMap::get(self, key)
    }

    fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        HashMap::get_mut(self, key)
    }

    fn insert(&mut self, key: K, value: V) -> Option<V> {
        HashMap::insert(self, key, value)
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        HashMap::remove(self, key)
    }

    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn iter(&self) -> Box<dyn Iterator<Item = (&K, &V)> + '_> {
        Box::new(HashMap::iter(self))
    }
}

/// Selects the map type used for an index.
pub trait IndexKind: Send + Sync + 'static {
    /// Map type for keys `K` and values `V`.
    type Map<K: Key, V>: KeyMap<K, V>;

    /// Whether iteration follows key order.
    const ORDERED: bool;
}

/// Keys iterate in ascending order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Ordered;

/// Keys iterate in an unspecified order.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unordered;

impl IndexKind for Ordered {
    type Map<K: Key, V> = BTreeMap<K, V>;
    const ORDERED: bool = true;
}

impl IndexKind for Unordered {
    type Map<K: Key, V> = HashMap<K, V>;
    const ORDERED: bool = false;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill<M: KeyMap<u32, &'static str>>() -> M {
        let mut map = M::default();
        map.insert(3, "c");
        map.insert(1, "a");
        map.insert(2, "b");
        map
    }

    #[test]
    fn ordered_iterates_in_key_order() {
        let map: <Ordered as IndexKind>::Map<u32, &str> = fill();
        let keys: Vec<u32> = map.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec![1, 2, 3]);
        assert!(Ordered::ORDERED);
    }

    #[test]
    fn unordered_holds_same_keys() {
        let mut map: <Unordered as IndexKind>::Map<u32, &str> = fill();
        let mut keys: Vec<u32> = map.iter().map(|(k, _)| *k).collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![1, 2, 3]);
        assert_eq!(KeyMap::remove(&mut map, &2), Some("b"));
        assert!(!KeyMap::contains_key(&map, &2));
        assert_eq!(KeyMap::len(&map), 2);
    }
}
