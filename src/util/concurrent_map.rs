//! Lock-striped concurrent hash map.
//!
//! The map is split into independent buckets, each guarded by its own
//! reader/writer lock. A key always lives in bucket `hash(key) % buckets`, so
//! operations on keys in different buckets never contend.

use std::hash::BuildHasher;

use ahash::{AHashMap, RandomState};
use parking_lot::RwLock;

/// A sharded, lock-striped map from string keys to cloneable values.
///
/// Values are returned by clone, so large values should be wrapped in an
/// `Arc` by the caller.
#[derive(Debug)]
pub struct ConcurrentMap<V> {
    buckets: Vec<RwLock<AHashMap<String, V>>>,
    hasher: RandomState,
}

impl<V: Clone> ConcurrentMap<V> {
    /// Create a map with one bucket per available CPU.
    pub fn new(capacity: usize) -> Self {
        Self::with_buckets(num_cpus::get(), capacity)
    }

    /// Create a map with an explicit bucket count.
    ///
    /// `capacity` is the expected total number of keys and is spread evenly
    /// across buckets.
    pub fn with_buckets(buckets: usize, capacity: usize) -> Self {
        let buckets = buckets.max(1);
        let per_bucket = capacity / buckets;
        ConcurrentMap {
            buckets: (0..buckets)
                .map(|_| RwLock::new(AHashMap::with_capacity(per_bucket)))
                .collect(),
            hasher: RandomState::new(),
        }
    }

    fn bucket_of(&self, key: &str) -> usize {
        (self.hasher.hash_one(key) % self.buckets.len() as u64) as usize
    }

    /// Look up a key.
    pub fn get(&self, key: &str) -> Option<V> {
        self.buckets[self.bucket_of(key)].read().get(key).cloned()
    }

    /// Insert or overwrite a key.
    pub fn set(&self, key: impl Into<String>, value: V) {
        let key = key.into();
        let bucket = self.bucket_of(&key);
        self.buckets[bucket].write().insert(key, value);
    }

    /// Return the value for `key`, inserting the result of `make` if absent.
    ///
    /// The lookup and insert happen under one bucket write lock.
    pub fn get_or_insert_with(&self, key: &str, make: impl FnOnce() -> V) -> V {
        let mut bucket = self.buckets[self.bucket_of(key)].write();
        if let Some(value) = bucket.get(key) {
            return value.clone();
        }
        let value = make();
        bucket.insert(key.to_string(), value.clone());
        value
    }

    /// Remove a key, returning its value if present.
    pub fn remove(&self, key: &str) -> Option<V> {
        self.buckets[self.bucket_of(key)].write().remove(key)
    }

    /// Total number of keys across all buckets.
    pub fn len(&self) -> usize {
        self.buckets.iter().map(|b| b.read().len()).sum()
    }

    /// Whether the map holds no keys.
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(|b| b.read().is_empty())
    }

    /// Create an iterator over the map.
    ///
    /// Each bucket's key set is captured when the iterator is created; values
    /// are fetched lazily as the iterator advances. A key removed after the
    /// snapshot yields `None` for its value, and keys inserted after the
    /// snapshot are not visited.
    pub fn iter(&self) -> ConcurrentMapIter<'_, V> {
        let keys = self
            .buckets
            .iter()
            .map(|b| b.read().keys().cloned().collect::<Vec<_>>())
            .collect();
        ConcurrentMapIter {
            map: self,
            keys,
            row: 0,
            col: 0,
        }
    }
}

/// Iterator produced by [`ConcurrentMap::iter`].
pub struct ConcurrentMapIter<'a, V> {
    map: &'a ConcurrentMap<V>,
    keys: Vec<Vec<String>>,
    row: usize,
    col: usize,
}

impl<V: Clone> Iterator for ConcurrentMapIter<'_, V> {
    type Item = (String, Option<V>);

    fn next(&mut self) -> Option<Self::Item> {
        while self.row < self.keys.len() {
            if self.col < self.keys[self.row].len() {
                let key = std::mem::take(&mut self.keys[self.row][self.col]);
                self.col += 1;
                let value = self.map.get(&key);
                return Some((key, value));
            }
            self.row += 1;
            self.col = 0;
        }
        None
    }
}
