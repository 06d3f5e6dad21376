//! In-memory forward store for testing and ephemeral indexers.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;

use crate::error::{Result, TesseraError};
use crate::storage::{EntryVisitor, ForwardStore, KeyVisitor};

/// An ordered in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Create a new, empty memory store.
    pub fn new() -> Self {
        Self::default()
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(TesseraError::store("store is closed"))
        } else {
            Ok(())
        }
    }

    /// Get the number of records.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ForwardStore for MemoryStore {
    fn path(&self) -> Option<&Path> {
        None
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_closed()?;
        self.entries.write().insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_closed()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_closed()?;
        self.entries.write().remove(key);
        Ok(())
    }

    fn has(&self, key: &[u8]) -> bool {
        self.entries.read().contains_key(key)
    }

    fn iter_db(&self, visit: &mut EntryVisitor<'_>) -> Result<usize> {
        self.check_closed()?;
        // Visit a snapshot so callbacks may write back into the store.
        let snapshot: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        for (key, value) in &snapshot {
            visit(key, value)?;
        }
        Ok(snapshot.len())
    }

    fn iter_key(&self, visit: &mut KeyVisitor<'_>) -> Result<usize> {
        self.check_closed()?;
        let keys: Vec<_> = self.entries.read().keys().cloned().collect();
        for key in &keys {
            visit(key)?;
        }
        Ok(keys.len())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_store_basic() {
        let store = MemoryStore::new();
        store.set(b"b", b"2").unwrap();
        store.set(b"a", b"1").unwrap();
        assert_eq!(store.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert!(store.has(b"b"));

        let mut keys = Vec::new();
        let n = store
            .iter_key(&mut |k| {
                keys.push(k.to_vec());
                Ok(())
            })
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);

        store.delete(b"a").unwrap();
        store.delete(b"missing").unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_iter_db_stops_on_error() {
        let store = MemoryStore::new();
        store.set(b"a", b"1").unwrap();
        store.set(b"b", b"2").unwrap();
        let result = store.iter_db(&mut |_, _| Err(TesseraError::other("stop")));
        assert!(result.is_err());
    }

    #[test]
    fn test_closed_store_rejects_writes() {
        let store = MemoryStore::new();
        store.close().unwrap();
        assert!(store.set(b"a", b"1").is_err());
    }
}
