//! Forward-store abstraction layer for Tessera.
//!
//! The forward store maps a document id to its serialized document. It is the
//! only durable state of an indexer: the reverse index is rebuilt from it on
//! start-up. Backends can be swapped without touching the
//! [`Indexer`](crate::index::Indexer).
//!
//! # Backends
//!
//! ## MemoryStore
//! - Ordered in-memory map
//! - Fast but non-persistent; used by tests
//!
//! ## SnapshotStore
//! - Ordered map persisted to a single checksummed file
//! - Written on `flush`/`close` through a temp file and rename
//!
//! ## LogStore
//! - Append-only log of put/delete records with an in-memory key directory
//! - Replayed on open, reclaimed with `compact`
//!
//! # Example
//!
//! ```
//! use tessera::storage::{ForwardStore, StoreConfig, StoreKind, open_store};
//!
//! # fn main() -> tessera::error::Result<()> {
//! let store = open_store(&StoreConfig::new(StoreKind::Memory, ""))?;
//! store.set(b"doc-1", b"bytes")?;
//! assert_eq!(store.get(b"doc-1")?, Some(b"bytes".to_vec()));
//! assert_eq!(store.get(b"doc-2")?, None);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use log::info;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TesseraError};

pub mod log_store;
pub mod memory;
pub mod snapshot;

pub use log_store::LogStore;
pub use memory::MemoryStore;
pub use snapshot::SnapshotStore;

/// Callback invoked per record by [`ForwardStore::iter_db`].
pub type EntryVisitor<'a> = dyn FnMut(&[u8], &[u8]) -> Result<()> + 'a;

/// Callback invoked per key by [`ForwardStore::iter_key`].
pub type KeyVisitor<'a> = dyn FnMut(&[u8]) -> Result<()> + 'a;

/// A key/value store of serialized documents keyed by document id.
///
/// A missing key is `Ok(None)`, not an error. Implementations synchronize
/// internally so a store can be shared across threads.
pub trait ForwardStore: Send + Sync + fmt::Debug {
    /// Location of the backing file, if any.
    fn path(&self) -> Option<&Path>;

    /// Write `value` under `key`.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Write many pairs; `keys` and `values` must have the same length.
    fn batch_set(&self, keys: &[Vec<u8>], values: &[Vec<u8>]) -> Result<()> {
        if keys.len() != values.len() {
            return Err(TesseraError::invalid_argument(format!(
                "batch_set got {} keys and {} values",
                keys.len(),
                values.len()
            )));
        }
        for (key, value) in keys.iter().zip(values) {
            self.set(key, value)?;
        }
        Ok(())
    }

    /// Read the value under `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Read many keys. The result has one slot per input key; missing keys are `None`.
    fn batch_get(&self, keys: &[Vec<u8>]) -> Result<Vec<Option<Vec<u8>>>> {
        keys.iter().map(|k| self.get(k)).collect()
    }

    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Remove many keys.
    fn batch_delete(&self, keys: &[Vec<u8>]) -> Result<()> {
        for key in keys {
            self.delete(key)?;
        }
        Ok(())
    }

    /// Whether `key` is present.
    fn has(&self, key: &[u8]) -> bool;

    /// Visit every record in key order, returning how many were visited.
    ///
    /// An error from `visit` stops the iteration and is returned.
    fn iter_db(&self, visit: &mut EntryVisitor<'_>) -> Result<usize>;

    /// Visit every key in key order, returning how many were visited.
    fn iter_key(&self, visit: &mut KeyVisitor<'_>) -> Result<usize>;

    /// Persist buffered state.
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Flush and release the store. Further writes fail.
    fn close(&self) -> Result<()>;
}

/// Available forward-store backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Memory,
    Snapshot,
    #[default]
    Log,
}

impl std::str::FromStr for StoreKind {
    type Err = TesseraError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreKind::Memory),
            "snapshot" => Ok(StoreKind::Snapshot),
            "log" => Ok(StoreKind::Log),
            other => Err(TesseraError::invalid_argument(format!(
                "unknown store kind '{other}'"
            ))),
        }
    }
}

/// Backend selection and location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub kind: StoreKind,
    /// File holding the store; ignored by the memory backend.
    pub path: PathBuf,
}

impl StoreConfig {
    pub fn new<P: Into<PathBuf>>(kind: StoreKind, path: P) -> Self {
        StoreConfig {
            kind,
            path: path.into(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::new(StoreKind::default(), "data/tessera.log")
    }
}

/// Open the configured backend, creating the parent directory if needed.
pub fn open_store(config: &StoreConfig) -> Result<Box<dyn ForwardStore>> {
    if config.kind == StoreKind::Memory {
        return Ok(Box::new(MemoryStore::new()));
    }

    if let Some(parent) = config.path.parent() {
        if !parent.as_os_str().is_empty() {
            if parent.exists() && !parent.is_dir() {
                return Err(TesseraError::store(format!(
                    "{} is not a directory",
                    parent.display()
                )));
            }
            if !parent.exists() {
                std::fs::create_dir_all(parent)?;
                info!("created store directory {}", parent.display());
            }
        }
    }

    Ok(match config.kind {
        StoreKind::Snapshot => Box::new(SnapshotStore::open(&config.path)?),
        _ => Box::new(LogStore::open(&config.path)?),
    })
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_store_kind_from_str() {
        assert_eq!("LOG".parse::<StoreKind>().unwrap(), StoreKind::Log);
        assert_eq!("snapshot".parse::<StoreKind>().unwrap(), StoreKind::Snapshot);
        assert!("bolt".parse::<StoreKind>().is_err());
    }

    #[test]
    fn test_open_store_creates_parent() {
        let dir = TempDir::new().unwrap();
        for kind in [StoreKind::Log, StoreKind::Snapshot] {
            let path = dir.path().join(format!("{kind:?}")).join("store.db");
            let store = open_store(&StoreConfig::new(kind, &path)).unwrap();
            store.set(b"k", b"v").unwrap();
            store.close().unwrap();
            assert!(path.parent().unwrap().is_dir());
        }
    }

    #[test]
    fn test_default_batch_operations() {
        let store = MemoryStore::new();
        let keys = vec![b"a".to_vec(), b"b".to_vec()];
        store
            .batch_set(&keys, &[b"1".to_vec(), b"2".to_vec()])
            .unwrap();
        assert!(store.batch_set(&keys, &[]).is_err());

        let got = store
            .batch_get(&[b"a".to_vec(), b"x".to_vec(), b"b".to_vec()])
            .unwrap();
        assert_eq!(got, vec![Some(b"1".to_vec()), None, Some(b"2".to_vec())]);

        store.batch_delete(&keys).unwrap();
        assert!(!store.has(b"a"));
    }
}
