//! Ordered single-file forward store.
//!
//! All records live in an ordered in-memory map. `flush` writes the whole map
//! to one file: a header (magic, format version, payload length, CRC-32)
//! followed by the bincode-encoded entries. The file is replaced atomically by
//! writing a sibling temp file and renaming it over the original.

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{debug, info};
use parking_lot::{Mutex, RwLock};

use crate::error::{Result, TesseraError};
use crate::storage::{EntryVisitor, ForwardStore, KeyVisitor};

const MAGIC: u32 = 0x5453_4e50; // "TSNP"
const FORMAT_VERSION: u32 = 1;

/// A forward store persisted as one ordered snapshot file.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    entries: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
    dirty: AtomicBool,
    closed: AtomicBool,
    write_lock: Mutex<()>,
}

impl SnapshotStore {
    /// Open the snapshot at `path`, starting empty if the file does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let entries = if path.exists() {
            Self::load(&path)?
        } else {
            BTreeMap::new()
        };
        info!(
            "opened snapshot store {} with {} records",
            path.display(),
            entries.len()
        );
        Ok(SnapshotStore {
            path,
            entries: RwLock::new(entries),
            dirty: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            write_lock: Mutex::new(()),
        })
    }

    fn load(path: &Path) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        let mut reader = BufReader::new(File::open(path)?);
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(TesseraError::store(format!(
                "{} is not a snapshot file",
                path.display()
            )));
        }
        let version = reader.read_u32::<LittleEndian>()?;
        if version != FORMAT_VERSION {
            return Err(TesseraError::store(format!(
                "unsupported snapshot version {version}"
            )));
        }
        let len = reader.read_u64::<LittleEndian>()? as usize;
        let checksum = reader.read_u32::<LittleEndian>()?;

        let mut payload = vec![0u8; len];
        reader.read_exact(&mut payload)?;
        if crc32fast::hash(&payload) != checksum {
            return Err(TesseraError::store(format!(
                "checksum mismatch in {}",
                path.display()
            )));
        }

        let pairs: Vec<(Vec<u8>, Vec<u8>)> = bincode::deserialize(&payload)?;
        Ok(pairs.into_iter().collect())
    }

    fn write_snapshot(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }
        self.persist().inspect_err(|_| self.dirty.store(true, Ordering::Release))
    }

    fn persist(&self) -> Result<()> {
        let payload = {
            let entries = self.entries.read();
            let pairs: Vec<(&Vec<u8>, &Vec<u8>)> = entries.iter().collect();
            bincode::serialize(&pairs)?
        };

        let tmp = self.path.with_extension("tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            writer.write_u32::<LittleEndian>(MAGIC)?;
            writer.write_u32::<LittleEndian>(FORMAT_VERSION)?;
            writer.write_u64::<LittleEndian>(payload.len() as u64)?;
            writer.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
            writer.write_all(&payload)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        debug!("wrote snapshot {}", self.path.display());
        Ok(())
    }

    fn check_closed(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(TesseraError::store("store is closed"))
        } else {
            Ok(())
        }
    }
}

impl ForwardStore for SnapshotStore {
    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.check_closed()?;
        self.entries.write().insert(key.to_vec(), value.to_vec());
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_closed()?;
        Ok(self.entries.read().get(key).cloned())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.check_closed()?;
        if self.entries.write().remove(key).is_some() {
            self.dirty.store(true, Ordering::Release);
        }
        Ok(())
    }

    fn has(&self, key: &[u8]) -> bool {
        self.entries.read().contains_key(key)
    }

    fn iter_db(&self, visit: &mut EntryVisitor<'_>) -> Result<usize> {
        self.check_closed()?;
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

    fn flush(&self) -> Result<()> {
        self.check_closed()?;
        self.write_snapshot()
    }

    fn close(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        self.write_snapshot()?;
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_snapshot_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forward.snap");

        let store = SnapshotStore::open(&path).unwrap();
        store.set(b"b", b"2").unwrap();
        store.set(b"a", b"1").unwrap();
        store.set(b"c", b"3").unwrap();
        store.delete(b"c").unwrap();
        store.close().unwrap();
        assert!(store.set(b"d", b"4").is_err());

        let reopened = SnapshotStore::open(&path).unwrap();
        assert_eq!(reopened.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(reopened.get(b"c").unwrap(), None);

        let mut keys = Vec::new();
        reopened
            .iter_key(&mut |k| {
                keys.push(k.to_vec());
                Ok(())
            })
            .unwrap();
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
    }

    #[test]
    fn test_snapshot_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forward.snap");

        let store = SnapshotStore::open(&path).unwrap();
        store.set(b"key", b"value").unwrap();
        store.close().unwrap();

        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        assert!(SnapshotStore::open(&path).is_err());
    }
}
