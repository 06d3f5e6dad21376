//! Log-structured forward store.
//!
//! Every `set` and `delete` appends a framed record to a single log file:
//! `[payload length: u32][CRC-32 of payload: u32][bincode LogRecord]`.
//! An in-memory key directory maps each live key to the offset of its latest
//! put record. Opening the store replays the log; a torn or corrupt tail left
//! by a crash is truncated away. Superseded records are reclaimed by
//! [`LogStore::compact`].

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TesseraError};
use crate::storage::{EntryVisitor, ForwardStore, KeyVisitor};

const HEADER_LEN: u64 = 8;

#[derive(Debug, Serialize, Deserialize)]
enum LogRecord {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

/// Location of a put record in the log.
#[derive(Debug, Clone, Copy)]
struct Slot {
    offset: u64,
    len: u32,
}

#[derive(Debug)]
struct LogFiles {
    writer: BufWriter<File>,
    reader: File,
    end: u64,
    keydir: BTreeMap<Vec<u8>, Slot>,
    /// Bytes of records no longer reachable from the key directory.
    garbage: u64,
    closed: bool,
}

/// An append-only forward store.
#[derive(Debug)]
pub struct LogStore {
    path: PathBuf,
    files: Mutex<LogFiles>,
}

impl LogStore {
    /// Open the log at `path`, creating it if missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let files = Self::open_files(&path)?;
        info!(
            "opened log store {} with {} live keys",
            path.display(),
            files.keydir.len()
        );
        Ok(LogStore {
            path,
            files: Mutex::new(files),
        })
    }

    fn open_files(path: &Path) -> Result<LogFiles> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)?;
        let (keydir, end, garbage) = Self::replay(path)?;

        let size = file.metadata()?.len();
        if size > end {
            warn!(
                "truncating {} bytes of torn tail from {}",
                size - end,
                path.display()
            );
            file.set_len(end)?;
        }

        Ok(LogFiles {
            writer: BufWriter::new(file),
            reader: File::open(path)?,
            end,
            keydir,
            garbage,
            closed: false,
        })
    }

    /// Rebuild the key directory, returning it with the end of the last
    /// intact record and the amount of garbage seen.
    fn replay(path: &Path) -> Result<(BTreeMap<Vec<u8>, Slot>, u64, u64)> {
        let mut reader = BufReader::new(File::open(path)?);
        let size = reader.get_ref().metadata()?.len();
        let mut keydir: BTreeMap<Vec<u8>, Slot> = BTreeMap::new();
        let mut offset = 0u64;
        let mut garbage = 0u64;

        while offset + HEADER_LEN <= size {
            let len = reader.read_u32::<LittleEndian>()?;
            let checksum = reader.read_u32::<LittleEndian>()?;
            if offset + HEADER_LEN + len as u64 > size {
                break;
            }
            let mut payload = vec![0u8; len as usize];
            reader.read_exact(&mut payload)?;
            if crc32fast::hash(&payload) != checksum {
                break;
            }
            let record: LogRecord = match bincode::deserialize(&payload) {
                Ok(record) => record,
                Err(_) => break,
            };

            let record_len = HEADER_LEN + len as u64;
            match record {
                LogRecord::Put { key, .. } => {
                    if let Some(old) = keydir.insert(key, Slot { offset, len }) {
                        garbage += HEADER_LEN + old.len as u64;
                    }
                }
                LogRecord::Delete { key } => {
                    if let Some(old) = keydir.remove(&key) {
                        garbage += HEADER_LEN + old.len as u64;
                    }
                    garbage += record_len;
                }
            }
            offset += record_len;
        }
        Ok((keydir, offset, garbage))
    }

    fn append(files: &mut LogFiles, record: &LogRecord) -> Result<Slot> {
        let payload = bincode::serialize(record)?;
        let len = u32::try_from(payload.len())
            .map_err(|_| TesseraError::store("record exceeds 4 GiB"))?;
        let offset = files.end;

        files.writer.write_u32::<LittleEndian>(len)?;
        files.writer.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
        files.writer.write_all(&payload)?;
        files.writer.flush()?;

        files.end += HEADER_LEN + len as u64;
        Ok(Slot { offset, len })
    }

    fn read_value(files: &mut LogFiles, slot: Slot) -> Result<Vec<u8>> {
        files.reader.seek(SeekFrom::Start(slot.offset + HEADER_LEN))?;
        let mut payload = vec![0u8; slot.len as usize];
        files.reader.read_exact(&mut payload)?;
        match bincode::deserialize(&payload)? {
            LogRecord::Put { value, .. } => Ok(value),
            LogRecord::Delete { .. } => Err(TesseraError::store(format!(
                "key directory points at a delete record at offset {}",
                slot.offset
            ))),
        }
    }

    fn check_open(files: &LogFiles) -> Result<()> {
        if files.closed {
            Err(TesseraError::store("store is closed"))
        } else {
            Ok(())
        }
    }

    /// Bytes occupied by superseded or deleted records.
    pub fn garbage_bytes(&self) -> u64 {
        self.files.lock().garbage
    }

    /// Size of the log in bytes.
    pub fn log_size(&self) -> u64 {
        self.files.lock().end
    }

    /// Rewrite the log keeping only live records.
    pub fn compact(&self) -> Result<()> {
        let mut files = self.files.lock();
        Self::check_open(&files)?;

        let tmp = self.path.with_extension("compact");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            let slots: Vec<(Vec<u8>, Slot)> =
                files.keydir.iter().map(|(k, s)| (k.clone(), *s)).collect();
            for (key, slot) in slots {
                let value = Self::read_value(&mut files, slot)?;
                let payload = bincode::serialize(&LogRecord::Put { key, value })?;
                writer.write_u32::<LittleEndian>(payload.len() as u32)?;
                writer.write_u32::<LittleEndian>(crc32fast::hash(&payload))?;
                writer.write_all(&payload)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }

        fs::rename(&tmp, &self.path)?;
        let before = files.end;
        *files = Self::open_files(&self.path)?;
        info!(
            "compacted {} from {} to {} bytes",
            self.path.display(),
            before,
            files.end
        );
        Ok(())
    }
}

impl ForwardStore for LogStore {
    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let mut files = self.files.lock();
        Self::check_open(&files)?;
        let slot = Self::append(
            &mut files,
            &LogRecord::Put {
                key: key.to_vec(),
                value: value.to_vec(),
            },
        )?;
        if let Some(old) = files.keydir.insert(key.to_vec(), slot) {
            files.garbage += HEADER_LEN + old.len as u64;
        }
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut files = self.files.lock();
        Self::check_open(&files)?;
        match files.keydir.get(key).copied() {
            Some(slot) => Self::read_value(&mut files, slot).map(Some),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        let mut files = self.files.lock();
        Self::check_open(&files)?;
        if !files.keydir.contains_key(key) {
            return Ok(());
        }
        let tombstone = Self::append(&mut files, &LogRecord::Delete { key: key.to_vec() })?;
        if let Some(old) = files.keydir.remove(key) {
            files.garbage += 2 * HEADER_LEN + old.len as u64 + tombstone.len as u64;
        }
        Ok(())
    }

    fn has(&self, key: &[u8]) -> bool {
        self.files.lock().keydir.contains_key(key)
    }

    fn iter_db(&self, visit: &mut EntryVisitor<'_>) -> Result<usize> {
        let entries = {
            let mut files = self.files.lock();
            Self::check_open(&files)?;
            let slots: Vec<(Vec<u8>, Slot)> =
                files.keydir.iter().map(|(k, s)| (k.clone(), *s)).collect();
            let mut entries = Vec::with_capacity(slots.len());
            for (key, slot) in slots {
                let value = Self::read_value(&mut files, slot)?;
                entries.push((key, value));
            }
            entries
        };
        for (key, value) in &entries {
            visit(key, value)?;
        }
        Ok(entries.len())
    }

    fn iter_key(&self, visit: &mut KeyVisitor<'_>) -> Result<usize> {
        let keys: Vec<Vec<u8>> = {
            let files = self.files.lock();
            Self::check_open(&files)?;
            files.keydir.keys().cloned().collect()
        };
        for key in &keys {
            visit(key)?;
        }
        Ok(keys.len())
    }

    fn flush(&self) -> Result<()> {
        let mut files = self.files.lock();
        Self::check_open(&files)?;
        files.writer.flush()?;
        files.writer.get_ref().sync_data()?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut files = self.files.lock();
        if files.closed {
            return Ok(());
        }
        files.writer.flush()?;
        files.writer.get_ref().sync_all()?;
        files.closed = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_log_store_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forward.log");

        let store = LogStore::open(&path).unwrap();
        store.set(b"a", b"1").unwrap();
        store.set(b"b", b"2").unwrap();
        store.set(b"a", b"3").unwrap();
        store.delete(b"b").unwrap();
        store.close().unwrap();

        let reopened = LogStore::open(&path).unwrap();
        assert_eq!(reopened.get(b"a").unwrap(), Some(b"3".to_vec()));
        assert_eq!(reopened.get(b"b").unwrap(), None);
        assert!(reopened.garbage_bytes() > 0);
    }

    #[test]
    fn test_log_store_truncates_torn_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forward.log");

        let store = LogStore::open(&path).unwrap();
        store.set(b"a", b"1").unwrap();
        store.close().unwrap();
        let intact = fs::metadata(&path).unwrap().len();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&[42, 0, 0, 0, 1, 2]).unwrap();
        drop(file);

        let reopened = LogStore::open(&path).unwrap();
        assert_eq!(reopened.log_size(), intact);
        assert_eq!(fs::metadata(&path).unwrap().len(), intact);
        reopened.set(b"b", b"2").unwrap();
        assert_eq!(reopened.get(b"a").unwrap(), Some(b"1".to_vec()));
        assert_eq!(reopened.get(b"b").unwrap(), Some(b"2".to_vec()));
    }

    #[test]
    fn test_log_store_compact() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("forward.log");

        let store = LogStore::open(&path).unwrap();
        for i in 0..50u32 {
            store.set(b"hot", &i.to_le_bytes()).unwrap();
        }
        store.set(b"cold", b"x").unwrap();
        let before = store.log_size();

        store.compact().unwrap();
        assert!(store.log_size() < before);
        assert_eq!(store.garbage_bytes(), 0);
        assert_eq!(store.get(b"hot").unwrap(), Some(49u32.to_le_bytes().to_vec()));

        let mut count = 0;
        store
            .iter_db(&mut |_, _| {
                count += 1;
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 2);
    }
}
