//! Unique ascending ID sources used to assign document sequence numbers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;

use crate::error::{Result, TesseraError};

/// A source of unique, ascending `u64` identifiers.
pub trait IdSource: Send + Sync + std::fmt::Debug {
    /// Produce the next identifier.
    fn next_id(&self) -> u64;

    /// Report an identifier recovered from storage.
    ///
    /// Sources that could otherwise hand it out again must move past it.
    fn observe(&self, _seen: u64) {}
}

/// A process-local atomic counter starting at 1.
#[derive(Debug, Default)]
pub struct SequentialIds {
    last: AtomicU64,
}

impl SequentialIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last identifier handed out or observed.
    pub fn last(&self) -> u64 {
        self.last.load(Ordering::SeqCst)
    }
}

impl IdSource for SequentialIds {
    fn next_id(&self) -> u64 {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn observe(&self, seen: u64) {
        self.last.fetch_max(seen, Ordering::SeqCst);
    }
}

const WORKER_BITS: u8 = 10;
const SEQUENCE_BITS: u8 = 12;
pub const MAX_WORKER_ID: u64 = (1 << WORKER_BITS) - 1;
const MAX_SEQUENCE: u64 = (1 << SEQUENCE_BITS) - 1;
const TIMESTAMP_SHIFT: u8 = WORKER_BITS + SEQUENCE_BITS;
/// 2024-08-29T01:59:33.911Z, in milliseconds.
const EPOCH_MS: u64 = 1_724_896_773_911;

#[derive(Debug)]
struct SnowflakeState {
    timestamp: u64,
    sequence: u64,
}

/// Worker-partitioned time-ordered identifiers.
///
/// Layout: 41 bits of milliseconds since a fixed epoch, 10 bits of worker id,
/// 12 bits of per-millisecond sequence. IDs from different workers never
/// collide and IDs from one worker are strictly ascending.
#[derive(Debug)]
pub struct SnowflakeIds {
    worker_id: u64,
    state: Mutex<SnowflakeState>,
}

impl SnowflakeIds {
    pub fn new(worker_id: u64) -> Result<Self> {
        if worker_id > MAX_WORKER_ID {
            return Err(TesseraError::invalid_argument(format!(
                "worker id {worker_id} exceeds {MAX_WORKER_ID}"
            )));
        }
        Ok(Self {
            worker_id,
            state: Mutex::new(SnowflakeState {
                timestamp: 0,
                sequence: 0,
            }),
        })
    }

    pub fn worker_id(&self) -> u64 {
        self.worker_id
    }

    fn now_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(EPOCH_MS)
    }
}

impl IdSource for SnowflakeIds {
    fn next_id(&self) -> u64 {
        let mut state = self.state.lock();
        // Never go backwards, even if the wall clock does.
        let mut now = Self::now_ms().max(state.timestamp);
        if now == state.timestamp {
            state.sequence += 1;
            if state.sequence > MAX_SEQUENCE {
                while now <= state.timestamp {
                    std::hint::spin_loop();
                    now = Self::now_ms();
                }
                state.sequence = 0;
            }
        } else {
            state.sequence = 0;
        }
        state.timestamp = now;

        (now.saturating_sub(EPOCH_MS) << TIMESTAMP_SHIFT)
            | (self.worker_id << SEQUENCE_BITS)
            | state.sequence
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIds::new();
        assert_eq!(ids.next_id(), 1);
        assert_eq!(ids.next_id(), 2);

        ids.observe(10);
        assert_eq!(ids.next_id(), 11);

        ids.observe(3);
        assert_eq!(ids.next_id(), 12);
    }

    #[test]
    fn test_snowflake_ascending_and_unique() {
        let ids = SnowflakeIds::new(7).unwrap();
        let mut prev = 0;
        for _ in 0..10_000 {
            let id = ids.next_id();
            assert!(id > prev);
            assert_eq!((id >> SEQUENCE_BITS) & MAX_WORKER_ID, 7);
            prev = id;
        }
    }

    #[test]
    fn test_snowflake_rejects_large_worker_id() {
        assert!(SnowflakeIds::new(MAX_WORKER_ID + 1).is_err());
    }
}
