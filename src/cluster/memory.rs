//! In-process coordination store.
//!
//! Leases expire lazily: every call first drops leases whose deadline has
//! passed, deleting their keys and notifying watchers. A reaper task can be
//! started to expire leases while the store is otherwise idle.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use log::{debug, trace};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cluster::coordinator::{
    Compare, Coordinator, KeyValue, LeaseId, Txn, TxnOp, TxnResponse, WatchEvent,
};
use crate::error::{Result, TesseraError};

#[derive(Debug)]
struct Lease {
    ttl: Duration,
    deadline: Instant,
    keys: BTreeSet<String>,
}

#[derive(Debug)]
struct Watcher {
    prefix: String,
    sender: UnboundedSender<WatchEvent>,
}

#[derive(Debug, Default)]
struct State {
    kvs: BTreeMap<String, KeyValue>,
    leases: AHashMap<LeaseId, Lease>,
    watchers: Vec<Watcher>,
    next_lease: LeaseId,
    closed: bool,
}

impl State {
    fn check_open(&self) -> Result<()> {
        if self.closed {
            Err(TesseraError::coordination("coordinator is closed"))
        } else {
            Ok(())
        }
    }

    fn notify(&mut self, event: WatchEvent) {
        self.watchers.retain(|w| {
            if !event.key().starts_with(&w.prefix) {
                return true;
            }
            // A failed send means the receiver is gone.
            w.sender.send(event.clone()).is_ok()
        });
    }

    fn expire(&mut self, now: Instant) {
        let expired: Vec<LeaseId> = self
            .leases
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(&id, _)| id)
            .collect();
        for id in expired {
            debug!("lease {id} expired");
            self.drop_lease(id);
        }
    }

    fn drop_lease(&mut self, id: LeaseId) -> bool {
        let Some(lease) = self.leases.remove(&id) else {
            return false;
        };
        for key in lease.keys {
            if self.kvs.remove(&key).is_some() {
                self.notify(WatchEvent::Delete { key });
            }
        }
        true
    }

    fn put(&mut self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()> {
        if let Some(id) = lease {
            let Some(owner) = self.leases.get_mut(&id) else {
                return Err(TesseraError::LeaseNotFound(id));
            };
            owner.keys.insert(key.to_string());
        }
        let kv = KeyValue {
            key: key.to_string(),
            value,
            lease,
        };
        if let Some(previous) = self.kvs.insert(key.to_string(), kv.clone()) {
            if let Some(old) = previous.lease.filter(|&old| Some(old) != lease) {
                if let Some(owner) = self.leases.get_mut(&old) {
                    owner.keys.remove(key);
                }
            }
        }
        self.notify(WatchEvent::Put(kv));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> bool {
        let Some(previous) = self.kvs.remove(key) else {
            return false;
        };
        if let Some(owner) = previous.lease.and_then(|id| self.leases.get_mut(&id)) {
            owner.keys.remove(key);
        }
        self.notify(WatchEvent::Delete {
            key: key.to_string(),
        });
        true
    }

    fn holds(&self, compare: &Compare) -> bool {
        match compare {
            Compare::KeyAbsent(key) => !self.kvs.contains_key(key),
            Compare::ValueEquals(key, value) => {
                self.kvs.get(key).is_some_and(|kv| &kv.value == value)
            }
        }
    }

    /// Fail if `op` could not be applied to the current state.
    fn check(&self, op: &TxnOp) -> Result<()> {
        match op {
            TxnOp::Put {
                lease: Some(id), ..
            } if !self.leases.contains_key(id) => Err(TesseraError::LeaseNotFound(*id)),
            _ => Ok(()),
        }
    }

    fn apply(&mut self, op: TxnOp) -> Result<()> {
        match op {
            TxnOp::Put { key, value, lease } => self.put(&key, value, lease),
            TxnOp::Delete(key) => {
                self.delete(&key);
                Ok(())
            }
        }
    }
}

/// A [`Coordinator`] held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryCoordinator {
    state: Mutex<State>,
}

impl MemoryCoordinator {
    pub fn new() -> Self {
        MemoryCoordinator {
            state: Mutex::new(State {
                next_lease: 1,
                ..Default::default()
            }),
        }
    }

    /// Expire due leases every `period` until `cancel` fires or the store is dropped.
    pub fn spawn_reaper(self: &Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(store) = weak.upgrade() else { break };
                        store.state.lock().expire(Instant::now());
                    }
                }
            }
            trace!("lease reaper stopped");
        })
    }

    /// Number of live leases.
    pub fn lease_count(&self) -> usize {
        let mut state = self.state.lock();
        state.expire(Instant::now());
        state.leases.len()
    }

    /// Lock the state with due leases already expired.
    fn live(&self) -> Result<parking_lot::MutexGuard<'_, State>> {
        let mut state = self.state.lock();
        state.check_open()?;
        state.expire(Instant::now());
        Ok(state)
    }
}

#[async_trait]
impl Coordinator for MemoryCoordinator {
    async fn grant(&self, ttl: Duration) -> Result<LeaseId> {
        let mut state = self.live()?;
        let id = state.next_lease;
        state.next_lease += 1;
        state.leases.insert(
            id,
            Lease {
                ttl,
                deadline: Instant::now() + ttl,
                keys: BTreeSet::new(),
            },
        );
        Ok(id)
    }

    async fn keep_alive_once(&self, lease: LeaseId) -> Result<()> {
        let mut state = self.live()?;
        let Some(entry) = state.leases.get_mut(&lease) else {
            return Err(TesseraError::LeaseNotFound(lease));
        };
        entry.deadline = Instant::now() + entry.ttl;
        Ok(())
    }

    async fn revoke(&self, lease: LeaseId) -> Result<()> {
        let mut state = self.live()?;
        if state.drop_lease(lease) {
            Ok(())
        } else {
            Err(TesseraError::LeaseNotFound(lease))
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()> {
        self.live()?.put(key, value, lease)
    }

    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        Ok(self.live()?.kvs.get(key).cloned())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let state = self.live()?;
        Ok(state
            .kvs
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(_, kv)| kv.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.live()?.delete(key))
    }

    async fn watch_prefix(&self, prefix: &str) -> Result<UnboundedReceiver<WatchEvent>> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.live()?.watchers.push(Watcher {
            prefix: prefix.to_string(),
            sender,
        });
        Ok(receiver)
    }

    async fn txn(&self, txn: Txn) -> Result<TxnResponse> {
        let mut state = self.live()?;
        let succeeded = txn.compares.iter().all(|c| state.holds(c));
        let ops = if succeeded { txn.success } else { txn.failure };
        // All or nothing: nothing is written unless every op can be.
        for op in &ops {
            state.check(op)?;
        }
        for op in ops {
            state.apply(op)?;
        }
        Ok(TxnResponse { succeeded })
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.closed = true;
        state.watchers.clear();
        Ok(())
    }
}
