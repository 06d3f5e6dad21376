//! Coordination-store abstraction.
//!
//! The cluster layer needs a strongly consistent key/value service with
//! leases, prefix watches and compare-and-set transactions. [`Coordinator`]
//! names exactly those primitives so the registry and the lock can run against
//! any such service; [`MemoryCoordinator`](super::MemoryCoordinator) is the
//! in-process implementation.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::error::Result;

/// Identifier of a granted lease.
pub type LeaseId = i64;

/// A stored key with its value and owning lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    pub lease: Option<LeaseId>,
}

impl KeyValue {
    /// The value as UTF-8, lossily.
    pub fn value_str(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }
}

/// A change observed under a watched prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put(KeyValue),
    Delete { key: String },
}

impl WatchEvent {
    pub fn key(&self) -> &str {
        match self {
            WatchEvent::Put(kv) => &kv.key,
            WatchEvent::Delete { key } => key,
        }
    }
}

/// A guard evaluated atomically at the start of a [`Txn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Compare {
    /// The key does not exist.
    KeyAbsent(String),
    /// The key exists and holds exactly this value.
    ValueEquals(String, Vec<u8>),
}

/// A write applied by a [`Txn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxnOp {
    Put {
        key: String,
        value: Vec<u8>,
        lease: Option<LeaseId>,
    },
    Delete(String),
}

impl TxnOp {
    pub fn put<K: Into<String>, V: Into<Vec<u8>>>(key: K, value: V, lease: Option<LeaseId>) -> Self {
        TxnOp::Put {
            key: key.into(),
            value: value.into(),
            lease,
        }
    }

    pub fn delete<K: Into<String>>(key: K) -> Self {
        TxnOp::Delete(key.into())
    }
}

/// If every compare holds, apply `success`; otherwise apply `failure`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Txn {
    pub compares: Vec<Compare>,
    pub success: Vec<TxnOp>,
    pub failure: Vec<TxnOp>,
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn when<I: IntoIterator<Item = Compare>>(mut self, compares: I) -> Self {
        self.compares.extend(compares);
        self
    }

    pub fn and_then<I: IntoIterator<Item = TxnOp>>(mut self, ops: I) -> Self {
        self.success.extend(ops);
        self
    }

    pub fn or_else<I: IntoIterator<Item = TxnOp>>(mut self, ops: I) -> Self {
        self.failure.extend(ops);
        self
    }
}

/// Outcome of a [`Txn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxnResponse {
    /// Whether every compare held.
    pub succeeded: bool,
}

/// The coordination primitives the cluster layer is built on.
///
/// Keys attached to a lease are deleted, with a [`WatchEvent::Delete`], when
/// the lease expires or is revoked.
#[async_trait]
pub trait Coordinator: Send + Sync + fmt::Debug {
    /// Create a lease that expires after `ttl` unless kept alive.
    async fn grant(&self, ttl: Duration) -> Result<LeaseId>;

    /// Renew a lease once. Fails with `LeaseNotFound` if it already expired.
    async fn keep_alive_once(&self, lease: LeaseId) -> Result<()>;

    /// Drop a lease and every key attached to it.
    async fn revoke(&self, lease: LeaseId) -> Result<()>;

    /// Write `value` under `key`, optionally attached to a lease.
    async fn put(&self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<KeyValue>>;

    /// Every key starting with `prefix`, in key order.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;

    /// Remove `key`, returning whether it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Stream subsequent changes under `prefix`. Dropping the receiver cancels
    /// the watch.
    async fn watch_prefix(&self, prefix: &str) -> Result<UnboundedReceiver<WatchEvent>>;

    async fn txn(&self, txn: Txn) -> Result<TxnResponse>;

    /// Release the connection. Open watches end.
    async fn close(&self) -> Result<()>;
}
