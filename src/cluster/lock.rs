//! Lease-backed distributed lock with fencing.
//!
//! The lock key is created under a fresh lease, and only if it does not
//! exist yet. Its value is the lease id, which doubles as a fencing token:
//! [`DistributedLock::txn`] conditions a write on the key still holding that
//! token, so a holder whose lease ran out cannot overwrite state taken over by
//! the next holder.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::time::Instant;

use crate::cluster::coordinator::{Compare, Coordinator, LeaseId, Txn, TxnOp, TxnResponse};
use crate::config::LockConfig;
use crate::error::{Result, TesseraError};

/// Upper bound for every coordination call made while locking.
pub const LOCK_CALL_TIMEOUT: Duration = Duration::from_secs(3);

async fn bounded<T>(what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::time::timeout(LOCK_CALL_TIMEOUT, call)
        .await
        .map_err(|_| TesseraError::timeout(format!("{what} took longer than {LOCK_CALL_TIMEOUT:?}")))?
}

/// A held lock. Release it with [`release`](Self::release).
#[derive(Debug)]
pub struct DistributedLock {
    coordinator: Arc<dyn Coordinator>,
    key: String,
    lease: LeaseId,
    expires_at: Instant,
}

impl DistributedLock {
    /// Take the lock at `key`, retrying up to `config.max_retries` times.
    ///
    /// On failure the lease is revoked and `LockUnavailable` is returned.
    pub async fn acquire(
        coordinator: Arc<dyn Coordinator>,
        key: &str,
        config: &LockConfig,
    ) -> Result<Self> {
        let lease = bounded("lock lease grant", coordinator.grant(config.lease_ttl)).await?;
        let token = lease.to_string().into_bytes();

        for attempt in 0..config.max_retries {
            let create = Txn::new()
                .when([Compare::KeyAbsent(key.to_string())])
                .and_then([TxnOp::put(key, token.clone(), Some(lease))]);
            match bounded("lock txn", coordinator.txn(create)).await {
                Ok(TxnResponse { succeeded: true }) => {
                    debug!("acquired lock {key} with lease {lease}");
                    return Ok(DistributedLock {
                        coordinator,
                        key: key.to_string(),
                        lease,
                        expires_at: Instant::now() + config.lease_ttl,
                    });
                }
                Ok(_) => debug!("lock {key} is held, attempt {}", attempt + 1),
                Err(e) => warn!("lock {key} attempt {} failed: {e}", attempt + 1),
            }
            tokio::time::sleep(config.retry_interval).await;
        }

        if let Err(e) = bounded("lock lease revoke", coordinator.revoke(lease)).await {
            warn!("failed to revoke lease {lease} of abandoned lock {key}: {e}");
        }
        Err(TesseraError::LockUnavailable {
            key: key.to_string(),
            retries: config.max_retries,
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The lease id stored under the lock key.
    pub fn fencing_token(&self) -> LeaseId {
        self.lease
    }

    /// Whether the lease TTL has run out since acquisition.
    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Run `txn` only while this holder still owns the lock key.
    pub async fn txn(&self, txn: Txn) -> Result<TxnResponse> {
        let fenced = Txn {
            compares: std::iter::once(Compare::ValueEquals(
                self.key.clone(),
                self.lease.to_string().into_bytes(),
            ))
            .chain(txn.compares)
            .collect(),
            ..txn
        };
        bounded("fenced txn", self.coordinator.txn(fenced)).await
    }

    /// Delete the lock key, then revoke its lease.
    pub async fn release(self) -> Result<()> {
        bounded("lock delete", self.coordinator.delete(&self.key)).await?;
        match bounded("lock lease revoke", self.coordinator.revoke(self.lease)).await {
            Err(e) if e.is_lease_not_found() => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCoordinator;

    fn config() -> LockConfig {
        LockConfig::default()
            .with_max_retries(3)
            .with_retry_interval(Duration::from_millis(10))
            .with_lease_ttl(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_lock_is_exclusive() {
        let store: Arc<dyn Coordinator> = Arc::new(MemoryCoordinator::new());
        let held = DistributedLock::acquire(store.clone(), "/lock", &config())
            .await
            .unwrap();

        let err = DistributedLock::acquire(store.clone(), "/lock", &config())
            .await
            .unwrap_err();
        assert!(matches!(err, TesseraError::LockUnavailable { retries: 3, .. }));

        held.release().await.unwrap();
        let again = DistributedLock::acquire(store.clone(), "/lock", &config())
            .await
            .unwrap();
        again.release().await.unwrap();
        assert!(store.get("/lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_acquire_revokes_lease() {
        let store = Arc::new(MemoryCoordinator::new());
        let dyn_store: Arc<dyn Coordinator> = store.clone();
        let _held = DistributedLock::acquire(dyn_store.clone(), "/lock", &config())
            .await
            .unwrap();
        assert_eq!(store.lease_count(), 1);
        assert!(DistributedLock::acquire(dyn_store, "/lock", &config()).await.is_err());
        assert_eq!(store.lease_count(), 1);
    }

    #[tokio::test]
    async fn test_stale_holder_is_fenced() {
        let store: Arc<dyn Coordinator> = Arc::new(MemoryCoordinator::new());
        let short = config().with_lease_ttl(Duration::from_millis(30));
        let stale = DistributedLock::acquire(store.clone(), "/lock", &short)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(stale.is_expired());

        let current = DistributedLock::acquire(store.clone(), "/lock", &config())
            .await
            .unwrap();
        assert_ne!(current.fencing_token(), stale.fencing_token());

        let write = || Txn::new().and_then([TxnOp::put("/counter", "1", None)]);
        assert!(!stale.txn(write()).await.unwrap().succeeded);
        assert!(current.txn(write()).await.unwrap().succeeded);
        assert_eq!(store.get("/counter").await.unwrap().unwrap().value_str(), "1");
    }
}
