//! Service registry over a coordination store.
//!
//! Key layout for an index named `books`:
//!
//! | key                                   | value       | lease        |
//! |---------------------------------------|-------------|--------------|
//! | `/tessera/index/books/{group}/{addr}` | `addr`      | worker lease |
//! | `/tessera/meta/books/groups/{group}`  | empty       | none         |
//! | `/tessera/meta/books/group_count`     | decimal     | none         |
//! | `/tessera/lock/books/groups`          | lease id    | lock lease   |
//!
//! The group marker records that a group is included in `group_count`. It is
//! created with the first registration of the group and removed when the last
//! member unregisters, so a worker whose lease expired and registers again
//! does not count its group twice.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::cluster::balancer::{LoadBalancer, RoundRobin};
use crate::cluster::coordinator::{Compare, Coordinator, LeaseId, Txn, TxnOp};
use crate::cluster::lock::DistributedLock;
use crate::config::{ClusterConfig, LockConfig};
use crate::error::{Result, TesseraError};

/// Endpoint registration and discovery for shard groups.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync + fmt::Debug {
    /// Register `endpoint` as a member of `group`.
    ///
    /// Without a lease a new one is granted and the endpoint key written
    /// under it. With a lease, the lease is renewed once; if it has already
    /// expired the endpoint is registered again from scratch. Returns the
    /// lease now backing the registration.
    async fn register(&self, group: usize, endpoint: &str, lease: Option<LeaseId>) -> Result<LeaseId>;

    /// Remove `endpoint` from `group`.
    async fn unregister(&self, group: usize, endpoint: &str) -> Result<()>;

    /// Every endpoint currently registered in `group`.
    async fn get_service_endpoints(&self, group: usize) -> Result<Vec<String>>;

    /// One endpoint of `group` picked by the load balancer.
    async fn get_service_endpoint(&self, group: usize) -> Result<Option<String>> {
        let endpoints = self.get_service_endpoints(group).await?;
        Ok(self.balancer().take(&endpoints))
    }

    /// Number of shard groups with at least one registered member.
    async fn count_index_group(&self) -> Result<usize>;

    fn balancer(&self) -> &dyn LoadBalancer;

    async fn close(&self) -> Result<()>;
}

/// Registry backed directly by a [`Coordinator`].
#[derive(Debug)]
pub struct ServiceHub {
    coordinator: Arc<dyn Coordinator>,
    index_name: String,
    heart_rate: Duration,
    lock: LockConfig,
    balancer: Box<dyn LoadBalancer>,
}

impl ServiceHub {
    pub fn new(coordinator: Arc<dyn Coordinator>, config: &ClusterConfig) -> Self {
        ServiceHub {
            coordinator,
            index_name: config.index_name.clone(),
            heart_rate: config.heart_rate,
            lock: config.lock.clone(),
            balancer: Box::new(RoundRobin::new()),
        }
    }

    pub fn with_balancer(mut self, balancer: Box<dyn LoadBalancer>) -> Self {
        self.balancer = balancer;
        self
    }

    pub fn coordinator(&self) -> &Arc<dyn Coordinator> {
        &self.coordinator
    }

    /// Prefix under which every endpoint of `group` is stored.
    pub fn group_prefix(&self, group: usize) -> String {
        format!("/tessera/index/{}/{group}/", self.index_name)
    }

    fn endpoint_key(&self, group: usize, endpoint: &str) -> String {
        format!("{}{endpoint}", self.group_prefix(group))
    }

    fn marker_key(&self, group: usize) -> String {
        format!("/tessera/meta/{}/groups/{group}", self.index_name)
    }

    fn counter_key(&self) -> String {
        format!("/tessera/meta/{}/group_count", self.index_name)
    }

    fn lock_key(&self) -> String {
        format!("/tessera/lock/{}/groups", self.index_name)
    }

    async fn read_counter(&self) -> Result<usize> {
        match self.coordinator.get(&self.counter_key()).await? {
            None => Ok(0),
            Some(kv) => kv.value_str().parse().map_err(|e| {
                TesseraError::coordination(format!("bad group counter '{}': {e}", kv.value_str()))
            }),
        }
    }

    /// Count `group` if it is not counted yet.
    async fn add_index_group(&self, group: usize) -> Result<()> {
        let lock = DistributedLock::acquire(self.coordinator.clone(), &self.lock_key(), &self.lock).await?;
        let result = self.add_index_group_locked(&lock, group).await;
        if let Err(e) = lock.release().await {
            warn!("failed to release group lock: {e}");
        }
        result
    }

    async fn add_index_group_locked(&self, lock: &DistributedLock, group: usize) -> Result<()> {
        let marker = self.marker_key(group);
        if self.coordinator.get(&marker).await?.is_some() {
            return Ok(());
        }
        let count = self.read_counter().await? + 1;
        let txn = Txn::new()
            .when([Compare::KeyAbsent(marker.clone())])
            .and_then([
                TxnOp::put(marker, Vec::new(), None),
                TxnOp::put(self.counter_key(), count.to_string(), None),
            ]);
        if !lock.txn(txn).await?.succeeded {
            return Err(TesseraError::coordination(format!(
                "lost group lock while adding group {group}"
            )));
        }
        info!("index {} now has {count} groups", self.index_name);
        Ok(())
    }

    /// Uncount `group` if it has no members left.
    async fn sub_index_group(&self, group: usize) -> Result<()> {
        let lock = DistributedLock::acquire(self.coordinator.clone(), &self.lock_key(), &self.lock).await?;
        let result = self.sub_index_group_locked(&lock, group).await;
        if let Err(e) = lock.release().await {
            warn!("failed to release group lock: {e}");
        }
        result
    }

    async fn sub_index_group_locked(&self, lock: &DistributedLock, group: usize) -> Result<()> {
        let marker = self.marker_key(group);
        if self.coordinator.get(&marker).await?.is_none() {
            return Ok(());
        }
        if !self
            .coordinator
            .get_prefix(&self.group_prefix(group))
            .await?
            .is_empty()
        {
            return Ok(());
        }

        let count = self.read_counter().await?.saturating_sub(1);
        let counter_op = if count == 0 {
            TxnOp::delete(self.counter_key())
        } else {
            TxnOp::put(self.counter_key(), count.to_string(), None)
        };
        let txn = Txn::new()
            .when([Compare::ValueEquals(marker.clone(), Vec::new())])
            .and_then([TxnOp::delete(marker), counter_op]);
        if !lock.txn(txn).await?.succeeded {
            return Err(TesseraError::coordination(format!(
                "lost group lock while removing group {group}"
            )));
        }
        info!("index {} now has {count} groups", self.index_name);
        Ok(())
    }
}

#[async_trait]
impl ServiceDiscovery for ServiceHub {
    async fn register(&self, group: usize, endpoint: &str, lease: Option<LeaseId>) -> Result<LeaseId> {
        if let Some(lease) = lease {
            match self.coordinator.keep_alive_once(lease).await {
                Ok(()) => return Ok(lease),
                Err(e) if e.is_lease_not_found() => {
                    warn!("lease {lease} of {endpoint} expired, registering again");
                }
                Err(e) => return Err(e),
            }
        }

        let lease = self.coordinator.grant(self.heart_rate).await?;
        self.coordinator
            .put(
                &self.endpoint_key(group, endpoint),
                endpoint.as_bytes().to_vec(),
                Some(lease),
            )
            .await?;
        self.add_index_group(group).await?;
        info!("registered {endpoint} in group {group} with lease {lease}");
        Ok(lease)
    }

    async fn unregister(&self, group: usize, endpoint: &str) -> Result<()> {
        self.coordinator
            .delete(&self.endpoint_key(group, endpoint))
            .await?;
        self.sub_index_group(group).await?;
        info!("unregistered {endpoint} from group {group}");
        Ok(())
    }

    async fn get_service_endpoints(&self, group: usize) -> Result<Vec<String>> {
        let prefix = self.group_prefix(group);
        let endpoints: Vec<String> = self
            .coordinator
            .get_prefix(&prefix)
            .await?
            .into_iter()
            .filter_map(|kv| kv.key.strip_prefix(&prefix).map(str::to_string))
            .collect();
        debug!("group {group} has endpoints {endpoints:?}");
        Ok(endpoints)
    }

    async fn count_index_group(&self) -> Result<usize> {
        self.read_counter().await
    }

    fn balancer(&self) -> &dyn LoadBalancer {
        self.balancer.as_ref()
    }

    async fn close(&self) -> Result<()> {
        self.coordinator.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCoordinator;

    fn hub(heart_rate: Duration) -> ServiceHub {
        let config = ClusterConfig::default()
            .with_index_name("books")
            .with_heart_rate(heart_rate);
        ServiceHub::new(Arc::new(MemoryCoordinator::new()), &config)
    }

    #[tokio::test]
    async fn test_register_and_discover() {
        let hub = hub(Duration::from_secs(5));
        hub.register(0, "10.0.0.1:5000", None).await.unwrap();
        hub.register(0, "10.0.0.2:5000", None).await.unwrap();
        hub.register(1, "10.0.0.3:5000", None).await.unwrap();

        assert_eq!(
            hub.get_service_endpoints(0).await.unwrap(),
            vec!["10.0.0.1:5000", "10.0.0.2:5000"]
        );
        assert_eq!(hub.count_index_group().await.unwrap(), 2);
        assert_eq!(
            hub.get_service_endpoint(1).await.unwrap().as_deref(),
            Some("10.0.0.3:5000")
        );
        assert_eq!(hub.get_service_endpoint(7).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_group_counted_once_until_last_member_leaves() {
        let hub = hub(Duration::from_secs(5));
        hub.register(0, "a", None).await.unwrap();
        hub.register(0, "b", None).await.unwrap();
        assert_eq!(hub.count_index_group().await.unwrap(), 1);

        hub.unregister(0, "a").await.unwrap();
        assert_eq!(hub.count_index_group().await.unwrap(), 1);
        hub.unregister(0, "b").await.unwrap();
        assert_eq!(hub.count_index_group().await.unwrap(), 0);
        assert!(hub.coordinator().get(&hub.counter_key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_renewal_keeps_lease() {
        let hub = hub(Duration::from_secs(5));
        let lease = hub.register(0, "a", None).await.unwrap();
        assert_eq!(hub.register(0, "a", Some(lease)).await.unwrap(), lease);
    }

    #[tokio::test]
    async fn test_expired_lease_registers_again_without_recount() {
        let hub = hub(Duration::from_millis(150));
        let lease = hub.register(0, "a", None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(hub.get_service_endpoints(0).await.unwrap().is_empty());

        let renewed = hub.register(0, "a", Some(lease)).await.unwrap();
        assert_ne!(renewed, lease);
        assert_eq!(hub.get_service_endpoints(0).await.unwrap(), vec!["a"]);
        assert_eq!(hub.count_index_group().await.unwrap(), 1);
    }
}
