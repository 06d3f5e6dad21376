//! Client-side router over the shard groups of an index.
//!
//! A document lives in group `crc32(id) % group_count`. Writes go to every
//! replica of that group; searches and counts ask one replica of every group
//! and tolerate failed or slow groups by returning what arrived before the
//! deadline.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use futures::stream::{FuturesUnordered, StreamExt};
use log::{debug, info, warn};
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::cluster::hub::ServiceDiscovery;
use crate::cluster::transport::{Connector, IndexClient, IndexService, SearchRequest};
use crate::config::ClusterConfig;
use crate::document::Document;
use crate::error::{Result, TesseraError};

/// Shard group of `doc_id` among `group_count` groups, or `None` if there are none.
pub fn shard_of(doc_id: &str, group_count: usize) -> Option<usize> {
    if group_count == 0 {
        return None;
    }
    Some(crc32fast::hash(doc_id.as_bytes()) as usize % group_count)
}

async fn close_client(endpoint: &str, client: Arc<dyn IndexClient>) {
    if let Err(e) = client.close().await {
        warn!("failed to close connection to {endpoint}: {e}");
    }
}

/// Routes index operations to the workers of a sharded index.
#[derive(Debug)]
pub struct Sentinel {
    hub: Arc<dyn ServiceDiscovery>,
    connector: Arc<dyn Connector>,
    pool: RwLock<AHashMap<String, Arc<dyn IndexClient>>>,
    rpc_timeout: Duration,
    dial_timeout: Duration,
}

impl Sentinel {
    pub fn new(
        hub: Arc<dyn ServiceDiscovery>,
        connector: Arc<dyn Connector>,
        config: &ClusterConfig,
    ) -> Self {
        Sentinel {
            hub,
            connector,
            pool: RwLock::new(AHashMap::new()),
            rpc_timeout: config.rpc_timeout,
            dial_timeout: config.dial_timeout,
        }
    }

    /// A healthy connection to `endpoint`, dialing a new one if needed.
    async fn get_connection(&self, endpoint: &str) -> Result<Arc<dyn IndexClient>> {
        let pooled = self.pool.read().get(endpoint).cloned();
        if let Some(client) = pooled {
            if client.is_healthy() {
                return Ok(client);
            }
            debug!("dropping unhealthy connection to {endpoint}");
            {
                let mut pool = self.pool.write();
                if pool.get(endpoint).is_some_and(|c| Arc::ptr_eq(c, &client)) {
                    pool.remove(endpoint);
                }
            }
            close_client(endpoint, client).await;
        }

        let dialed = tokio::time::timeout(self.dial_timeout, self.connector.connect(endpoint))
            .await
            .map_err(|_| TesseraError::timeout(format!("dialing {endpoint}")))??;

        // Another call may have dialed the same endpoint meanwhile; one
        // connection stays pooled and the other is closed.
        let (client, discarded) = {
            let mut pool = self.pool.write();
            let existing = pool.get(endpoint).filter(|c| c.is_healthy()).cloned();
            match existing {
                Some(existing) => (existing, Some(dialed)),
                None => {
                    let replaced = pool.insert(endpoint.to_string(), dialed.clone());
                    (dialed, replaced)
                }
            }
        };
        if let Some(discarded) = discarded {
            close_client(endpoint, discarded).await;
        }
        Ok(client)
    }

    /// Endpoints of the group owning `doc_id`.
    async fn route(&self, doc_id: &str) -> Result<(usize, Vec<String>)> {
        let group_count = self.hub.count_index_group().await?;
        let group = shard_of(doc_id, group_count)
            .ok_or_else(|| TesseraError::no_endpoints("index has no shard groups"))?;
        let endpoints = self.hub.get_service_endpoints(group).await?;
        if endpoints.is_empty() {
            return Err(TesseraError::no_endpoints(format!(
                "group {group} has no endpoints"
            )));
        }
        Ok((group, endpoints))
    }

    /// Run `call` against every endpoint and sum the affected counts.
    ///
    /// Failed endpoints are logged and contribute nothing.
    async fn fan_out_write<F, Fut>(&self, endpoints: &[String], call: F) -> usize
    where
        F: Fn(Arc<dyn IndexClient>) -> Fut,
        Fut: std::future::Future<Output = Result<usize>>,
    {
        let calls = endpoints.iter().map(|endpoint| {
            let call = &call;
            async move {
                let client = self.get_connection(endpoint).await?;
                tokio::time::timeout(self.rpc_timeout, call(client))
                    .await
                    .map_err(|_| TesseraError::timeout(format!("write to {endpoint}")))?
            }
        });
        let results = futures::future::join_all(calls).await;

        let mut affected = 0;
        for (endpoint, result) in endpoints.iter().zip(results) {
            match result {
                Ok(n) => affected += n,
                Err(e) => warn!("write to {endpoint} failed: {e}"),
            }
        }
        affected
    }

    /// Ask one endpoint of every group until `rpc_timeout` elapses.
    ///
    /// Returns the answers that arrived in time, in arrival order.
    async fn fan_out_read<T, F, Fut>(&self, call: F) -> Result<Vec<T>>
    where
        F: Fn(Arc<dyn IndexClient>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let deadline = Instant::now() + self.rpc_timeout;
        let group_count = self.hub.count_index_group().await?;

        let mut pending = FuturesUnordered::new();
        for group in 0..group_count {
            let call = &call;
            pending.push(async move {
                let endpoint = self.hub.get_service_endpoint(group).await?.ok_or_else(|| {
                    TesseraError::no_endpoints(format!("group {group} has no endpoints"))
                })?;
                let client = self.get_connection(&endpoint).await?;
                call(client)
                    .await
                    .map_err(|e| TesseraError::rpc(format!("{endpoint}: {e}")))
            });
        }

        let mut answers = Vec::with_capacity(group_count);
        loop {
            match tokio::time::timeout_at(deadline, pending.next()).await {
                Ok(Some(Ok(answer))) => answers.push(answer),
                Ok(Some(Err(e))) => warn!("group skipped: {e}"),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        "{} of {group_count} groups missed the deadline",
                        pending.len()
                    );
                    break;
                }
            }
        }
        Ok(answers)
    }

    /// Close every pooled connection, then the discovery client.
    pub async fn close(&self) -> Result<()> {
        let clients: Vec<_> = self.pool.write().drain().collect();
        for (endpoint, client) in clients {
            close_client(&endpoint, client).await;
        }
        self.hub.close().await?;
        info!("sentinel closed");
        Ok(())
    }
}

#[async_trait]
impl IndexService for Sentinel {
    async fn add_doc(&self, mut doc: Document) -> Result<usize> {
        // Route by the id the workers will store.
        let doc_id = doc.id.trim();
        if doc_id.is_empty() {
            return Ok(0);
        }
        if doc_id.len() != doc.id.len() {
            doc.id = doc_id.to_string();
        }
        let (group, endpoints) = self.route(&doc.id).await?;
        debug!("routing add of {} to group {group}", doc.id);
        let doc = &doc;
        Ok(self
            .fan_out_write(&endpoints, |client| async move {
                client.add_doc(doc.clone()).await
            })
            .await)
    }

    async fn delete_doc(&self, doc_id: &str) -> Result<usize> {
        let doc_id = doc_id.trim();
        if doc_id.is_empty() {
            return Ok(0);
        }
        let (group, endpoints) = self.route(doc_id).await?;
        debug!("routing delete of {doc_id} to group {group}");
        Ok(self
            .fan_out_write(&endpoints, |client| async move {
                client.delete_doc(doc_id).await
            })
            .await)
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<Document>> {
        let request = &request;
        let answers = self
            .fan_out_read(|client| async move { client.search(request.clone()).await })
            .await?;
        Ok(answers.into_iter().flatten().collect())
    }

    async fn count(&self) -> Result<usize> {
        let answers = self
            .fan_out_read(|client| async move { client.count().await })
            .await?;
        Ok(answers.into_iter().sum())
    }
}
