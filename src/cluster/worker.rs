//! A registered, heartbeating index worker.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cluster::coordinator::LeaseId;
use crate::cluster::hub::ServiceDiscovery;
use crate::cluster::transport::{IndexService, SearchRequest};
use crate::config::IndexerConfig;
use crate::document::Document;
use crate::error::Result;
use crate::index::Indexer;

/// Renewals land this much before the registration lease would expire.
const HEARTBEAT_MARGIN: Duration = Duration::from_millis(100);

/// Hosts an [`Indexer`] as one member of a shard group.
#[derive(Debug)]
pub struct IndexWorker {
    indexer: Arc<Indexer>,
    hub: Arc<dyn ServiceDiscovery>,
    group: usize,
    endpoint: String,
    heart_rate: Duration,
    lease: Arc<Mutex<Option<LeaseId>>>,
    cancel: CancellationToken,
    heartbeat: Mutex<Option<JoinHandle<()>>>,
}

impl IndexWorker {
    pub fn new<S: Into<String>>(
        indexer: Arc<Indexer>,
        hub: Arc<dyn ServiceDiscovery>,
        group: usize,
        endpoint: S,
        heart_rate: Duration,
    ) -> Self {
        IndexWorker {
            indexer,
            hub,
            group,
            endpoint: endpoint.into(),
            heart_rate,
            lease: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
            heartbeat: Mutex::new(None),
        }
    }

    /// Open the configured store with worker-partitioned ids and rebuild
    /// the reverse index from it.
    pub fn open<S: Into<String>>(
        config: &IndexerConfig,
        hub: Arc<dyn ServiceDiscovery>,
        group: usize,
        endpoint: S,
        heart_rate: Duration,
    ) -> Result<Self> {
        let indexer = Indexer::from_config(config)?;
        indexer.load_from_index_file()?;
        Ok(Self::new(Arc::new(indexer), hub, group, endpoint, heart_rate))
    }

    pub fn indexer(&self) -> &Arc<Indexer> {
        &self.indexer
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn group(&self) -> usize {
        self.group
    }

    /// Lease currently backing the registration.
    pub fn lease(&self) -> Option<LeaseId> {
        *self.lease.lock()
    }

    /// Register with the hub and start the heartbeat.
    ///
    /// A worker that cannot register must not serve, so the error is returned
    /// to the caller. Renewal failures later on are only logged.
    pub async fn register(&self) -> Result<LeaseId> {
        let lease = self.hub.register(self.group, &self.endpoint, None).await?;
        *self.lease.lock() = Some(lease);

        let hub = self.hub.clone();
        let held = self.lease.clone();
        let cancel = self.cancel.child_token();
        let (group, endpoint) = (self.group, self.endpoint.clone());
        let period = self
            .heart_rate
            .saturating_sub(HEARTBEAT_MARGIN)
            .max(Duration::from_millis(10));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let current = *held.lock();
                match hub.register(group, &endpoint, current).await {
                    Ok(lease) => *held.lock() = Some(lease),
                    Err(e) => warn!("heartbeat of {endpoint} failed, retrying next tick: {e}"),
                }
            }
        });

        if let Some(previous) = self.heartbeat.lock().replace(handle) {
            previous.abort();
        }
        info!(
            "worker {} serving group {} with lease {lease}",
            self.endpoint, self.group
        );
        Ok(lease)
    }

    /// Stop the heartbeat, unregister and close the indexer.
    pub async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let handle = self.heartbeat.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("heartbeat task of {} failed: {e}", self.endpoint);
            }
        }
        if self.lease.lock().take().is_some() {
            self.hub.unregister(self.group, &self.endpoint).await?;
        }
        self.indexer.close()
    }
}

#[async_trait]
impl IndexService for IndexWorker {
    async fn add_doc(&self, doc: Document) -> Result<usize> {
        self.indexer.add_doc(doc)
    }

    async fn delete_doc(&self, doc_id: &str) -> Result<usize> {
        self.indexer.delete_doc(doc_id)
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<Document>> {
        self.indexer.search(&request.query, &request.filter)
    }

    async fn count(&self) -> Result<usize> {
        self.indexer.count()
    }
}
