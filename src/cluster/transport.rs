//! Call surface between sentinels and index workers.
//!
//! [`IndexService`] is the remote interface of an indexer. A [`Connector`]
//! dials an endpoint and yields an [`IndexClient`], which adds connection
//! health and shutdown. [`LocalNetwork`] is an in-process transport: workers
//! bind to endpoint names and clients call them directly.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use ahash::AHashMap;
use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{Result, TesseraError};
use crate::index::{BitsFilter, Indexer};
use crate::query::TermQuery;

/// A search call: the query and the bitmask filter applied at its leaves.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: TermQuery,
    pub filter: BitsFilter,
}

impl SearchRequest {
    pub fn new(query: TermQuery, filter: BitsFilter) -> Self {
        SearchRequest { query, filter }
    }
}

/// Operations an indexer exposes to the cluster.
#[async_trait]
pub trait IndexService: Send + Sync {
    /// Add or replace a document, returning the affected count.
    async fn add_doc(&self, doc: Document) -> Result<usize>;

    /// Delete a document, returning the affected count.
    async fn delete_doc(&self, doc_id: &str) -> Result<usize>;

    async fn search(&self, request: SearchRequest) -> Result<Vec<Document>>;

    /// Number of stored documents.
    async fn count(&self) -> Result<usize>;
}

#[async_trait]
impl IndexService for Indexer {
    async fn add_doc(&self, doc: Document) -> Result<usize> {
        Indexer::add_doc(self, doc)
    }

    async fn delete_doc(&self, doc_id: &str) -> Result<usize> {
        Indexer::delete_doc(self, doc_id)
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<Document>> {
        Indexer::search(self, &request.query, &request.filter)
    }

    async fn count(&self) -> Result<usize> {
        Indexer::count(self)
    }
}

/// A connection to one endpoint.
#[async_trait]
pub trait IndexClient: IndexService + fmt::Debug {
    fn endpoint(&self) -> &str;

    /// Whether calls on this connection can still succeed.
    fn is_healthy(&self) -> bool;

    async fn close(&self) -> Result<()>;
}

/// Dials endpoints.
#[async_trait]
pub trait Connector: Send + Sync + fmt::Debug {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn IndexClient>>;
}

type Bindings = AHashMap<String, Arc<dyn IndexService>>;

/// In-process endpoint registry.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    bindings: Arc<RwLock<Bindings>>,
}

impl fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut endpoints: Vec<String> = self.bindings.read().keys().cloned().collect();
        endpoints.sort();
        f.debug_struct("LocalNetwork")
            .field("endpoints", &endpoints)
            .finish()
    }
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `service` at `endpoint`, replacing any previous binding.
    pub fn bind<S: Into<String>>(&self, endpoint: S, service: Arc<dyn IndexService>) {
        let endpoint = endpoint.into();
        debug!("bound {endpoint}");
        self.bindings.write().insert(endpoint, service);
    }

    /// Stop serving `endpoint`. Open connections to it turn unhealthy.
    pub fn unbind(&self, endpoint: &str) -> bool {
        self.bindings.write().remove(endpoint).is_some()
    }

    pub fn connector(&self) -> LocalConnector {
        LocalConnector {
            network: self.clone(),
        }
    }

    fn lookup(&self, endpoint: &str) -> Option<Arc<dyn IndexService>> {
        self.bindings.read().get(endpoint).cloned()
    }
}

/// [`Connector`] for a [`LocalNetwork`].
#[derive(Debug, Clone)]
pub struct LocalConnector {
    network: LocalNetwork,
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn IndexClient>> {
        let service = self
            .network
            .lookup(endpoint)
            .ok_or_else(|| TesseraError::rpc(format!("connection refused by {endpoint}")))?;
        Ok(Arc::new(LocalClient {
            endpoint: endpoint.to_string(),
            network: self.network.clone(),
            service,
            closed: AtomicBool::new(false),
        }))
    }
}

struct LocalClient {
    endpoint: String,
    network: LocalNetwork,
    service: Arc<dyn IndexService>,
    closed: AtomicBool,
}

impl fmt::Debug for LocalClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalClient")
            .field("endpoint", &self.endpoint)
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl LocalClient {
    fn service(&self) -> Result<&Arc<dyn IndexService>> {
        if self.is_healthy() {
            Ok(&self.service)
        } else {
            Err(TesseraError::rpc(format!("{} is unavailable", self.endpoint)))
        }
    }
}

#[async_trait]
impl IndexService for LocalClient {
    async fn add_doc(&self, doc: Document) -> Result<usize> {
        self.service()?.add_doc(doc).await
    }

    async fn delete_doc(&self, doc_id: &str) -> Result<usize> {
        self.service()?.delete_doc(doc_id).await
    }

    async fn search(&self, request: SearchRequest) -> Result<Vec<Document>> {
        self.service()?.search(request).await
    }

    async fn count(&self) -> Result<usize> {
        self.service()?.count().await
    }
}

#[async_trait]
impl IndexClient for LocalClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn is_healthy(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        self.network
            .lookup(&self.endpoint)
            .is_some_and(|bound| Arc::ptr_eq(&bound, &self.service))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
