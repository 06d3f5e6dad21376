//! Caching, rate-limited front for a [`ServiceHub`].
//!
//! The proxy watches each group it was asked about and keeps its endpoint
//! list in memory, refreshing it on every change under the group's prefix.
//! Discovery calls are bounded by a token bucket; a denied call yields an
//! empty list rather than an error.

use std::sync::Arc;
use std::time::Duration;

use ahash::{AHashMap, AHashSet};
use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cluster::balancer::LoadBalancer;
use crate::cluster::coordinator::LeaseId;
use crate::cluster::hub::{ServiceDiscovery, ServiceHub};
use crate::error::Result;

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

/// Token bucket refilled at `rate` tokens per second up to `rate` tokens.
///
/// A rate of zero disables limiting.
#[derive(Debug)]
pub struct TokenBucket {
    rate: f64,
    bucket: Mutex<Bucket>,
}

impl TokenBucket {
    pub fn new(rate: u32) -> Self {
        TokenBucket {
            rate: rate as f64,
            bucket: Mutex::new(Bucket {
                tokens: rate as f64,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Take one token if available. Never waits.
    pub fn try_acquire(&self) -> bool {
        if self.rate <= 0.0 {
            return true;
        }
        let mut bucket = self.bucket.lock();
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.rate);
        bucket.refilled_at = now;
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Time until one token is available.
    pub fn wait_hint(&self) -> Duration {
        if self.rate <= 0.0 {
            return Duration::ZERO;
        }
        let bucket = self.bucket.lock();
        let missing = (1.0 - bucket.tokens).max(0.0);
        Duration::from_secs_f64(missing / self.rate)
    }
}

#[derive(Debug, Default)]
struct CachedGroup {
    /// Bumped by the watch on every refresh.
    revision: u64,
    endpoints: Vec<String>,
}

/// Endpoint lists per group. The watch task owns freshness: a foreground
/// lookup only fills a group whose revision has not moved since it looked.
#[derive(Debug, Default)]
struct EndpointCache {
    groups: RwLock<AHashMap<usize, CachedGroup>>,
}

impl EndpointCache {
    /// Current revision of `group` and its endpoints, if any are cached.
    fn lookup(&self, group: usize) -> (u64, Option<Vec<String>>) {
        let groups = self.groups.read();
        match groups.get(&group) {
            Some(cached) if !cached.endpoints.is_empty() => {
                (cached.revision, Some(cached.endpoints.clone()))
            }
            Some(cached) => (cached.revision, None),
            None => (0, None),
        }
    }

    /// Store what the watch just read.
    fn refresh(&self, group: usize, endpoints: Vec<String>) {
        let mut groups = self.groups.write();
        let cached = groups.entry(group).or_default();
        cached.revision += 1;
        cached.endpoints = endpoints;
    }

    /// Store a foreground lookup unless the watch refreshed `group` after
    /// `seen` was read.
    fn fill(&self, group: usize, seen: u64, endpoints: Vec<String>) -> bool {
        let mut groups = self.groups.write();
        let cached = groups.entry(group).or_default();
        if cached.revision != seen {
            return false;
        }
        cached.endpoints = endpoints;
        true
    }
}

/// [`ServiceDiscovery`] decorator adding per-group watches, an endpoint cache
/// and a discovery rate limit.
#[derive(Debug)]
pub struct ServiceHubProxy {
    hub: Arc<ServiceHub>,
    cache: Arc<EndpointCache>,
    watched: Mutex<AHashSet<usize>>,
    watches: Mutex<Vec<JoinHandle<()>>>,
    limiter: TokenBucket,
    cancel: CancellationToken,
}

impl ServiceHubProxy {
    pub fn new(hub: Arc<ServiceHub>, qps: u32) -> Self {
        ServiceHubProxy {
            hub,
            cache: Arc::new(EndpointCache::default()),
            watched: Mutex::new(AHashSet::new()),
            watches: Mutex::new(Vec::new()),
            limiter: TokenBucket::new(qps),
            cancel: CancellationToken::new(),
        }
    }

    pub fn hub(&self) -> &Arc<ServiceHub> {
        &self.hub
    }

    /// Time until the next discovery call would be admitted.
    pub fn wait_hint(&self) -> Duration {
        self.limiter.wait_hint()
    }

    /// Start watching `group` unless a watch is already running.
    async fn ensure_watch(&self, group: usize) -> Result<()> {
        if !self.watched.lock().insert(group) {
            return Ok(());
        }
        let prefix = self.hub.group_prefix(group);
        let mut events = match self.hub.coordinator().watch_prefix(&prefix).await {
            Ok(events) => events,
            Err(e) => {
                self.watched.lock().remove(&group);
                return Err(e);
            }
        };
        debug!("watching {prefix}");

        let hub = self.hub.clone();
        let cache = self.cache.clone();
        let cancel = self.cancel.child_token();
        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                let Some(event) = event else { break };
                debug!("group {group} changed at {}", event.key());
                match hub.get_service_endpoints(group).await {
                    Ok(endpoints) => cache.refresh(group, endpoints),
                    Err(e) => warn!("failed to refresh endpoints of group {group}: {e}"),
                }
            }
            debug!("stopped watching group {group}");
        });
        self.watches.lock().push(handle);
        Ok(())
    }
}

#[async_trait]
impl ServiceDiscovery for ServiceHubProxy {
    async fn register(&self, group: usize, endpoint: &str, lease: Option<LeaseId>) -> Result<LeaseId> {
        self.hub.register(group, endpoint, lease).await
    }

    async fn unregister(&self, group: usize, endpoint: &str) -> Result<()> {
        self.hub.unregister(group, endpoint).await
    }

    async fn get_service_endpoints(&self, group: usize) -> Result<Vec<String>> {
        if !self.limiter.try_acquire() {
            debug!("discovery for group {group} rate limited");
            return Ok(Vec::new());
        }
        if let Err(e) = self.ensure_watch(group).await {
            warn!("failed to watch group {group}: {e}");
        }
        let (seen, cached) = self.cache.lookup(group);
        if let Some(endpoints) = cached {
            return Ok(endpoints);
        }
        let endpoints = self.hub.get_service_endpoints(group).await?;
        if !endpoints.is_empty() && !self.cache.fill(group, seen, endpoints.clone()) {
            debug!("group {group} was refreshed during lookup, keeping the watched list");
        }
        Ok(endpoints)
    }

    async fn count_index_group(&self) -> Result<usize> {
        self.hub.count_index_group().await
    }

    fn balancer(&self) -> &dyn LoadBalancer {
        self.hub.balancer()
    }

    async fn close(&self) -> Result<()> {
        self.cancel.cancel();
        let handles: Vec<_> = self.watches.lock().drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("watch task failed: {e}");
            }
        }
        self.hub.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::MemoryCoordinator;
    use crate::config::ClusterConfig;

    fn proxy(qps: u32) -> ServiceHubProxy {
        let config = ClusterConfig::default().with_index_name("books");
        let hub = ServiceHub::new(Arc::new(MemoryCoordinator::new()), &config);
        ServiceHubProxy::new(Arc::new(hub), qps)
    }

    #[test]
    fn test_token_bucket_burst() {
        let bucket = TokenBucket::new(10);
        let granted = (0..15).filter(|_| bucket.try_acquire()).count();
        assert_eq!(granted, 10);
        assert!(bucket.wait_hint() > Duration::ZERO);

        let unlimited = TokenBucket::new(0);
        assert!((0..100).all(|_| unlimited.try_acquire()));
        assert_eq!(unlimited.wait_hint(), Duration::ZERO);
    }

    #[test]
    fn test_stale_lookup_does_not_overwrite_watched_list() {
        let cache = EndpointCache::default();
        let (seen, cached) = cache.lookup(0);
        assert_eq!((seen, cached), (0, None));

        // The watch stores a newer list while a lookup is in flight.
        cache.refresh(0, vec!["a".to_string(), "b".to_string()]);
        assert!(!cache.fill(0, seen, vec!["a".to_string()]));
        assert_eq!(cache.lookup(0), (1, Some(vec!["a".to_string(), "b".to_string()])));

        // A lookup that saw the current revision may fill an emptied group.
        cache.refresh(0, Vec::new());
        let (seen, cached) = cache.lookup(0);
        assert_eq!((seen, cached), (2, None));
        assert!(cache.fill(0, seen, vec!["c".to_string()]));
        assert_eq!(cache.lookup(0), (2, Some(vec!["c".to_string()])));
    }

    #[tokio::test]
    async fn test_rate_limited_discovery_is_empty() {
        let proxy = proxy(10);
        proxy.register(0, "a", None).await.unwrap();

        let mut hits = 0;
        for _ in 0..15 {
            if !proxy.get_service_endpoints(0).await.unwrap().is_empty() {
                hits += 1;
            }
        }
        assert_eq!(hits, 10);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(proxy.get_service_endpoints(0).await.unwrap(), vec!["a"]);
        proxy.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cache_follows_watch_events() {
        let proxy = proxy(0);
        proxy.register(0, "a", None).await.unwrap();
        assert_eq!(proxy.get_service_endpoints(0).await.unwrap(), vec!["a"]);

        proxy.register(0, "b", None).await.unwrap();
        let mut endpoints = Vec::new();
        for _ in 0..50 {
            endpoints = proxy.get_service_endpoints(0).await.unwrap();
            if endpoints.len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(endpoints, vec!["a", "b"]);

        proxy.unregister(0, "a").await.unwrap();
        proxy.unregister(0, "b").await.unwrap();
        for _ in 0..50 {
            if proxy.cache.lookup(0).1.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(proxy.get_service_endpoints(0).await.unwrap().is_empty());
        assert_eq!(proxy.watched.lock().len(), 1);
        proxy.close().await.unwrap();
    }
}
