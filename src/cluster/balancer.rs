//! Endpoint selection among the replicas of a shard group.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

/// Picks one endpoint out of a group's replicas.
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// `None` only when `endpoints` is empty.
    fn take(&self, endpoints: &[String]) -> Option<String>;
}

/// Cycles through the endpoints in order.
#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn take(&self, endpoints: &[String]) -> Option<String> {
        if endpoints.is_empty() {
            return None;
        }
        let n = self.next.fetch_add(1, Ordering::Relaxed);
        endpoints.get(n % endpoints.len()).cloned()
    }
}

/// Picks uniformly at random.
#[derive(Debug, Default)]
pub struct RandomSelect;

impl LoadBalancer for RandomSelect {
    fn take(&self, endpoints: &[String]) -> Option<String> {
        if endpoints.is_empty() {
            return None;
        }
        let i = rand::rng().random_range(0..endpoints.len());
        endpoints.get(i).cloned()
    }
}
