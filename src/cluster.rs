//! Cluster coordination for sharded deployments.
//!
//! Documents are partitioned into shard groups. Every group is served by one
//! or more interchangeable workers ([`IndexWorker`]) that register their
//! endpoint in a coordination store under a lease and keep it alive with a
//! heartbeat. Clients route through a [`Sentinel`], which discovers endpoints
//! via a [`ServiceDiscovery`] implementation ([`ServiceHub`] or the caching,
//! rate-limited [`ServiceHubProxy`]) and fans requests out over a pluggable
//! transport.

pub mod balancer;
pub mod coordinator;
pub mod hub;
pub mod lock;
pub mod memory;
pub mod proxy;
pub mod sentinel;
pub mod transport;
pub mod worker;

pub use balancer::{LoadBalancer, RandomSelect, RoundRobin};
pub use coordinator::{Compare, Coordinator, KeyValue, LeaseId, Txn, TxnOp, TxnResponse, WatchEvent};
pub use hub::{ServiceDiscovery, ServiceHub};
pub use lock::DistributedLock;
pub use memory::MemoryCoordinator;
pub use proxy::{ServiceHubProxy, TokenBucket};
pub use sentinel::{Sentinel, shard_of};
pub use transport::{
    Connector, IndexClient, IndexService, LocalConnector, LocalNetwork, SearchRequest,
};
pub use worker::IndexWorker;
