//! Configuration for indexers and cluster components.
//!
//! Durations are written as milliseconds in JSON:
//!
//! ```
//! use std::time::Duration;
//! use tessera::config::TesseraConfig;
//!
//! let config: TesseraConfig = serde_json::from_str(
//!     r#"{ "cluster": { "index_name": "books", "heart_rate": 5000 } }"#,
//! ).unwrap();
//! assert_eq!(config.cluster.index_name, "books");
//! assert_eq!(config.cluster.heart_rate, Duration::from_secs(5));
//! assert_eq!(config.cluster.discovery_qps, 10);
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TesseraError};
use crate::storage::StoreConfig;

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TesseraConfig {
    pub indexer: IndexerConfig,
    pub cluster: ClusterConfig,
}

impl TesseraConfig {
    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        let config: TesseraConfig = serde_json::from_str(&text)
            .with_context(|| format!("failed to parse config {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_indexer(mut self, indexer: IndexerConfig) -> Self {
        self.indexer = indexer;
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = cluster;
        self
    }

    /// Reject values the cluster components cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.indexer.worker_id > crate::util::id_source::MAX_WORKER_ID {
            return Err(TesseraError::invalid_config(format!(
                "worker_id {} exceeds {}",
                self.indexer.worker_id,
                crate::util::id_source::MAX_WORKER_ID
            )));
        }
        if self.cluster.index_name.trim().is_empty() {
            return Err(TesseraError::invalid_config("index_name is empty"));
        }
        if self.cluster.heart_rate <= Duration::from_millis(100) {
            return Err(TesseraError::invalid_config(
                "heart_rate must be longer than 100ms",
            ));
        }
        Ok(())
    }
}

/// Configuration of a local indexer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Expected number of documents; sizes the keyword table.
    pub doc_num_estimate: usize,

    /// Forward-store backend and location.
    pub store: StoreConfig,

    /// Partition of the snowflake id space owned by this worker.
    pub worker_id: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        IndexerConfig {
            doc_num_estimate: 50_000,
            store: StoreConfig::default(),
            worker_id: 0,
        }
    }
}

impl IndexerConfig {
    pub fn with_doc_num_estimate(mut self, estimate: usize) -> Self {
        self.doc_num_estimate = estimate;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_worker_id(mut self, worker_id: u64) -> Self {
        self.worker_id = worker_id;
        self
    }
}

/// Settings of the distributed lock guarding cluster-wide counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Acquisition attempts before giving up.
    pub max_retries: u32,

    /// Pause between attempts.
    #[serde(with = "millis")]
    pub retry_interval: Duration,

    /// TTL of the lease the lock key is attached to.
    #[serde(with = "millis")]
    pub lease_ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        LockConfig {
            max_retries: 10,
            retry_interval: Duration::from_millis(100),
            lease_ttl: Duration::from_secs(3),
        }
    }
}

impl LockConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }
}

/// Configuration shared by workers, hubs and sentinels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Namespace of every key this index writes to the coordination store.
    pub index_name: String,

    /// TTL of worker registrations; workers renew slightly more often.
    #[serde(with = "millis")]
    pub heart_rate: Duration,

    /// Discovery calls allowed per second through the proxy (also the burst).
    pub discovery_qps: u32,

    pub lock: LockConfig,

    /// Overall deadline of a fanned-out search or count.
    #[serde(with = "millis")]
    pub rpc_timeout: Duration,

    /// Deadline for dialing one endpoint.
    #[serde(with = "millis")]
    pub dial_timeout: Duration,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            index_name: "tessera".to_string(),
            heart_rate: Duration::from_secs(3),
            discovery_qps: 10,
            lock: LockConfig::default(),
            rpc_timeout: Duration::from_millis(100),
            dial_timeout: Duration::from_secs(2),
        }
    }
}

impl ClusterConfig {
    pub fn with_index_name<S: Into<String>>(mut self, name: S) -> Self {
        self.index_name = name.into();
        self
    }

    pub fn with_heart_rate(mut self, heart_rate: Duration) -> Self {
        self.heart_rate = heart_rate;
        self
    }

    pub fn with_discovery_qps(mut self, qps: u32) -> Self {
        self.discovery_qps = qps;
        self
    }

    pub fn with_lock(mut self, lock: LockConfig) -> Self {
        self.lock = lock;
        self
    }

    pub fn with_rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    pub fn with_dial_timeout(mut self, timeout: Duration) -> Self {
        self.dial_timeout = timeout;
        self
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::storage::StoreKind;

    #[test]
    fn test_defaults() {
        let config = TesseraConfig::default();
        assert_eq!(config.cluster.dial_timeout, Duration::from_secs(2));
        assert_eq!(config.indexer.store.kind, StoreKind::Log);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tessera.json");
        fs::write(
            &path,
            r#"{
                "indexer": { "worker_id": 3, "store": { "kind": "snapshot", "path": "/tmp/x.snap" } },
                "cluster": { "lock": { "retry_interval": 250 }, "rpc_timeout": 500 }
            }"#,
        )
        .unwrap();

        let config = TesseraConfig::from_json_file(&path).unwrap();
        assert_eq!(config.indexer.worker_id, 3);
        assert_eq!(config.indexer.store.kind, StoreKind::Snapshot);
        assert_eq!(config.cluster.lock.retry_interval, Duration::from_millis(250));
        assert_eq!(config.cluster.lock.max_retries, 10);
        assert_eq!(config.cluster.rpc_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_from_json_file_names_the_file() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.json");
        let err = TesseraConfig::from_json_file(&missing).unwrap_err();
        assert!(matches!(err, TesseraError::Anyhow(_)));
        assert!(err.to_string().contains("failed to read config"));
        assert!(err.to_string().contains("missing.json"));

        let broken = dir.path().join("broken.json");
        fs::write(&broken, "{ not json").unwrap();
        let err = TesseraConfig::from_json_file(&broken).unwrap_err();
        assert!(err.to_string().contains("failed to parse config"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = TesseraConfig::default()
            .with_indexer(IndexerConfig::default().with_worker_id(4096));
        assert!(config.validate().is_err());

        let config = TesseraConfig::default()
            .with_cluster(ClusterConfig::default().with_heart_rate(Duration::from_millis(50)));
        assert!(config.validate().is_err());
    }
}
