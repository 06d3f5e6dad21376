//! # Tessera
//!
//! A shardable in-memory inverted-index search engine with lease-based
//! cluster coordination.
//!
//! ## Features
//!
//! - Boolean keyword queries (AND/OR) over per-keyword posting lists
//! - 64-bit feature bitmask filtering applied at every query leaf
//! - Lock-striped reverse index over a bucketed concurrent map
//! - Pluggable forward stores (memory, snapshot file, append-only log)
//! - Shard groups with leased registration, heartbeats and a fenced
//!   distributed lock
//! - Client-side routing with replicated writes and partial-result searches
//!
//! ## Example
//!
//! ```
//! use tessera::document::Document;
//! use tessera::index::{BitsFilter, Indexer};
//! use tessera::query::TermQuery;
//! use tessera::storage::{StoreConfig, StoreKind};
//!
//! # fn main() -> tessera::error::Result<()> {
//! let indexer = Indexer::open(&StoreConfig::new(StoreKind::Memory, ""), 1024)?;
//! indexer.add_doc(Document::builder("A").keyword("content", "x").bits(0b001).build())?;
//! indexer.add_doc(Document::builder("B").keyword("content", "x").bits(0b010).build())?;
//!
//! let query = TermQuery::term("content", "x");
//! let hits = indexer.search(&query, &BitsFilter::new(0, 0, vec![0b001]))?;
//! assert_eq!(hits.len(), 1);
//! assert_eq!(hits[0].id, "A");
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod cluster;
pub mod config;
pub mod document;
pub mod error;
pub mod index;
pub mod query;
pub mod storage;
pub mod util;

pub mod prelude {
    pub use crate::cluster::{IndexService, SearchRequest, Sentinel, ServiceDiscovery};
    pub use crate::config::TesseraConfig;
    pub use crate::document::{Document, Keyword};
    pub use crate::error::{Result, TesseraError};
    pub use crate::index::{BitsFilter, Indexer};
    pub use crate::query::TermQuery;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
