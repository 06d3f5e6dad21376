//! Indexer: forward store + reverse index behind one facade.
//!
//! The forward store is the durable record of every document; the reverse
//! index lives in memory and is rebuilt from the forward store with
//! [`Indexer::load_from_index_file`] after a restart. There is no atomicity
//! across the two: a crash between the forward write and the reverse insert
//! is repaired by the next rebuild.

use std::sync::Arc;

use log::{debug, info, warn};
use rayon::prelude::*;

use crate::config::IndexerConfig;
use crate::document::Document;
use crate::error::Result;
use crate::index::posting::BitsFilter;
use crate::index::reverse::{InvertedIndex, ReverseIndex};
use crate::query::TermQuery;
use crate::storage::{ForwardStore, StoreConfig, open_store};
use crate::util::id_source::{IdSource, SequentialIds, SnowflakeIds};

/// Document lifecycle over a forward store and a reverse index.
#[derive(Debug)]
pub struct Indexer {
    forward: Box<dyn ForwardStore>,
    reverse: Box<dyn ReverseIndex>,
    ids: Arc<dyn IdSource>,
}

impl Indexer {
    /// Assemble an indexer from its parts.
    pub fn new(
        forward: Box<dyn ForwardStore>,
        reverse: Box<dyn ReverseIndex>,
        ids: Arc<dyn IdSource>,
    ) -> Self {
        Indexer {
            forward,
            reverse,
            ids,
        }
    }

    /// Open the configured forward store with a fresh [`InvertedIndex`] and
    /// a sequential id source.
    ///
    /// The reverse index starts empty; call
    /// [`load_from_index_file`](Self::load_from_index_file) to rebuild it.
    pub fn open(store: &StoreConfig, doc_num_estimate: usize) -> Result<Self> {
        Ok(Self::new(
            open_store(store)?,
            Box::new(InvertedIndex::new(doc_num_estimate)),
            Arc::new(SequentialIds::new()),
        ))
    }

    /// Open an indexer for a cluster worker: snowflake ids partitioned by
    /// `worker_id`, so sequence numbers never collide across workers.
    pub fn from_config(config: &IndexerConfig) -> Result<Self> {
        Ok(Self::new(
            open_store(&config.store)?,
            Box::new(InvertedIndex::new(config.doc_num_estimate)),
            Arc::new(SnowflakeIds::new(config.worker_id)?),
        ))
    }

    /// Rebuild the reverse index from the forward store.
    ///
    /// Records that fail to decode are logged and skipped. Every recovered
    /// sequence number is reported to the id source so it is never reissued.
    /// Returns the number of records visited.
    pub fn load_from_index_file(&self) -> Result<usize> {
        let mut records = Vec::new();
        let visited = self.forward.iter_db(&mut |key, value| {
            match Document::decode(value) {
                Ok(doc) => records.push(doc),
                Err(e) => warn!(
                    "skipping undecodable record {}: {e}",
                    String::from_utf8_lossy(key)
                ),
            }
            Ok(())
        })?;

        records.par_iter().for_each(|doc| {
            self.ids.observe(doc.seq_id);
            self.reverse.add(doc);
        });

        info!(
            "loaded {} of {visited} records from forward store {}",
            records.len(),
            self.forward
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "<memory>".to_string())
        );
        Ok(visited)
    }

    /// Add or replace a document.
    ///
    /// Documents whose id is blank are ignored and report 0. Any previous
    /// version with the same id is removed first, so at most one version of
    /// an id is ever live. Returns 1 on success.
    pub fn add_doc(&self, mut doc: Document) -> Result<usize> {
        let doc_id = doc.id.trim();
        if doc_id.is_empty() {
            return Ok(0);
        }
        if doc_id.len() != doc.id.len() {
            doc.id = doc_id.to_string();
        }
        let doc_id = doc.id.clone();

        self.delete_doc(&doc_id)?;

        doc.seq_id = self.ids.next_id();
        let encoded = doc.encode()?;
        self.forward.set(doc_id.as_bytes(), &encoded)?;

        self.reverse.add(&doc);
        debug!("indexed {doc_id} as seq {}", doc.seq_id);
        Ok(1)
    }

    /// Remove a document, returning 1 if it existed and 0 otherwise.
    ///
    /// The forward key is deleted even when the stored record cannot be
    /// decoded; in that case its postings stay behind until the next rebuild.
    pub fn delete_doc(&self, doc_id: &str) -> Result<usize> {
        let key = doc_id.as_bytes();
        let existed = match self.forward.get(key) {
            Ok(Some(bytes)) => {
                match Document::decode(&bytes) {
                    Ok(doc) => {
                        for keyword in &doc.keywords {
                            self.reverse.delete(doc.seq_id, keyword);
                        }
                    }
                    Err(e) => warn!("failed to decode {doc_id} while deleting: {e}"),
                }
                1
            }
            Ok(None) => 0,
            Err(e) => {
                warn!("failed to read {doc_id} while deleting: {e}");
                0
            }
        };
        self.forward.delete(key)?;
        Ok(existed)
    }

    /// Run `query` and load the matching documents from the forward store.
    ///
    /// Records that are missing or fail to decode are logged and skipped.
    pub fn search(&self, query: &TermQuery, filter: &BitsFilter) -> Result<Vec<Document>> {
        let ids = self.reverse.search(query, filter);
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<Vec<u8>> = ids.into_iter().map(String::into_bytes).collect();
        let values = self.forward.batch_get(&keys)?;

        let mut docs = Vec::with_capacity(values.len());
        for (key, value) in keys.iter().zip(values) {
            let Some(bytes) = value else {
                debug!(
                    "{} posted but absent from forward store",
                    String::from_utf8_lossy(key)
                );
                continue;
            };
            match Document::decode(&bytes) {
                Ok(doc) => docs.push(doc),
                Err(e) => warn!(
                    "skipping undecodable result {}: {e}",
                    String::from_utf8_lossy(key)
                ),
            }
        }
        Ok(docs)
    }

    /// Number of documents in the forward store.
    pub fn count(&self) -> Result<usize> {
        self.forward.iter_key(&mut |_| Ok(()))
    }

    /// Flush and close the forward store.
    pub fn close(&self) -> Result<()> {
        self.forward.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn indexer() -> Indexer {
        Indexer::new(
            Box::new(MemoryStore::new()),
            Box::new(InvertedIndex::new(64)),
            Arc::new(SequentialIds::new()),
        )
    }

    fn doc(id: &str, word: &str, bits: u64) -> Document {
        Document::builder(id).keyword("content", word).bits(bits).build()
    }

    #[test]
    fn test_blank_id_ignored() {
        let indexer = indexer();
        assert_eq!(indexer.add_doc(doc("   ", "x", 0)).unwrap(), 0);
        assert_eq!(indexer.count().unwrap(), 0);
    }

    #[test]
    fn test_add_search_delete() {
        let indexer = indexer();
        assert_eq!(indexer.add_doc(doc("A", "x", 0b001)).unwrap(), 1);
        assert_eq!(indexer.add_doc(doc("B", "x", 0b010)).unwrap(), 1);

        let query = TermQuery::term("content", "x");
        let ids = |filter: BitsFilter| -> Vec<String> {
            indexer
                .search(&query, &filter)
                .unwrap()
                .into_iter()
                .map(|d| d.id)
                .collect()
        };
        assert_eq!(ids(BitsFilter::new(0, 0, vec![0b001])), vec!["A"]);
        assert_eq!(ids(BitsFilter::new(0, 0, vec![0b010])), vec!["B"]);
        assert_eq!(ids(BitsFilter::none()), vec!["A", "B"]);

        assert_eq!(indexer.delete_doc("A").unwrap(), 1);
        assert_eq!(indexer.delete_doc("A").unwrap(), 0);
        assert_eq!(ids(BitsFilter::none()), vec!["B"]);
        assert_eq!(indexer.count().unwrap(), 1);
    }

    #[test]
    fn test_readd_replaces_previous_version() {
        let indexer = indexer();
        indexer.add_doc(doc("A", "old", 0)).unwrap();
        indexer.add_doc(doc("A", "new", 0)).unwrap();
        indexer.add_doc(doc("A", "new", 0)).unwrap();

        assert!(
            indexer
                .search(&TermQuery::term("content", "old"), &BitsFilter::none())
                .unwrap()
                .is_empty()
        );
        let hits = indexer
            .search(&TermQuery::term("content", "new"), &BitsFilter::none())
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].seq_id, 3);
        assert_eq!(indexer.count().unwrap(), 1);
    }

    #[test]
    fn test_id_is_trimmed() {
        let indexer = indexer();
        indexer.add_doc(doc(" A ", "x", 0)).unwrap();
        assert_eq!(indexer.delete_doc("A").unwrap(), 1);
    }

    #[test]
    fn test_load_from_index_file_skips_garbage() {
        let store = MemoryStore::new();
        let mut good = doc("A", "x", 0);
        good.seq_id = 41;
        store.set(b"A", &good.encode().unwrap()).unwrap();
        store.set(b"broken", &[0xff]).unwrap();

        let ids = Arc::new(SequentialIds::new());
        let indexer = Indexer::new(
            Box::new(store),
            Box::new(InvertedIndex::new(8)),
            ids.clone(),
        );
        assert_eq!(indexer.load_from_index_file().unwrap(), 2);
        assert_eq!(ids.last(), 41);

        let hits = indexer
            .search(&TermQuery::term("content", "x"), &BitsFilter::none())
            .unwrap();
        assert_eq!(hits, vec![good]);

        indexer.add_doc(doc("B", "x", 0)).unwrap();
        let b = indexer
            .search(&TermQuery::term("content", "x"), &BitsFilter::none())
            .unwrap();
        assert_eq!(b[1].seq_id, 42);
    }
}
