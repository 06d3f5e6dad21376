//! In-memory reverse index.
//!
//! The keyword table is a [`ConcurrentMap`] from canonical keyword key to a
//! shared [`PostingList`]. Mutations of a keyword's list are serialized by
//! one of a fixed number of stripe locks chosen by hashing the keyword, so
//! unrelated keywords that land on the same stripe also serialize. Readers
//! take the list's own read lock and never touch the stripes.

use std::hash::BuildHasher;
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::{Mutex, RwLock};

use crate::document::{Document, Keyword};
use crate::index::posting::{BitsFilter, Posting, PostingList, intersect, union};
use crate::query::TermQuery;
use crate::util::concurrent_map::ConcurrentMap;

/// Number of stripe locks guarding posting-list mutation.
pub const STRIPE_COUNT: usize = 1000;

/// Keyword → documents lookup used by the [`Indexer`](crate::index::Indexer).
pub trait ReverseIndex: Send + Sync + std::fmt::Debug {
    /// Insert `doc` under each of its keywords, keyed by `doc.seq_id`.
    fn add(&self, doc: &Document);

    /// Remove the entry for `seq_id` from `keyword`'s posting list.
    fn delete(&self, seq_id: u64, keyword: &Keyword);

    /// Evaluate `query` and return matching document ids.
    fn search(&self, query: &TermQuery, filter: &BitsFilter) -> Vec<String>;
}

type SharedPostingList = Arc<RwLock<PostingList>>;

/// Striped-lock reverse index over ordered posting lists.
#[derive(Debug)]
pub struct InvertedIndex {
    table: ConcurrentMap<SharedPostingList>,
    stripes: Vec<Mutex<()>>,
    hasher: RandomState,
}

impl InvertedIndex {
    /// Create an index sized for roughly `doc_num_estimate` keywords.
    pub fn new(doc_num_estimate: usize) -> Self {
        InvertedIndex {
            table: ConcurrentMap::new(doc_num_estimate),
            stripes: (0..STRIPE_COUNT).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }

    fn stripe(&self, key: &str) -> &Mutex<()> {
        let n = self.hasher.hash_one(key) % self.stripes.len() as u64;
        &self.stripes[n as usize]
    }

    /// Sequence numbers currently posted under `keyword`, ascending.
    pub fn postings_of(&self, keyword: &Keyword) -> Vec<u64> {
        self.table
            .get(&keyword.key())
            .map(|list| list.read().seq_ids().collect())
            .unwrap_or_default()
    }

    /// Evaluate a query tree into a filtered, ascending posting snapshot.
    ///
    /// The bitmask filter is applied at the leaves, so AND/OR only ever see
    /// postings that already passed it.
    pub fn evaluate(&self, query: &TermQuery, filter: &BitsFilter) -> Vec<Posting> {
        match query {
            TermQuery::Term(keyword) => match self.table.get(&keyword.key()) {
                Some(list) => list.read().filtered(filter),
                None => Vec::new(),
            },
            TermQuery::And(children) if !children.is_empty() => {
                intersect(children.iter().map(|c| self.evaluate(c, filter)).collect())
            }
            TermQuery::Or(children) if !children.is_empty() => {
                union(children.iter().map(|c| self.evaluate(c, filter)).collect())
            }
            _ => Vec::new(),
        }
    }
}

impl ReverseIndex for InvertedIndex {
    fn add(&self, doc: &Document) {
        for keyword in &doc.keywords {
            let key = keyword.key();
            let _stripe = self.stripe(&key).lock();
            let list = self
                .table
                .get_or_insert_with(&key, || Arc::new(RwLock::new(PostingList::new())));
            list.write().upsert(doc.seq_id, &doc.id, doc.bits_feature);
        }
    }

    fn delete(&self, seq_id: u64, keyword: &Keyword) {
        let key = keyword.key();
        let _stripe = self.stripe(&key).lock();
        if let Some(list) = self.table.get(&key) {
            list.write().remove(seq_id);
        }
    }

    fn search(&self, query: &TermQuery, filter: &BitsFilter) -> Vec<String> {
        self.evaluate(query, filter)
            .into_iter()
            .map(|p| p.doc_id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, seq_id: u64, words: &[&str], bits: u64) -> Document {
        let mut doc = Document::builder(id).bits(bits);
        for word in words {
            doc = doc.keyword("content", *word);
        }
        let mut doc = doc.build();
        doc.seq_id = seq_id;
        doc
    }

    fn index() -> InvertedIndex {
        let index = InvertedIndex::new(64);
        index.add(&doc("a", 1, &["rust", "tokio"], 0b001));
        index.add(&doc("b", 2, &["rust", "serde"], 0b010));
        index.add(&doc("c", 3, &["go", "tokio"], 0b011));
        index
    }

    #[test]
    fn test_leaf_search() {
        let index = index();
        let ids = index.search(&TermQuery::term("content", "rust"), &BitsFilter::none());
        assert_eq!(ids, vec!["a", "b"]);
        assert!(
            index
                .search(&TermQuery::term("content", "java"), &BitsFilter::none())
                .is_empty()
        );
    }

    #[test]
    fn test_and_or_search() {
        let index = index();
        let and = TermQuery::term("content", "rust").and([TermQuery::term("content", "tokio")]);
        assert_eq!(index.search(&and, &BitsFilter::none()), vec!["a"]);

        let or = TermQuery::term("content", "serde").or([TermQuery::term("content", "go")]);
        assert_eq!(index.search(&or, &BitsFilter::none()), vec!["b", "c"]);

        let nested = TermQuery::term("content", "tokio")
            .and([TermQuery::term("content", "rust").or([TermQuery::term("content", "go")])]);
        assert_eq!(index.search(&nested, &BitsFilter::none()), vec!["a", "c"]);
    }

    #[test]
    fn test_filter_applied_at_leaves() {
        let index = index();
        let query = TermQuery::term("content", "tokio");
        let filter = BitsFilter::new(0b010, 0, vec![]);
        assert_eq!(index.search(&query, &filter), vec!["c"]);

        let filter = BitsFilter::new(0, 0b010, vec![]);
        assert_eq!(index.search(&query, &filter), vec!["a"]);
    }

    #[test]
    fn test_delete() {
        let index = index();
        index.delete(1, &Keyword::new("content", "rust"));
        index.delete(99, &Keyword::new("content", "rust"));
        index.delete(1, &Keyword::new("content", "missing"));
        assert_eq!(index.postings_of(&Keyword::new("content", "rust")), vec![2]);
    }

    #[test]
    fn test_readd_same_seq_overwrites() {
        let index = InvertedIndex::new(8);
        index.add(&doc("a", 1, &["x"], 0));
        index.add(&doc("a", 1, &["x"], 0b1));
        let filter = BitsFilter::new(0b1, 0, vec![]);
        assert_eq!(index.search(&TermQuery::term("content", "x"), &filter), vec!["a"]);
    }

    #[test]
    fn test_empty_query() {
        let index = index();
        assert!(index.search(&TermQuery::default(), &BitsFilter::none()).is_empty());
        assert!(index.search(&TermQuery::And(vec![]), &BitsFilter::none()).is_empty());
    }
}
