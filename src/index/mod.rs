//! Index module for Tessera.
//!
//! This module provides the in-memory reverse index (keyword → posting list),
//! the posting-list set algebra it evaluates queries with, and the
//! [`Indexer`] facade that keeps the reverse index in step with a forward
//! store.

pub mod indexer;
pub mod posting;
pub mod reverse;

// Re-export commonly used types
pub use indexer::Indexer;
pub use posting::{BitsFilter, Posting, PostingList, filter_by_bits, intersect, union};
pub use reverse::{InvertedIndex, ReverseIndex};
