//! Documents and keywords.
//!
//! A [`Document`] carries an external id, the internal sequence number the
//! indexer assigns on insert, a list of [`Keyword`]s, a 64-bit feature
//! bitmask and an opaque payload the engine never interprets.
//!
//! # Examples
//!
//! ```
//! use tessera::document::Document;
//!
//! let doc = Document::builder("book-1")
//!     .keyword("title", "rust")
//!     .keyword("content", "ownership")
//!     .bits(0b101)
//!     .payload(b"{\"price\": 39}".to_vec())
//!     .build();
//!
//! assert_eq!(doc.keywords.len(), 2);
//! let bytes = doc.encode().unwrap();
//! assert_eq!(tessera::document::Document::decode(&bytes).unwrap(), doc);
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A `(field, word)` pair a document is searchable by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Keyword {
    pub field: String,
    pub word: String,
}

impl Keyword {
    pub fn new<F: Into<String>, W: Into<String>>(field: F, word: W) -> Self {
        Keyword {
            field: field.into(),
            word: word.into(),
        }
    }

    /// Canonical posting-table key, `"field.word"`.
    pub fn key(&self) -> String {
        format!("{}.{}", self.field, self.word)
    }

    /// Both field and word are empty.
    pub fn is_empty(&self) -> bool {
        self.field.is_empty() && self.word.is_empty()
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.field, self.word)
    }
}

/// A unit of indexing.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Document {
    /// External, unique key.
    pub id: String,
    /// Ascending sequence number assigned by the indexer on insert.
    pub seq_id: u64,
    /// Searchable keywords; duplicates are allowed.
    pub keywords: Vec<Keyword>,
    /// Bitmask of categorical features.
    pub bits_feature: u64,
    /// Opaque payload.
    pub payload: Vec<u8>,
}

impl Document {
    /// Create a document with the given id and nothing else.
    pub fn new<S: Into<String>>(id: S) -> Self {
        Document {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Create a builder for constructing documents.
    pub fn builder<S: Into<String>>(id: S) -> DocumentBuilder {
        DocumentBuilder {
            document: Document::new(id),
        }
    }

    /// Serialize for the forward store.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    /// Deserialize a forward-store value.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// A builder for constructing documents in a fluent manner.
#[derive(Debug)]
pub struct DocumentBuilder {
    document: Document,
}

impl DocumentBuilder {
    /// Append a keyword.
    pub fn keyword<F: Into<String>, W: Into<String>>(mut self, field: F, word: W) -> Self {
        self.document.keywords.push(Keyword::new(field, word));
        self
    }

    /// Append several keywords.
    pub fn keywords<I: IntoIterator<Item = Keyword>>(mut self, keywords: I) -> Self {
        self.document.keywords.extend(keywords);
        self
    }

    /// Set the feature bitmask.
    pub fn bits(mut self, bits: u64) -> Self {
        self.document.bits_feature = bits;
        self
    }

    /// Set the payload.
    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.document.payload = payload;
        self
    }

    /// Build the document.
    pub fn build(self) -> Document {
        self.document
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_key() {
        let keyword = Keyword::new("content", "rust");
        assert_eq!(keyword.key(), "content.rust");
        assert_eq!(keyword.to_string(), "content.rust");
        assert!(!keyword.is_empty());
        assert!(Keyword::default().is_empty());
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(Document::decode(&[0xff, 0x01]).is_err());
    }
}
