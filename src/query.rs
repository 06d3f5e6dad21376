//! Boolean keyword queries.
//!
//! A [`TermQuery`] is a tree whose leaves are keywords and whose inner nodes
//! are AND or OR combinations of sub-queries. Queries are built with
//! [`TermQuery::term`] and combined with [`TermQuery::and`] /
//! [`TermQuery::or`]:
//!
//! ```
//! use tessera::query::TermQuery;
//!
//! let query = TermQuery::term("content", "rust")
//!     .and([TermQuery::term("content", "tokio").or([TermQuery::term("content", "async")])]);
//! assert_eq!(query.to_string(), "(content.rust&(content.tokio|content.async))");
//! ```
//!
//! Combination never flattens: `a.and([b]).and([c])` is `((a&b)&c)`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::Keyword;

/// A boolean expression tree over keywords.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TermQuery {
    /// Matches documents carrying the keyword.
    Term(Keyword),
    /// Matches documents matched by every child.
    And(Vec<TermQuery>),
    /// Matches documents matched by at least one child.
    Or(Vec<TermQuery>),
}

impl TermQuery {
    /// Build a leaf query.
    pub fn term<F: Into<String>, W: Into<String>>(field: F, word: W) -> Self {
        TermQuery::Term(Keyword::new(field, word))
    }

    /// A leaf with empty field and word, or a combinator without children.
    pub fn is_empty(&self) -> bool {
        match self {
            TermQuery::Term(keyword) => keyword.is_empty(),
            TermQuery::And(children) | TermQuery::Or(children) => children.is_empty(),
        }
    }

    /// Combine this query with `others` under AND.
    ///
    /// Empty queries are dropped. With no arguments the receiver is returned
    /// unchanged.
    pub fn and<I: IntoIterator<Item = TermQuery>>(self, others: I) -> Self {
        match self.combine(others) {
            Ok(children) => TermQuery::And(children),
            Err(unchanged) => unchanged,
        }
    }

    /// Combine this query with `others` under OR.
    ///
    /// Empty queries are dropped. With no arguments the receiver is returned
    /// unchanged.
    pub fn or<I: IntoIterator<Item = TermQuery>>(self, others: I) -> Self {
        match self.combine(others) {
            Ok(children) => TermQuery::Or(children),
            Err(unchanged) => unchanged,
        }
    }

    fn combine<I: IntoIterator<Item = TermQuery>>(
        self,
        others: I,
    ) -> std::result::Result<Vec<TermQuery>, TermQuery> {
        let mut others = others.into_iter().peekable();
        if others.peek().is_none() {
            return Err(self);
        }

        let mut children = Vec::new();
        if !self.is_empty() {
            children.push(self);
        }
        children.extend(others.filter(|q| !q.is_empty()));
        Ok(children)
    }

    /// All keywords referenced by the tree, in depth-first order.
    pub fn keywords(&self) -> Vec<&Keyword> {
        let mut out = Vec::new();
        self.collect_keywords(&mut out);
        out
    }

    fn collect_keywords<'a>(&'a self, out: &mut Vec<&'a Keyword>) {
        match self {
            TermQuery::Term(keyword) => out.push(keyword),
            TermQuery::And(children) | TermQuery::Or(children) => {
                for child in children {
                    child.collect_keywords(out);
                }
            }
        }
    }
}

impl Default for TermQuery {
    fn default() -> Self {
        TermQuery::Term(Keyword::default())
    }
}

fn write_children(f: &mut fmt::Formatter<'_>, children: &[TermQuery], sep: &str) -> fmt::Result {
    if let [only] = children {
        return write!(f, "{only}");
    }

    let parts: Vec<String> = children
        .iter()
        .map(|c| c.to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if parts.is_empty() {
        return Ok(());
    }
    write!(f, "({})", parts.join(sep))
}

/// Debug rendering: `&` for AND, `|` for OR, multi-child nodes parenthesized.
impl fmt::Display for TermQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TermQuery::Term(keyword) if keyword.is_empty() => Ok(()),
            TermQuery::Term(keyword) => write!(f, "{keyword}"),
            TermQuery::And(children) => write_children(f, children, "&"),
            TermQuery::Or(children) => write_children(f, children, "|"),
        }
    }
}
