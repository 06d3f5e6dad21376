//! Posting lists and their set algebra.
//!
//! A [`PostingList`] is the per-keyword ordered map from document sequence
//! number to the document's id and feature bits. Query evaluation works on
//! filtered snapshots: a `Vec<Posting>` sorted ascending by `seq_id` with no
//! duplicate sequence numbers.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use serde::{Deserialize, Serialize};

/// One entry of a filtered posting snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    /// Document sequence number.
    pub seq_id: u64,
    /// External document id.
    pub doc_id: String,
    /// Feature bits of the document.
    pub bits: u64,
}

impl Posting {
    pub fn new<S: Into<String>>(seq_id: u64, doc_id: S, bits: u64) -> Self {
        Posting {
            seq_id,
            doc_id: doc_id.into(),
            bits,
        }
    }
}

/// Value stored per sequence number inside a [`PostingList`].
#[derive(Debug, Clone, PartialEq, Eq)]
struct PostingValue {
    doc_id: String,
    bits: u64,
}

/// The posting list of one keyword, ordered ascending by sequence number.
#[derive(Debug, Clone, Default)]
pub struct PostingList {
    entries: BTreeMap<u64, PostingValue>,
}

impl PostingList {
    /// Create a new empty posting list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for `seq_id`.
    pub fn upsert(&mut self, seq_id: u64, doc_id: &str, bits: u64) {
        self.entries.insert(
            seq_id,
            PostingValue {
                doc_id: doc_id.to_string(),
                bits,
            },
        );
    }

    /// Remove the entry for `seq_id`, returning whether it existed.
    pub fn remove(&mut self, seq_id: u64) -> bool {
        self.entries.remove(&seq_id).is_some()
    }

    /// Get the length of the posting list.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the posting list is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sequence numbers in ascending order.
    pub fn seq_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.entries.keys().copied()
    }

    /// Snapshot the entries whose bits pass `filter`, ascending by sequence number.
    pub fn filtered(&self, filter: &BitsFilter) -> Vec<Posting> {
        self.entries
            .iter()
            .filter(|(_, v)| filter.matches(v.bits))
            .map(|(&seq_id, v)| Posting::new(seq_id, v.doc_id.clone(), v.bits))
            .collect()
    }
}

/// Bitmask filter applied to every posting before boolean combination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitsFilter {
    /// Bits that must all be set.
    pub on_flag: u64,
    /// Bits that must all be clear.
    pub off_flag: u64,
    /// Groups of bits; every non-zero group must share at least one set bit.
    pub or_flags: Vec<u64>,
}

impl BitsFilter {
    pub fn new(on_flag: u64, off_flag: u64, or_flags: Vec<u64>) -> Self {
        BitsFilter {
            on_flag,
            off_flag,
            or_flags,
        }
    }

    /// A filter that accepts everything.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn matches(&self, bits: u64) -> bool {
        filter_by_bits(bits, self.on_flag, self.off_flag, &self.or_flags)
    }
}

/// `true` iff every `on_flag` bit is set, no `off_flag` bit is set, and each
/// non-zero element of `or_flags` has at least one bit set in `bits`.
pub fn filter_by_bits(bits: u64, on_flag: u64, off_flag: u64, or_flags: &[u64]) -> bool {
    if bits & on_flag != on_flag {
        return false;
    }
    if bits & off_flag != 0 {
        return false;
    }
    or_flags.iter().all(|&flag| flag == 0 || bits & flag != 0)
}

/// Intersect sorted posting snapshots.
///
/// Zero lists give an empty result and a single list is returned as-is.
/// Otherwise one cursor walks each list: when every cursor sits on the current
/// maximum sequence number it is emitted and all cursors advance, else only
/// the cursors behind the maximum advance. The walk stops as soon as any list
/// is exhausted.
pub fn intersect(mut lists: Vec<Vec<Posting>>) -> Vec<Posting> {
    match lists.len() {
        0 => return Vec::new(),
        1 => return lists.pop().unwrap_or_default(),
        _ => {}
    }
    if lists.iter().any(|l| l.is_empty()) {
        return Vec::new();
    }

    let shortest = lists.iter().map(Vec::len).min().unwrap_or(0);
    let mut result = Vec::with_capacity(shortest);
    let mut cursors = vec![0usize; lists.len()];

    loop {
        let max = lists
            .iter()
            .zip(&cursors)
            .map(|(list, &c)| list[c].seq_id)
            .max()
            .unwrap_or(0);

        let all_at_max = lists
            .iter()
            .zip(&cursors)
            .all(|(list, &c)| list[c].seq_id == max);

        if all_at_max {
            result.push(lists[0][cursors[0]].clone());
            for cursor in cursors.iter_mut() {
                *cursor += 1;
            }
        } else {
            for (list, cursor) in lists.iter().zip(cursors.iter_mut()) {
                if list[*cursor].seq_id != max {
                    *cursor += 1;
                }
            }
        }

        if lists.iter().zip(&cursors).any(|(list, &c)| c >= list.len()) {
            return result;
        }
    }
}

/// Union of sorted posting snapshots.
///
/// A k-way merge: the output is ascending by sequence number and contains each
/// sequence number once, taking the entry from the earliest list that holds it.
pub fn union(mut lists: Vec<Vec<Posting>>) -> Vec<Posting> {
    lists.retain(|l| !l.is_empty());
    match lists.len() {
        0 => return Vec::new(),
        1 => return lists.pop().unwrap_or_default(),
        _ => {}
    }

    let total = lists.iter().map(Vec::len).sum();
    let mut result: Vec<Posting> = Vec::with_capacity(total);
    let mut cursors = vec![0usize; lists.len()];
    let mut heap: BinaryHeap<Reverse<(u64, usize)>> = lists
        .iter()
        .enumerate()
        .map(|(i, list)| Reverse((list[0].seq_id, i)))
        .collect();

    while let Some(Reverse((seq_id, i))) = heap.pop() {
        if result.last().map(|p| p.seq_id) != Some(seq_id) {
            result.push(lists[i][cursors[i]].clone());
        }
        cursors[i] += 1;
        if let Some(next) = lists[i].get(cursors[i]) {
            heap.push(Reverse((next.seq_id, i)));
        }
    }
    result
}
