// Copyright (c) 2025 Semrel Contributors
// Licensed under the Semrel License. See LICENSE file for details.

//! Bounded top-k selection over `(id, score)` observations.
//!
//! A [`Leaderboard`] keeps the `k` highest-scored entries seen so far in a
//! binary heap whose top is the current worst entry, so each observation
//! costs O(log k). Results are returned as a [`SimilarityResults`] list.
//!
//! # Example
//!
//! ```rust
//! use semrel::Leaderboard;
//!
//! let mut board = Leaderboard::new(2);
//! board.tally_score(1, 0.2);
//! board.tally_score(2, 0.9);
//! board.tally_score(3, 0.5);
//!
//! let mut top = board.into_top();
//! top.sort_descending();
//! assert_eq!(top.ids(), vec![2, 3]);
//! ```

use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A scored identifier.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredId {
    /// Row or entity identifier
    pub id: u32,
    /// Similarity score
    pub score: f64,
}

/// Heap entry ordered so that the *worst* entry is the heap maximum.
///
/// Lower scores are worse; among equal scores the later observation is
/// worse, so earlier observations survive ties.
#[derive(Debug, Clone, Copy)]
struct HeapEntry {
    score: f64,
    seq: u64,
    id: u32,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse score ordering: smaller score = higher priority (pop first)
        other
            .score
            .partial_cmp(&self.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Bounded top-k accumulator.
///
/// Never holds more than `capacity` entries. Each id should be tallied at
/// most once per query; this is not enforced.
#[derive(Debug, Clone)]
pub struct Leaderboard {
    capacity: usize,
    heap: BinaryHeap<HeapEntry>,
    next_seq: u64,
}

impl Leaderboard {
    /// Create a leaderboard retaining at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            // Avoid huge up-front allocations for generous k
            heap: BinaryHeap::with_capacity(capacity.min(1024)),
            next_seq: 0,
        }
    }

    /// Observe a score.
    ///
    /// Inserted if fewer than `capacity` entries are held; otherwise replaces
    /// the current minimum only if `score` is strictly greater. NaN scores
    /// are ignored.
    pub fn tally_score(&mut self, id: u32, score: f64) {
        if self.capacity == 0 || score.is_nan() {
            return;
        }

        let entry = HeapEntry {
            score,
            seq: self.next_seq,
            id,
        };
        self.next_seq += 1;

        if self.heap.len() < self.capacity {
            self.heap.push(entry);
        } else if let Some(mut worst) = self.heap.peek_mut() {
            if score > worst.score {
                *worst = entry;
            }
        }
    }

    /// Lowest score currently retained, if any.
    pub fn min_score(&self) -> Option<f64> {
        self.heap.peek().map(|e| e.score)
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns `true` if nothing is held.
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Maximum number of entries retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// All held entries in observation order (unsorted by score).
    pub fn into_top(self) -> SimilarityResults {
        let mut entries = self.heap.into_vec();
        entries.sort_unstable_by_key(|e| e.seq);
        SimilarityResults {
            results: entries
                .into_iter()
                .map(|e| ScoredId {
                    id: e.id,
                    score: e.score,
                })
                .collect(),
        }
    }
}

/// An ordered list of scored ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimilarityResults {
    results: Vec<ScoredId>,
}

impl SimilarityResults {
    /// An empty result list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort by descending score. Stable: equal scores keep their current
    /// relative order.
    pub fn sort_descending(&mut self) {
        self.results
            .sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    }

    /// Number of results.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Returns `true` if there are no results.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Result at position `i`.
    pub fn get(&self, i: usize) -> Option<&ScoredId> {
        self.results.get(i)
    }

    /// Iterate over results in list order.
    pub fn iter(&self) -> std::slice::Iter<'_, ScoredId> {
        self.results.iter()
    }

    /// Ids in list order.
    pub fn ids(&self) -> Vec<u32> {
        self.results.iter().map(|r| r.id).collect()
    }

    /// Scores in list order.
    pub fn scores(&self) -> Vec<f64> {
        self.results.iter().map(|r| r.score).collect()
    }

    /// Consume into the underlying vector.
    pub fn into_vec(self) -> Vec<ScoredId> {
        self.results
    }
}

impl IntoIterator for SimilarityResults {
    type Item = ScoredId;
    type IntoIter = std::vec::IntoIter<ScoredId>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.into_iter()
    }
}

impl<'a> IntoIterator for &'a SimilarityResults {
    type Item = &'a ScoredId;
    type IntoIter = std::slice::Iter<'a, ScoredId>;

    fn into_iter(self) -> Self::IntoIter {
        self.results.iter()
    }
}
