//! Concurrent phrase occurrence counts.

use dashmap::DashMap;

/// Per-hash occurrence counter shared by corpus scan workers.
///
/// Only hashes registered up front are counted; increments to any other
/// hash are dropped. The map is sharded, so concurrent increments to the
/// same key never lose updates and different keys rarely contend.
#[derive(Debug, Default)]
pub struct PhraseCounter {
    counts: DashMap<u64, u64>,
}

impl PhraseCounter {
    /// An empty counter tracking nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `hash` at zero. Already tracked hashes keep their count.
    pub fn track(&self, hash: u64) {
        self.counts.entry(hash).or_insert(0);
    }

    /// Add one to `hash` if it is tracked. Returns `true` if counted.
    pub fn increment_if_tracked(&self, hash: u64) -> bool {
        match self.counts.get_mut(&hash) {
            Some(mut count) => {
                *count += 1;
                true
            }
            None => false,
        }
    }

    /// Current count of `hash`; 0 if untracked.
    pub fn count(&self, hash: u64) -> u64 {
        self.counts.get(&hash).map(|c| *c).unwrap_or(0)
    }

    /// Returns `true` if `hash` is tracked.
    pub fn is_tracked(&self, hash: u64) -> bool {
        self.counts.contains_key(&hash)
    }

    /// Number of tracked hashes.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    /// Returns `true` if nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
