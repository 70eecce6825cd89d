//! Sparse feature vectors
//!
//! A sparse vector maps integer feature identifiers to floating-point
//! weights. There is no fixed dimensionality and zero weights are never
//! stored. Query vectors for [`crate::similarity::CosineSimilarity`] use this
//! type.
//!
//! # Example
//!
//! ```rust
//! use semrel::SparseVector;
//!
//! let mut vec = SparseVector::new();
//! vec.add(100, 1.5);  // feature 100 with weight 1.5
//! vec.add(200, 0.8);  // feature 200 with weight 0.8
//!
//! assert_eq!(vec.nnz(), 2);
//! assert_eq!(vec.get(100), 1.5);
//! ```

use std::collections::HashMap;

/// Sparse vector of feature weights.
///
/// Only non-zero weights are stored. Negative weights are kept, so cosine
/// similarities between vectors range over [-1, 1].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SparseVector {
    /// Feature id → weight (zero weights never stored)
    weights: HashMap<u32, f32>,
}

impl SparseVector {
    /// Create an empty sparse vector.
    pub fn new() -> Self {
        Self {
            weights: HashMap::new(),
        }
    }

    /// Create a sparse vector from a weights map.
    ///
    /// Zero weights are filtered out.
    ///
    /// # Example
    ///
    /// ```rust
    /// use semrel::SparseVector;
    /// use std::collections::HashMap;
    ///
    /// let mut weights = HashMap::new();
    /// weights.insert(100, 1.5);
    /// weights.insert(200, 0.0);  // Will be filtered
    /// weights.insert(300, -0.5);
    ///
    /// let vec = SparseVector::from_weights(weights);
    /// assert_eq!(vec.nnz(), 2);
    /// ```
    pub fn from_weights(weights: HashMap<u32, f32>) -> Self {
        let filtered: HashMap<u32, f32> = weights.into_iter().filter(|(_, w)| *w != 0.0).collect();
        Self { weights: filtered }
    }

    /// Set the weight of a feature.
    ///
    /// A zero weight removes the feature. If the feature already exists,
    /// the weight is replaced.
    pub fn add(&mut self, feature_id: u32, weight: f32) {
        if weight != 0.0 {
            self.weights.insert(feature_id, weight);
        } else {
            self.weights.remove(&feature_id);
        }
    }

    /// Compute the dot product with another sparse vector.
    ///
    /// Complexity: O(min(nnz₁, nnz₂))
    ///
    /// # Example
    ///
    /// ```rust
    /// use semrel::SparseVector;
    ///
    /// let a: SparseVector = [(100, 1.0), (200, 2.0)].into_iter().collect();
    /// let b: SparseVector = [(100, 3.0), (300, 4.0)].into_iter().collect();
    ///
    /// // Only feature 100 overlaps
    /// assert_eq!(a.dot(&b), 3.0);
    /// ```
    pub fn dot(&self, other: &SparseVector) -> f64 {
        // Probe the larger map from the smaller one, summing in ascending
        // feature order so a.dot(b) == b.dot(a) exactly
        let (smaller, larger) = if self.weights.len() <= other.weights.len() {
            (self, &other.weights)
        } else {
            (other, &self.weights)
        };

        smaller
            .sorted_entries()
            .into_iter()
            .filter_map(|(id, w1)| larger.get(&id).map(|w2| w1 as f64 * *w2 as f64))
            .sum()
    }

    /// Compute the Euclidean norm: sqrt(sum(w²))
    ///
    /// # Example
    ///
    /// ```rust
    /// use semrel::SparseVector;
    ///
    /// let vec: SparseVector = [(100, 3.0), (200, 4.0)].into_iter().collect();
    /// assert_eq!(vec.norm(), 5.0);
    /// ```
    pub fn norm(&self) -> f64 {
        self.weights
            .values()
            .map(|w| *w as f64 * *w as f64)
            .sum::<f64>()
            .sqrt()
    }

    /// Number of non-zero features.
    pub fn nnz(&self) -> usize {
        self.weights.len()
    }

    /// Get the weight of a feature (0.0 if not present).
    pub fn get(&self, feature_id: u32) -> f32 {
        self.weights.get(&feature_id).copied().unwrap_or(0.0)
    }

    /// Returns `true` if the feature has a non-zero weight.
    pub fn contains(&self, feature_id: u32) -> bool {
        self.weights.contains_key(&feature_id)
    }

    /// Iterate over non-zero features in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.weights.iter().map(|(id, w)| (*id, *w))
    }

    /// Non-zero features sorted by feature id.
    pub fn sorted_entries(&self) -> Vec<(u32, f32)> {
        let mut entries: Vec<(u32, f32)> = self.iter().collect();
        entries.sort_unstable_by_key(|(id, _)| *id);
        entries
    }

    /// Get the underlying weights map.
    pub fn weights(&self) -> &HashMap<u32, f32> {
        &self.weights
    }

    /// Check if the vector is empty.
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }
}

impl FromIterator<(u32, f32)> for SparseVector {
    fn from_iter<I: IntoIterator<Item = (u32, f32)>>(iter: I) -> Self {
        let mut vec = SparseVector::new();
        for (id, weight) in iter {
            vec.add(id, weight);
        }
        vec
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_empty() {
        let vec = SparseVector::new();
        assert_eq!(vec.nnz(), 0);
        assert!(vec.is_empty());
    }

    #[test]
    fn test_add_zero_weight_ignored() {
        let mut vec = SparseVector::new();
        vec.add(100, 0.0);
        assert_eq!(vec.nnz(), 0);
    }

    #[test]
    fn test_add_zero_removes_existing() {
        let mut vec = SparseVector::new();
        vec.add(100, 2.0);
        vec.add(100, 0.0);
        assert!(vec.is_empty());
        assert_eq!(vec.get(100), 0.0);
    }

    #[test]
    fn test_negative_weight_kept() {
        let mut vec = SparseVector::new();
        vec.add(7, -1.5);
        assert_eq!(vec.nnz(), 1);
        assert_eq!(vec.get(7), -1.5);
    }

    #[test]
    fn test_dot_product_no_overlap() {
        let a: SparseVector = [(100, 1.0)].into_iter().collect();
        let b: SparseVector = [(200, 2.0)].into_iter().collect();
        assert_eq!(a.dot(&b), 0.0);
    }

    #[test]
    fn test_dot_product_commutative() {
        let a: SparseVector = [(100, 1.5), (200, 2.5)].into_iter().collect();
        let b: SparseVector = [(100, 3.0), (200, 1.0), (300, 5.0)].into_iter().collect();
        assert_eq!(a.dot(&b), b.dot(&a));
        assert_eq!(a.dot(&b), 7.0);
    }

    #[test]
    fn test_sorted_entries() {
        let vec: SparseVector = [(30, 3.0), (10, 1.0), (20, 2.0)].into_iter().collect();
        assert_eq!(vec.sorted_entries(), vec![(10, 1.0), (20, 2.0), (30, 3.0)]);
    }
}
