//! Sparse matrix rows sorted by column id.

use crate::sparse_vector::SparseVector;

/// A sparse row bound to a row identifier.
///
/// Column entries are kept sorted by column id so two rows can be
/// merge-joined in a single linear pass. The Euclidean norm is computed once
/// at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct SparseMatrixRow {
    row_id: u32,
    col_ids: Vec<u32>,
    values: Vec<f32>,
    norm: f64,
}

impl SparseMatrixRow {
    /// Build a row from unordered `(column, value)` entries.
    ///
    /// Zero values are dropped. If a column appears more than once the last
    /// value wins.
    ///
    /// # Example
    ///
    /// ```rust
    /// use semrel::matrix::SparseMatrixRow;
    ///
    /// let row = SparseMatrixRow::new(7, vec![(30, 4.0), (10, 3.0), (20, 0.0)]);
    /// assert_eq!(row.col_ids(), &[10, 30]);
    /// assert_eq!(row.norm(), 5.0);
    /// ```
    pub fn new(row_id: u32, mut entries: Vec<(u32, f32)>) -> Self {
        // Stable sort keeps insertion order among duplicates so the last one wins below
        entries.sort_by_key(|(col, _)| *col);

        let mut deduped: Vec<(u32, f32)> = Vec::with_capacity(entries.len());
        for (col, value) in entries {
            match deduped.last_mut() {
                Some(last) if last.0 == col => last.1 = value,
                _ => deduped.push((col, value)),
            }
        }
        deduped.retain(|(_, value)| *value != 0.0);

        let (col_ids, values) = deduped.into_iter().unzip();
        Self::from_sorted_parts(row_id, col_ids, values)
    }

    /// Build a row from a sparse vector.
    pub fn from_vector(row_id: u32, vector: &SparseVector) -> Self {
        let (col_ids, values) = vector.sorted_entries().into_iter().unzip();
        Self::from_sorted_parts(row_id, col_ids, values)
    }

    /// Build a row from parallel arrays already sorted by column id with no
    /// duplicates or zeros.
    pub(crate) fn from_sorted_parts(row_id: u32, col_ids: Vec<u32>, values: Vec<f32>) -> Self {
        debug_assert_eq!(col_ids.len(), values.len());
        debug_assert!(col_ids.windows(2).all(|w| w[0] < w[1]));
        let norm = values
            .iter()
            .map(|v| *v as f64 * *v as f64)
            .sum::<f64>()
            .sqrt();
        Self {
            row_id,
            col_ids,
            values,
            norm,
        }
    }

    /// The row identifier.
    #[inline]
    pub fn row_id(&self) -> u32 {
        self.row_id
    }

    /// Number of stored columns.
    #[inline]
    pub fn num_cols(&self) -> usize {
        self.col_ids.len()
    }

    /// Returns `true` if the row has no entries.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.col_ids.is_empty()
    }

    /// Column id at position `i`.
    #[inline]
    pub fn col_id(&self, i: usize) -> u32 {
        self.col_ids[i]
    }

    /// Value at position `i`.
    #[inline]
    pub fn col_value(&self, i: usize) -> f32 {
        self.values[i]
    }

    /// Sorted column ids.
    pub fn col_ids(&self) -> &[u32] {
        &self.col_ids
    }

    /// Values, parallel to [`col_ids`](Self::col_ids).
    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Precomputed Euclidean norm.
    #[inline]
    pub fn norm(&self) -> f64 {
        self.norm
    }

    /// Value of a column, if present.
    pub fn get(&self, col_id: u32) -> Option<f32> {
        self.col_ids
            .binary_search(&col_id)
            .ok()
            .map(|i| self.values[i])
    }

    /// Iterate over `(column, value)` pairs in column order.
    pub fn iter(&self) -> impl Iterator<Item = (u32, f32)> + '_ {
        self.col_ids.iter().copied().zip(self.values.iter().copied())
    }

    /// Copy the row into a sparse vector.
    pub fn to_vector(&self) -> SparseVector {
        self.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_sorts_and_drops_zeros() {
        let row = SparseMatrixRow::new(1, vec![(5, 1.0), (2, 0.0), (3, 2.0)]);
        assert_eq!(row.col_ids(), &[3, 5]);
        assert_eq!(row.values(), &[2.0, 1.0]);
    }

    #[test]
    fn test_duplicate_column_last_wins() {
        let row = SparseMatrixRow::new(1, vec![(4, 1.0), (4, 9.0)]);
        assert_eq!(row.num_cols(), 1);
        assert_eq!(row.get(4), Some(9.0));
    }

    #[test]
    fn test_duplicate_column_zeroed() {
        let row = SparseMatrixRow::new(1, vec![(4, 1.0), (4, 0.0), (6, 2.0)]);
        assert_eq!(row.col_ids(), &[6]);
    }

    #[test]
    fn test_norm_and_lookup() {
        let row = SparseMatrixRow::new(9, vec![(1, 3.0), (2, 4.0)]);
        assert_eq!(row.norm(), 5.0);
        assert_eq!(row.get(2), Some(4.0));
        assert_eq!(row.get(3), None);
    }

    #[test]
    fn test_vector_roundtrip() {
        let vector: SparseVector = [(8, 1.0), (2, -2.0)].into_iter().collect();
        let row = SparseMatrixRow::from_vector(3, &vector);
        assert_eq!(row.col_ids(), &[2, 8]);
        assert_eq!(row.to_vector(), vector);
    }

    #[test]
    fn test_empty_row() {
        let row = SparseMatrixRow::new(0, Vec::new());
        assert!(row.is_empty());
        assert_eq!(row.norm(), 0.0);
    }
}
