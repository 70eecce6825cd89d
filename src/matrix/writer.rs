// Copyright (c) 2025 Semrel Contributors
// Licensed under the Semrel License. See LICENSE file for details.

//! Writing matrix files and building forward/transpose pairs.
//!
//! The forward matrix and its transpose are always produced together by
//! [`MatrixPair::build`], which writes both files into a staging directory
//! and swaps the directory into place in one step.

use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{Result, SemrelError};
use crate::matrix::row::SparseMatrixRow;
use crate::matrix::store::{
    MatrixStore, SparseMatrix, INDEX_ENTRY_SIZE, MATRIX_HEADER_SIZE, MATRIX_MAGIC, MATRIX_VERSION,
};
use crate::storage::{fresh_staging_dir, remove_dir_if_exists, replace_dir, replace_file};

/// File name of the forward (row-major) matrix inside a pair directory.
pub const FORWARD_FILE: &str = "matrix.spm";

/// File name of the transposed matrix inside a pair directory.
pub const TRANSPOSE_FILE: &str = "matrix.transpose.spm";

/// Buffers rows and writes a matrix file on [`finish`](Self::finish).
///
/// Rows may be written in any order; the file is laid out sorted by row id.
/// The file is first written to a temporary sibling and renamed into place.
///
/// # Example
///
/// ```rust,no_run
/// use semrel::matrix::{SparseMatrixRow, SparseMatrixWriter};
///
/// let mut writer = SparseMatrixWriter::new("matrix.spm");
/// writer.write_row(SparseMatrixRow::new(1, vec![(10, 0.5), (20, 1.5)])).unwrap();
/// writer.finish().unwrap();
/// ```
#[derive(Debug)]
pub struct SparseMatrixWriter {
    path: PathBuf,
    rows: BTreeMap<u32, SparseMatrixRow>,
}

impl SparseMatrixWriter {
    /// Create a writer targeting `path`. Nothing is written until `finish`.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            rows: BTreeMap::new(),
        }
    }

    /// Add a row.
    ///
    /// # Errors
    ///
    /// Returns `SemrelError::Configuration` if a row with the same id was
    /// already written.
    pub fn write_row(&mut self, row: SparseMatrixRow) -> Result<()> {
        let row_id = row.row_id();
        if self.rows.insert(row_id, row).is_some() {
            return Err(SemrelError::Configuration(format!(
                "duplicate row id {} written to {}",
                row_id,
                self.path.display()
            )));
        }
        Ok(())
    }

    /// Number of rows buffered so far.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Returns `true` if no rows have been written.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Write the matrix file and sync it to disk.
    pub fn finish(self) -> Result<()> {
        let temp_path = self.path.with_extension("spm.tmp");

        let result = Self::write_file(&temp_path, &self.rows);
        if let Err(e) = result {
            let _ = std::fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Err(e) = replace_file(&temp_path, &self.path) {
            let _ = std::fs::remove_file(&temp_path);
            return Err(SemrelError::Io(e));
        }
        Ok(())
    }

    fn write_file(path: &Path, rows: &BTreeMap<u32, SparseMatrixRow>) -> Result<()> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(MATRIX_MAGIC)?;
        writer.write_all(&MATRIX_VERSION.to_le_bytes())?;
        writer.write_all(&(rows.len() as u32).to_le_bytes())?;

        // Row index: payloads start right after it
        let mut offset = (MATRIX_HEADER_SIZE + rows.len() * INDEX_ENTRY_SIZE) as u64;
        for (row_id, row) in rows {
            writer.write_all(&row_id.to_le_bytes())?;
            writer.write_all(&offset.to_le_bytes())?;
            writer.write_all(&(row.num_cols() as u32).to_le_bytes())?;
            offset += row.num_cols() as u64 * 8;
        }

        for row in rows.values() {
            for col in row.col_ids() {
                writer.write_all(&col.to_le_bytes())?;
            }
            for value in row.values() {
                writer.write_all(&value.to_le_bytes())?;
            }
        }

        writer.flush()?;
        let file: File = writer.into_inner().map_err(|e| SemrelError::Io(e.into_error()))?;
        file.sync_all()?;
        Ok(())
    }
}

/// Transpose rows: column ids become row ids and vice versa.
///
/// Every output row is sorted by its new column id (the original row id).
pub fn transpose_rows<I>(rows: I) -> Result<Vec<SparseMatrixRow>>
where
    I: IntoIterator<Item = Result<SparseMatrixRow>>,
{
    let mut columns: BTreeMap<u32, Vec<(u32, f32)>> = BTreeMap::new();
    for row in rows {
        let row = row?;
        for (col, value) in row.iter() {
            columns.entry(col).or_default().push((row.row_id(), value));
        }
    }

    Ok(columns
        .into_iter()
        .map(|(col, entries)| SparseMatrixRow::new(col, entries))
        .collect())
}

/// A forward matrix and its transpose, opened from one pair directory.
#[derive(Debug)]
pub struct MatrixPair {
    /// Row-major store: row id → features.
    pub forward: SparseMatrix,
    /// Inverted store: feature id → rows containing it.
    pub transpose: SparseMatrix,
}

impl MatrixPair {
    /// Write `rows` and their transpose into `dir` as one transaction.
    ///
    /// Both files are written to a staging directory; the staging directory
    /// then replaces `dir`. On failure `dir` is left untouched and the staging
    /// directory is removed.
    pub fn build<P, I>(dir: P, rows: I) -> Result<MatrixPair>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = SparseMatrixRow>,
    {
        let dir = dir.as_ref();
        let staging = fresh_staging_dir(dir)?;

        let result = Self::write_pair(&staging, rows);
        if let Err(e) = result {
            let _ = remove_dir_if_exists(&staging);
            return Err(e);
        }

        if let Err(e) = replace_dir(&staging, dir) {
            let _ = remove_dir_if_exists(&staging);
            return Err(SemrelError::Io(e));
        }

        log::info!("built matrix pair in {}", dir.display());
        Self::open(dir)
    }

    fn write_pair<I>(staging: &Path, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = SparseMatrixRow>,
    {
        let mut forward_writer = SparseMatrixWriter::new(staging.join(FORWARD_FILE));
        for row in rows {
            forward_writer.write_row(row)?;
        }
        let transposed = transpose_rows(forward_writer.rows.values().cloned().map(Ok))?;
        forward_writer.finish()?;

        let mut transpose_writer = SparseMatrixWriter::new(staging.join(TRANSPOSE_FILE));
        for row in transposed {
            transpose_writer.write_row(row)?;
        }
        transpose_writer.finish()
    }

    /// Open an existing pair directory.
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<MatrixPair> {
        let dir = dir.as_ref();
        let forward = SparseMatrix::open(dir.join(FORWARD_FILE))?;
        let transpose = SparseMatrix::open(dir.join(TRANSPOSE_FILE))?;
        Ok(MatrixPair { forward, transpose })
    }

    /// Number of forward rows.
    pub fn row_count(&self) -> usize {
        self.forward.row_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_duplicate_row_rejected() {
        let mut writer = SparseMatrixWriter::new("unused.spm");
        writer.write_row(SparseMatrixRow::new(1, vec![(1, 1.0)])).unwrap();
        assert!(matches!(
            writer.write_row(SparseMatrixRow::new(1, vec![(2, 1.0)])),
            Err(SemrelError::Configuration(_))
        ));
    }

    #[test]
    fn test_transpose_rows() {
        let rows = vec![
            SparseMatrixRow::new(1, vec![(10, 1.0), (20, 2.0)]),
            SparseMatrixRow::new(2, vec![(10, 3.0)]),
        ];
        let transposed = transpose_rows(rows.into_iter().map(Ok)).unwrap();

        assert_eq!(transposed.len(), 2);
        assert_eq!(transposed[0].row_id(), 10);
        assert_eq!(transposed[0].col_ids(), &[1, 2]);
        assert_eq!(transposed[0].values(), &[1.0, 3.0]);
        assert_eq!(transposed[1].row_id(), 20);
        assert_eq!(transposed[1].col_ids(), &[1]);
    }

    #[test]
    fn test_pair_build_and_reopen() {
        let dir = tempdir().unwrap();
        let pair_dir = dir.path().join("pair");
        let pair = MatrixPair::build(
            &pair_dir,
            vec![
                SparseMatrixRow::new(1, vec![(10, 1.0), (20, 2.0)]),
                SparseMatrixRow::new(2, vec![(20, 4.0)]),
            ],
        )
        .unwrap();

        assert_eq!(pair.forward.row_ids(), &[1, 2]);
        assert_eq!(pair.transpose.row_ids(), &[10, 20]);
        let posting = pair.transpose.get(20).unwrap().unwrap();
        assert_eq!(posting.col_ids(), &[1, 2]);
        drop(pair);

        let reopened = MatrixPair::open(&pair_dir).unwrap();
        assert_eq!(reopened.row_count(), 2);
    }

    #[test]
    fn test_pair_rebuild_replaces_directory() {
        let dir = tempdir().unwrap();
        let pair_dir = dir.path().join("pair");
        MatrixPair::build(&pair_dir, vec![SparseMatrixRow::new(1, vec![(10, 1.0)])]).unwrap();
        std::fs::write(pair_dir.join("stray.bin"), b"x").unwrap();

        let pair =
            MatrixPair::build(&pair_dir, vec![SparseMatrixRow::new(7, vec![(11, 1.0)])]).unwrap();
        assert_eq!(pair.forward.row_ids(), &[7]);
        assert!(!pair_dir.join("stray.bin").exists());
    }

    #[test]
    fn test_failed_build_leaves_previous_pair() {
        let dir = tempdir().unwrap();
        let pair_dir = dir.path().join("pair");
        MatrixPair::build(&pair_dir, vec![SparseMatrixRow::new(1, vec![(10, 1.0)])]).unwrap();

        // Duplicate row ids abort the build
        let result = MatrixPair::build(
            &pair_dir,
            vec![
                SparseMatrixRow::new(3, vec![(10, 1.0)]),
                SparseMatrixRow::new(3, vec![(11, 1.0)]),
            ],
        );
        assert!(result.is_err());

        let pair = MatrixPair::open(&pair_dir).unwrap();
        assert_eq!(pair.forward.row_ids(), &[1]);
    }
}
