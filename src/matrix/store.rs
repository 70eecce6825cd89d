// Copyright (c) 2025 Semrel Contributors
// Licensed under the Semrel License. See LICENSE file for details.

//! Read-only, memory-mapped sparse matrix stores.
//!
//! A [`SparseMatrix`] file holds a row index sorted by row id followed by the
//! row payloads. Opening a store maps the file and decodes only the index;
//! rows are decoded on lookup.
//!
//! # File Format
//!
//! ```text
//! [magic: 4 bytes "SPMX"]
//! [version: u16]
//! [num_rows: u32]
//! for each row (sorted by row_id):
//!   [row_id: u32][offset: u64][num_cols: u32]
//! for each row:
//!   [col_id: u32] * num_cols   (ascending)
//!   [value: f32] * num_cols
//! ```
//!
//! All integers and floats are little-endian.

use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::path::{Path, PathBuf};

use crate::error::{Result, SemrelError};
use crate::matrix::row::SparseMatrixRow;
use crate::storage::modified_token;

/// Magic bytes at the start of every matrix file.
pub const MATRIX_MAGIC: &[u8; 4] = b"SPMX";

/// Current matrix file format version.
pub const MATRIX_VERSION: u16 = 1;

/// Size of the fixed file header (magic + version + row count).
pub(crate) const MATRIX_HEADER_SIZE: usize = 4 + 2 + 4;

/// Size of one row index entry (row id + offset + column count).
pub(crate) const INDEX_ENTRY_SIZE: usize = 4 + 8 + 4;

/// Row lookup and iteration over an immutable sparse matrix.
///
/// Implementations must be safe for unsynchronized concurrent reads.
pub trait MatrixStore: Send + Sync {
    /// Fetch a row. Rows that are not present return `Ok(None)`, never an
    /// empty row.
    fn get(&self, row_id: u32) -> Result<Option<SparseMatrixRow>>;

    /// All row ids in ascending order.
    fn row_ids(&self) -> &[u32];

    /// Number of rows.
    fn row_count(&self) -> usize {
        self.row_ids().len()
    }

    /// Iterate over all rows in ascending row id order. Each call restarts
    /// from the first row.
    fn rows(&self) -> Box<dyn Iterator<Item = Result<SparseMatrixRow>> + '_> {
        Box::new(self.row_ids().iter().filter_map(move |id| self.get(*id).transpose()))
    }

    /// Version token of the backing data (nanoseconds since the Unix epoch
    /// of the last modification). Derived caches compare against it.
    fn last_modified(&self) -> Result<u64>;

    /// Path of the backing file.
    fn path(&self) -> &Path;
}

#[derive(Debug, Clone, Copy)]
struct RowEntry {
    offset: u64,
    num_cols: u32,
}

/// Memory-mapped sparse matrix.
///
/// # Examples
///
/// ```rust,no_run
/// use semrel::matrix::{MatrixStore, SparseMatrix};
///
/// let matrix = SparseMatrix::open("features/matrix.spm").unwrap();
/// if let Some(row) = matrix.get(42).unwrap() {
///     println!("row 42 has {} columns, norm {:.3}", row.num_cols(), row.norm());
/// }
/// ```
pub struct SparseMatrix {
    path: PathBuf,
    mmap: Mmap,
    row_ids: Vec<u32>,
    entries: Vec<RowEntry>,
}

impl SparseMatrix {
    /// Open a matrix file read-only.
    ///
    /// # Errors
    ///
    /// Returns `SemrelError::Io` if the file cannot be opened or mapped, and
    /// `SemrelError::CorruptedFile` if the header or row index is invalid.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        // Safety: the mapping is read-only and matrix files are immutable once
        // written; rebuilds replace the whole directory instead of the file.
        let mmap = unsafe { MmapOptions::new().map(&file)? };

        let (row_ids, entries) = Self::read_index(&mmap, &path)?;

        Ok(Self {
            path,
            mmap,
            row_ids,
            entries,
        })
    }

    fn read_index(data: &[u8], path: &Path) -> Result<(Vec<u32>, Vec<RowEntry>)> {
        let corrupted = |msg: String| SemrelError::CorruptedFile(format!("{}: {}", path.display(), msg));

        if data.len() < MATRIX_HEADER_SIZE {
            return Err(corrupted("file shorter than header".to_string()));
        }
        if &data[0..4] != MATRIX_MAGIC {
            return Err(corrupted("invalid magic bytes - not a matrix file".to_string()));
        }
        let version = read_u16(data, 4);
        if version != MATRIX_VERSION {
            return Err(corrupted(format!(
                "unsupported version: {} (expected {})",
                version, MATRIX_VERSION
            )));
        }

        let num_rows = read_u32(data, 6) as usize;
        let index_end = num_rows
            .checked_mul(INDEX_ENTRY_SIZE)
            .and_then(|len| len.checked_add(MATRIX_HEADER_SIZE))
            .filter(|&end| end <= data.len())
            .ok_or_else(|| corrupted(format!("truncated row index ({} rows)", num_rows)))?;

        let mut row_ids = Vec::with_capacity(num_rows);
        let mut entries = Vec::with_capacity(num_rows);
        for i in 0..num_rows {
            let base = MATRIX_HEADER_SIZE + i * INDEX_ENTRY_SIZE;
            let row_id = read_u32(data, base);
            let offset = read_u64(data, base + 4);
            let num_cols = read_u32(data, base + 12);

            if let Some(prev) = row_ids.last() {
                if row_id <= *prev {
                    return Err(corrupted(format!("row ids not ascending at row {}", row_id)));
                }
            }
            // Column ids then values, 4 bytes each
            let in_bounds = usize::try_from(offset)
                .ok()
                .filter(|&start| start >= index_end)
                .and_then(|start| (num_cols as usize).checked_mul(8)?.checked_add(start))
                .is_some_and(|end| end <= data.len());
            if !in_bounds {
                return Err(corrupted(format!("row {} payload out of bounds", row_id)));
            }

            row_ids.push(row_id);
            entries.push(RowEntry { offset, num_cols });
        }

        Ok((row_ids, entries))
    }

    fn decode_row(&self, row_id: u32, entry: RowEntry) -> Result<SparseMatrixRow> {
        let n = entry.num_cols as usize;
        let cols_start = entry.offset as usize;
        let values_start = cols_start + n * 4;

        let col_ids: Vec<u32> = (0..n).map(|i| read_u32(&self.mmap, cols_start + i * 4)).collect();
        let values: Vec<f32> = (0..n)
            .map(|i| read_f32(&self.mmap, values_start + i * 4))
            .collect();

        if !col_ids.windows(2).all(|w| w[0] < w[1]) {
            return Err(SemrelError::CorruptedFile(format!(
                "{}: row {} columns not strictly ascending",
                self.path.display(),
                row_id
            )));
        }
        Ok(SparseMatrixRow::from_sorted_parts(row_id, col_ids, values))
    }

    /// Returns `true` if the matrix has a row with this id.
    pub fn contains(&self, row_id: u32) -> bool {
        self.row_ids.binary_search(&row_id).is_ok()
    }

    /// Total size of the mapped file in bytes.
    pub fn size_bytes(&self) -> usize {
        self.mmap.len()
    }
}

impl MatrixStore for SparseMatrix {
    fn get(&self, row_id: u32) -> Result<Option<SparseMatrixRow>> {
        match self.row_ids.binary_search(&row_id) {
            Ok(i) => self.decode_row(row_id, self.entries[i]).map(Some),
            Err(_) => Ok(None),
        }
    }

    fn row_ids(&self) -> &[u32] {
        &self.row_ids
    }

    fn rows(&self) -> Box<dyn Iterator<Item = Result<SparseMatrixRow>> + '_> {
        Box::new(
            self.row_ids
                .iter()
                .zip(self.entries.iter())
                .map(move |(id, entry)| self.decode_row(*id, *entry)),
        )
    }

    fn last_modified(&self) -> Result<u64> {
        Ok(modified_token(&self.path)?)
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for SparseMatrix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SparseMatrix")
            .field("path", &self.path)
            .field("rows", &self.row_ids.len())
            .field("bytes", &self.mmap.len())
            .finish()
    }
}

// Offsets passed to these readers are bounds-checked when the index is read.

#[inline]
fn read_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

#[inline]
fn read_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

#[inline]
fn read_u64(data: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(buf)
}

#[inline]
fn read_f32(data: &[u8], at: usize) -> f32 {
    f32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::writer::SparseMatrixWriter;
    use tempfile::tempdir;

    fn write_matrix(path: &Path, rows: Vec<SparseMatrixRow>) {
        let mut writer = SparseMatrixWriter::new(path);
        for row in rows {
            writer.write_row(row).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn test_open_and_get() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.spm");
        write_matrix(
            &path,
            vec![
                SparseMatrixRow::new(5, vec![(1, 1.0), (3, 2.0)]),
                SparseMatrixRow::new(2, vec![(7, 0.5)]),
            ],
        );

        let matrix = SparseMatrix::open(&path).unwrap();
        assert_eq!(matrix.row_count(), 2);
        assert_eq!(matrix.row_ids(), &[2, 5]);

        let row = matrix.get(5).unwrap().unwrap();
        assert_eq!(row.col_ids(), &[1, 3]);
        assert_eq!(row.values(), &[1.0, 2.0]);
        assert!(matrix.get(4).unwrap().is_none());
    }

    #[test]
    fn test_rows_iterate_in_order_and_restart() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("m.spm");
        write_matrix(
            &path,
            vec![
                SparseMatrixRow::new(9, vec![(1, 1.0)]),
                SparseMatrixRow::new(3, vec![(2, 1.0)]),
                SparseMatrixRow::new(6, vec![(3, 1.0)]),
            ],
        );

        let matrix = SparseMatrix::open(&path).unwrap();
        let first: Vec<u32> = matrix.rows().map(|r| r.unwrap().row_id()).collect();
        let second: Vec<u32> = matrix.rows().map(|r| r.unwrap().row_id()).collect();
        assert_eq!(first, vec![3, 6, 9]);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_matrix() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.spm");
        write_matrix(&path, Vec::new());

        let matrix = SparseMatrix::open(&path).unwrap();
        assert_eq!(matrix.row_count(), 0);
        assert!(matrix.get(0).unwrap().is_none());
    }

    #[test]
    fn test_invalid_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.spm");
        std::fs::write(&path, b"NOPE\x01\x00\x00\x00\x00\x00").unwrap();

        match SparseMatrix::open(&path) {
            Err(SemrelError::CorruptedFile(_)) => {}
            other => panic!("expected CorruptedFile, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_index_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("short.spm");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MATRIX_MAGIC);
        bytes.extend_from_slice(&MATRIX_VERSION.to_le_bytes());
        bytes.extend_from_slice(&3u32.to_le_bytes());
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            SparseMatrix::open(&path),
            Err(SemrelError::CorruptedFile(_))
        ));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            SparseMatrix::open(dir.path().join("missing.spm")),
            Err(SemrelError::Io(_))
        ));
    }

    fn header(num_rows: u32) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MATRIX_MAGIC);
        bytes.extend_from_slice(&MATRIX_VERSION.to_le_bytes());
        bytes.extend_from_slice(&num_rows.to_le_bytes());
        bytes
    }

    fn index_entry(bytes: &mut Vec<u8>, row_id: u32, offset: u64, num_cols: u32) {
        bytes.extend_from_slice(&row_id.to_le_bytes());
        bytes.extend_from_slice(&offset.to_le_bytes());
        bytes.extend_from_slice(&num_cols.to_le_bytes());
    }

    #[test]
    fn test_huge_index_values_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("huge.spm");

        std::fs::write(&path, header(u32::MAX)).unwrap();
        assert!(matches!(
            SparseMatrix::open(&path),
            Err(SemrelError::CorruptedFile(_))
        ));

        let mut bytes = header(1);
        index_entry(&mut bytes, 1, u64::MAX, u32::MAX);
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            SparseMatrix::open(&path),
            Err(SemrelError::CorruptedFile(_))
        ));

        let mut bytes = header(1);
        index_entry(&mut bytes, 1, (usize::MAX - 4) as u64, 2);
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(
            SparseMatrix::open(&path),
            Err(SemrelError::CorruptedFile(_))
        ));
    }

    #[test]
    fn test_unsorted_columns_rejected_on_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("unsorted.spm");

        let mut bytes = header(1);
        let payload = (MATRIX_HEADER_SIZE + INDEX_ENTRY_SIZE) as u64;
        index_entry(&mut bytes, 1, payload, 2);
        for col in [5u32, 3] {
            bytes.extend_from_slice(&col.to_le_bytes());
        }
        for value in [1.0f32, 2.0] {
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        std::fs::write(&path, &bytes).unwrap();

        let matrix = SparseMatrix::open(&path).unwrap();
        assert!(matches!(matrix.get(1), Err(SemrelError::CorruptedFile(_))));
        assert!(matches!(
            matrix.rows().next(),
            Some(Err(SemrelError::CorruptedFile(_)))
        ));
    }
}
