//! Sparse matrix storage
//!
//! - [`SparseMatrixRow`] - a row with columns sorted by id and a cached norm
//! - [`MatrixStore`] / [`SparseMatrix`] - read-only, memory-mapped row lookup
//! - [`SparseMatrixWriter`] / [`MatrixPair`] - writing a matrix and its
//!   transpose as one transaction
//!
//! The transpose of a feature matrix acts as an inverted index: its row for
//! feature `f` lists every forward row containing `f`.

pub mod row;
pub mod store;
pub mod writer;

pub use row::SparseMatrixRow;
pub use store::{MatrixStore, SparseMatrix, MATRIX_MAGIC, MATRIX_VERSION};
pub use writer::{transpose_rows, MatrixPair, SparseMatrixWriter, FORWARD_FILE, TRANSPOSE_FILE};
