// Copyright (c) 2025 Semrel Contributors
// Licensed under the Semrel License. See LICENSE file for details.

//! # Semrel
//!
//! Semantic relatedness primitives over sparse feature vectors.
//!
//! Entities (concepts, pages) are rows of a sparse matrix whose columns are
//! weighted features. Semrel stores such matrices on disk, ranks rows by
//! cosine similarity, estimates how often phrases are used as hyperlinks,
//! and calibrates raw scores into comparable values.
//!
//! ## Components
//!
//! | Component | Purpose |
//! |-----------|---------|
//! | [`matrix::SparseMatrix`] | Memory-mapped row store, forward or transposed |
//! | [`matrix::MatrixPair`] | A matrix and its transpose, built as one transaction |
//! | [`similarity::CosineSimilarity`] | Pairwise cosine and top-k search (direct scan or inverted index) |
//! | [`Leaderboard`] | Bounded top-k selection |
//! | [`phrases::LinkProbabilityEstimator`] | Per-language anchor link probabilities |
//! | [`normalize::PercentileNormalizer`] | Empirical-CDF score normalization |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use semrel::matrix::{MatrixPair, SparseMatrixRow};
//! use semrel::similarity::{CosineSimilarity, SimilarityConfig};
//! use semrel::{Result, SparseVector};
//!
//! fn main() -> Result<()> {
//!     MatrixPair::build(
//!         "data/pair",
//!         vec![
//!             SparseMatrixRow::new(1, vec![(10, 1.0), (11, 0.5)]),
//!             SparseMatrixRow::new(2, vec![(11, 2.0)]),
//!         ],
//!     )?;
//!
//!     let sim: CosineSimilarity =
//!         CosineSimilarity::open("data/pair", "data/cache", SimilarityConfig::default())?;
//!     let query: SparseVector = [(11, 1.0)].into_iter().collect();
//!     for hit in sim.most_similar(&query, 5, None)? {
//!         println!("{} -> {:.3}", hit.id, hit.score);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Logging
//!
//! Semrel logs through the [`log`](https://docs.rs/log) facade and never
//! installs a logger. Cache rebuilds and build progress are reported at
//! `info`, recoverable on-disk problems at `warn`, and strategy choices at
//! `debug`.

pub mod error;
pub mod leaderboard;
pub mod matrix;
pub mod normalize;
pub mod phrases;
pub mod similarity;
pub mod sparse_vector;

mod storage;

// Re-export commonly used types
pub use error::{Result, SemrelError};
pub use leaderboard::{Leaderboard, ScoredId, SimilarityResults};
pub use sparse_vector::SparseVector;

// Re-export matrix storage
pub use matrix::{MatrixPair, MatrixStore, SparseMatrix, SparseMatrixRow, SparseMatrixWriter};

// Re-export similarity
pub use similarity::{CosineSimilarity, SearchStrategy, SimilarityCache, SimilarityConfig};

// Re-export phrase statistics
pub use phrases::{
    BuildStats, KvStore, Language, LinkProbabilityConfig, LinkProbabilityEstimator,
};

// Re-export normalization
pub use normalize::{NormalizerConfig, PercentileNormalizer};
