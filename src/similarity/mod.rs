//! Vector similarity over sparse matrix stores
//!
//! - [`CosineSimilarity`] - pairwise cosine scores and top-k search with two
//!   interchangeable strategies
//! - [`SimilarityCache`] - per-store norms and id sets, persisted and
//!   invalidated by store version tokens

pub mod cache;
pub mod cosine;

pub use cache::{SimilarityCache, CACHE_MAGIC, CACHE_VERSION};
pub use cosine::{
    cosine_rows, cosine_vectors, CosineSimilarity, SearchStrategy, SimilarityConfig,
};
