// Copyright (c) 2025 Semrel Contributors
// Licensed under the Semrel License. See LICENSE file for details.

//! Cosine similarity and top-k search over a forward/transpose matrix pair.
//!
//! Two search strategies produce the same rankings:
//!
//! - **Direct scan**: fetch each candidate's forward row and score it
//!   against the query. Cost grows with the number of candidates.
//! - **Inverted index**: walk the transpose row (posting list) of every
//!   query feature and accumulate partial dot products per row. Cost grows
//!   with the query's non-zero features times their posting list lengths.
//!
//! [`SearchStrategy::Auto`] picks direct scan when an explicit candidate set
//! smaller than [`SimilarityConfig::direct_scan_threshold`] is given.
//!
//! # Example
//!
//! ```rust,no_run
//! use semrel::similarity::{CosineSimilarity, SimilarityConfig};
//! use semrel::SparseVector;
//!
//! let sim: CosineSimilarity = CosineSimilarity::open("data/pair", "data/cache", SimilarityConfig::default()).unwrap();
//! let query: SparseVector = [(10, 1.0), (42, 0.5)].into_iter().collect();
//! for hit in sim.most_similar(&query, 10, None).unwrap() {
//!     println!("{} {:.4}", hit.id, hit.score);
//! }
//! ```

use std::collections::HashSet;
use std::path::Path;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SemrelError};
use crate::leaderboard::{Leaderboard, SimilarityResults};
use crate::matrix::{MatrixPair, MatrixStore, SparseMatrix, SparseMatrixRow};
use crate::similarity::cache::SimilarityCache;
use crate::sparse_vector::SparseVector;

/// Configuration for [`CosineSimilarity`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// Candidate sets smaller than this are scored by direct scan.
    ///
    /// Default: 10,000
    pub direct_scan_threshold: usize,

    /// File name of the persisted [`SimilarityCache`] inside the cache
    /// directory.
    pub cache_file_name: String,
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            direct_scan_threshold: 10_000,
            cache_file_name: "cosine-similarity.cache".to_string(),
        }
    }
}

/// Algorithm used by [`CosineSimilarity::most_similar_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SearchStrategy {
    /// Direct scan for small candidate sets, inverted index otherwise.
    #[default]
    Auto,
    /// Score every candidate row against the query.
    DirectScan,
    /// Accumulate scores through the transpose's posting lists.
    InvertedIndex,
}

struct Attached<M> {
    forward: M,
    transpose: M,
    cache: SimilarityCache,
}

/// Cosine similarity engine.
///
/// Pure vector and row comparisons work on a fresh instance. Store-backed
/// operations ([`similarity_by_id`](Self::similarity_by_id),
/// [`most_similar`](Self::most_similar)) fail with
/// `SemrelError::NotBuilt` until [`attach_stores`](Self::attach_stores)
/// succeeds.
///
/// All query methods take `&self`; an attached instance can be shared across
/// threads.
pub struct CosineSimilarity<M: MatrixStore = SparseMatrix> {
    config: SimilarityConfig,
    attached: Option<Attached<M>>,
}

impl<M: MatrixStore> CosineSimilarity<M> {
    /// Create an engine with no stores attached.
    pub fn new(config: SimilarityConfig) -> Self {
        Self {
            config,
            attached: None,
        }
    }

    /// Attach a forward store and its transpose.
    ///
    /// Loads the persisted cache from `cache_dir` if it matches both stores,
    /// otherwise recomputes and persists it. Replaces any previously
    /// attached stores.
    ///
    /// # Errors
    ///
    /// Returns `SemrelError::Configuration` if the stores are not transposes
    /// of each other, and `SemrelError::Io` if the cache cannot be written.
    pub fn attach_stores<P: AsRef<Path>>(&mut self, forward: M, transpose: M, cache_dir: P) -> Result<()> {
        let cache_path = cache_dir.as_ref().join(&self.config.cache_file_name);
        let cache = SimilarityCache::load_or_build(&cache_path, &forward, &transpose)?;
        self.attached = Some(Attached {
            forward,
            transpose,
            cache,
        });
        Ok(())
    }

    /// Returns `true` once stores are attached.
    pub fn is_attached(&self) -> bool {
        self.attached.is_some()
    }

    /// The engine configuration.
    pub fn config(&self) -> &SimilarityConfig {
        &self.config
    }

    /// The attached forward store.
    pub fn forward(&self) -> Result<&M> {
        Ok(&self.attached()?.forward)
    }

    /// The attached transpose store.
    pub fn transpose(&self) -> Result<&M> {
        Ok(&self.attached()?.transpose)
    }

    /// The derived cache for the attached stores.
    pub fn cache(&self) -> Result<&SimilarityCache> {
        Ok(&self.attached()?.cache)
    }

    fn attached(&self) -> Result<&Attached<M>> {
        self.attached
            .as_ref()
            .ok_or_else(|| SemrelError::NotBuilt("no matrix stores attached".to_string()))
    }

    /// Lowest possible similarity.
    pub fn min_value(&self) -> f64 {
        -1.0
    }

    /// Highest possible similarity.
    pub fn max_value(&self) -> f64 {
        1.0
    }

    /// Cosine similarity of two sparse vectors.
    pub fn similarity(&self, a: &SparseVector, b: &SparseVector) -> f64 {
        cosine_vectors(a, b)
    }

    /// Cosine similarity of two rows.
    pub fn pairwise_similarity(&self, a: &SparseMatrixRow, b: &SparseMatrixRow) -> f64 {
        cosine_rows(a, b)
    }

    /// Cosine similarity of two forward rows looked up by id.
    ///
    /// A row missing from the forward store yields 0.0.
    pub fn similarity_by_id(&self, a: u32, b: u32) -> Result<f64> {
        let forward = &self.attached()?.forward;
        let (row_a, row_b) = match (forward.get(a)?, forward.get(b)?) {
            (Some(row_a), Some(row_b)) => (row_a, row_b),
            _ => return Ok(0.0),
        };
        Ok(cosine_rows(&row_a, &row_b))
    }

    /// Top `k` forward rows by cosine similarity to `query`, sorted by
    /// descending score.
    ///
    /// If `candidates` is given, only those row ids are considered. Rows
    /// sharing no feature with the query are never returned.
    pub fn most_similar(
        &self,
        query: &SparseVector,
        k: usize,
        candidates: Option<&HashSet<u32>>,
    ) -> Result<SimilarityResults> {
        self.most_similar_with(SearchStrategy::Auto, query, k, candidates)
    }

    /// Like [`most_similar`](Self::most_similar) with an explicit strategy.
    pub fn most_similar_with(
        &self,
        strategy: SearchStrategy,
        query: &SparseVector,
        k: usize,
        candidates: Option<&HashSet<u32>>,
    ) -> Result<SimilarityResults> {
        let attached = self.attached()?;

        let query_norm = query.norm();
        if k == 0 || query.is_empty() || query_norm == 0.0 {
            return Ok(SimilarityResults::new());
        }

        let strategy = match strategy {
            SearchStrategy::Auto => match candidates {
                Some(ids) if ids.len() < self.config.direct_scan_threshold => {
                    SearchStrategy::DirectScan
                }
                _ => SearchStrategy::InvertedIndex,
            },
            explicit => explicit,
        };
        log::debug!(
            "most_similar: k={} query_nnz={} candidates={:?} strategy={:?}",
            k,
            query.nnz(),
            candidates.map(|c| c.len()),
            strategy
        );

        let mut board = Leaderboard::new(k);
        match strategy {
            SearchStrategy::DirectScan => {
                direct_scan(attached, query, query_norm, candidates, &mut board)?
            }
            _ => inverted_index(attached, query, query_norm, candidates, &mut board)?,
        }

        let mut top = board.into_top();
        top.sort_descending();
        Ok(top)
    }
}

impl CosineSimilarity<SparseMatrix> {
    /// Open the matrix pair in `pair_dir` and attach it, caching derived
    /// state under `cache_dir`.
    pub fn open<P, Q>(pair_dir: P, cache_dir: Q, config: SimilarityConfig) -> Result<Self>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let pair = MatrixPair::open(pair_dir)?;
        let mut sim = Self::new(config);
        sim.attach_stores(pair.forward, pair.transpose, cache_dir)?;
        Ok(sim)
    }
}

impl<M: MatrixStore> Default for CosineSimilarity<M> {
    fn default() -> Self {
        Self::new(SimilarityConfig::default())
    }
}

fn direct_scan<M: MatrixStore>(
    attached: &Attached<M>,
    query: &SparseVector,
    query_norm: f64,
    candidates: Option<&HashSet<u32>>,
    board: &mut Leaderboard,
) -> Result<()> {
    let ids: Vec<u32> = match candidates {
        Some(ids) => {
            let mut ids: Vec<u32> = ids.iter().copied().collect();
            ids.sort_unstable();
            ids
        }
        None => attached.forward.row_ids().to_vec(),
    };

    for id in ids {
        let norm = match attached.cache.norm(id) {
            Some(norm) if norm > 0.0 => norm,
            _ => continue,
        };
        let row = match attached.forward.get(id)? {
            Some(row) => row,
            None => continue,
        };

        let mut dot = 0.0f64;
        let mut matched = false;
        for (col, value) in row.iter() {
            let weight = query.get(col);
            if weight != 0.0 {
                dot += weight as f64 * value as f64;
                matched = true;
            }
        }
        if matched {
            board.tally_score(id, clamp_cosine(dot / (norm * query_norm)));
        }
    }
    Ok(())
}

fn inverted_index<M: MatrixStore>(
    attached: &Attached<M>,
    query: &SparseVector,
    query_norm: f64,
    candidates: Option<&HashSet<u32>>,
    board: &mut Leaderboard,
) -> Result<()> {
    let mut dots: FxHashMap<u32, f64> = FxHashMap::default();

    // Ascending feature order keeps each row's sum in the same order a
    // direct scan of that row would use.
    for (feature, weight) in query.sorted_entries() {
        if !attached.cache.in_transpose(feature) {
            continue;
        }
        let postings = match attached.transpose.get(feature)? {
            Some(row) => row,
            None => continue,
        };
        for (id, value) in postings.iter() {
            if let Some(ids) = candidates {
                if !ids.contains(&id) {
                    continue;
                }
            }
            *dots.entry(id).or_insert(0.0) += weight as f64 * value as f64;
        }
    }

    let mut scored: Vec<(u32, f64)> = dots.into_iter().collect();
    scored.sort_unstable_by_key(|(id, _)| *id);
    for (id, dot) in scored {
        match attached.cache.norm(id) {
            Some(norm) if norm > 0.0 => {
                board.tally_score(id, clamp_cosine(dot / (norm * query_norm)));
            }
            _ => {}
        }
    }
    Ok(())
}

#[inline]
fn clamp_cosine(score: f64) -> f64 {
    score.clamp(-1.0, 1.0)
}

/// Cosine similarity of two rows by a single merge join over their sorted
/// columns.
///
/// Returns 0.0 if either row is empty or has zero norm.
pub fn cosine_rows(a: &SparseMatrixRow, b: &SparseMatrixRow) -> f64 {
    merge_cosine(a.col_ids(), a.values(), b.col_ids(), b.values())
}

/// Cosine similarity of two sparse vectors.
///
/// Uses the same merge join as [`cosine_rows`] over the sorted entries, so
/// the result does not depend on argument order or on map layout.
///
/// Returns 0.0 if either vector is empty or has zero norm.
pub fn cosine_vectors(a: &SparseVector, b: &SparseVector) -> f64 {
    let (a_cols, a_vals): (Vec<u32>, Vec<f32>) = a.sorted_entries().into_iter().unzip();
    let (b_cols, b_vals): (Vec<u32>, Vec<f32>) = b.sorted_entries().into_iter().unzip();
    merge_cosine(&a_cols, &a_vals, &b_cols, &b_vals)
}

fn merge_cosine(a_cols: &[u32], a_vals: &[f32], b_cols: &[u32], b_vals: &[f32]) -> f64 {
    let mut aa = 0.0f64;
    let mut bb = 0.0f64;
    let mut ab = 0.0f64;
    let (mut i, mut j) = (0usize, 0usize);

    while i < a_cols.len() && j < b_cols.len() {
        let (va, vb) = (a_vals[i] as f64, b_vals[j] as f64);
        match a_cols[i].cmp(&b_cols[j]) {
            std::cmp::Ordering::Less => {
                aa += va * va;
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                bb += vb * vb;
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                aa += va * va;
                bb += vb * vb;
                ab += va * vb;
                i += 1;
                j += 1;
            }
        }
    }
    for &v in &a_vals[i..] {
        aa += v as f64 * v as f64;
    }
    for &v in &b_vals[j..] {
        bb += v as f64 * v as f64;
    }

    finish_cosine(aa, bb, ab)
}

fn finish_cosine(aa: f64, bb: f64, ab: f64) -> f64 {
    if aa == 0.0 || bb == 0.0 || ab == 0.0 {
        return 0.0;
    }
    clamp_cosine(ab / (aa * bb).sqrt())
}
