// Copyright (c) 2025 Semrel Contributors
// Licensed under the Semrel License. See LICENSE file for details.

//! Derived per-store state for cosine similarity.
//!
//! A [`SimilarityCache`] holds the Euclidean norm of every forward row, the
//! ids present in the transpose, and the widest forward row. It records the
//! version tokens of both stores at build time; a persisted cache whose
//! tokens or row counts disagree with the current stores is rebuilt.
//!
//! # File Format
//!
//! ```text
//! [magic: 4 bytes "SIMC"]
//! [version: u16]
//! [bincode-encoded SimilarityCache]
//! ```
//!
//! The format version is independent of the matrix file version, so a cache
//! written by an older layout is discarded rather than misread.

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SemrelError};
use crate::matrix::MatrixStore;
use crate::storage::replace_file;

/// Magic bytes at the start of a similarity cache file.
pub const CACHE_MAGIC: &[u8; 4] = b"SIMC";

/// Current similarity cache format version.
pub const CACHE_VERSION: u16 = 1;

/// Norms, transpose ids, and row width derived from a forward/transpose
/// pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityCache {
    forward_token: u64,
    transpose_token: u64,
    forward_rows: usize,
    transpose_rows: usize,
    norms: HashMap<u32, f64>,
    transpose_ids: HashSet<u32>,
    max_row_width: usize,
}

impl SimilarityCache {
    /// Compute the cache by scanning both stores.
    ///
    /// # Errors
    ///
    /// Returns `SemrelError::Configuration` if the two stores do not hold the
    /// same number of non-zero entries, which means they are not transposes
    /// of each other.
    pub fn build<M: MatrixStore + ?Sized>(forward: &M, transpose: &M) -> Result<Self> {
        let forward_token = forward.last_modified()?;
        let transpose_token = transpose.last_modified()?;

        let mut norms = HashMap::with_capacity(forward.row_count());
        let mut max_row_width = 0usize;
        let mut forward_nnz = 0usize;
        for row in forward.rows() {
            let row = row?;
            norms.insert(row.row_id(), row.norm());
            max_row_width = max_row_width.max(row.num_cols());
            forward_nnz += row.num_cols();
        }

        let mut transpose_nnz = 0usize;
        for row in transpose.rows() {
            transpose_nnz += row?.num_cols();
        }
        if forward_nnz != transpose_nnz {
            return Err(SemrelError::Configuration(format!(
                "{} has {} entries but its transpose {} has {}",
                forward.path().display(),
                forward_nnz,
                transpose.path().display(),
                transpose_nnz
            )));
        }

        let transpose_ids: HashSet<u32> = transpose.row_ids().iter().copied().collect();

        Ok(Self {
            forward_token,
            transpose_token,
            forward_rows: forward.row_count(),
            transpose_rows: transpose.row_count(),
            norms,
            transpose_ids,
            max_row_width,
        })
    }

    /// Returns `true` if the cache was built from the current versions of
    /// both stores.
    pub fn is_current<M: MatrixStore + ?Sized>(&self, forward: &M, transpose: &M) -> Result<bool> {
        Ok(self.forward_token == forward.last_modified()?
            && self.transpose_token == transpose.last_modified()?
            && self.forward_rows == forward.row_count()
            && self.transpose_rows == transpose.row_count())
    }

    /// Norm of a forward row, if the row exists.
    #[inline]
    pub fn norm(&self, row_id: u32) -> Option<f64> {
        self.norms.get(&row_id).copied()
    }

    /// Returns `true` if the transpose has a row (posting list) for `feature_id`.
    #[inline]
    pub fn in_transpose(&self, feature_id: u32) -> bool {
        self.transpose_ids.contains(&feature_id)
    }

    /// Ids covered by the transpose.
    pub fn transpose_ids(&self) -> &HashSet<u32> {
        &self.transpose_ids
    }

    /// Number of columns in the widest forward row.
    pub fn max_row_width(&self) -> usize {
        self.max_row_width
    }

    /// Number of forward rows with a cached norm.
    pub fn len(&self) -> usize {
        self.norms.len()
    }

    /// Returns `true` if no norms are cached.
    pub fn is_empty(&self) -> bool {
        self.norms.is_empty()
    }

    /// Persist the cache.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let temp_path = path.with_extension("tmp");

        let write = || -> Result<()> {
            let file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&temp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(CACHE_MAGIC)?;
            writer.write_all(&CACHE_VERSION.to_le_bytes())?;
            bincode::serialize_into(&mut writer, self)?;
            writer.flush()?;
            writer
                .into_inner()
                .map_err(|e| SemrelError::Io(e.into_error()))?
                .sync_all()?;
            Ok(())
        };

        if let Err(e) = write() {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }
        replace_file(&temp_path, path)?;
        Ok(())
    }

    /// Load a persisted cache.
    ///
    /// # Errors
    ///
    /// Returns `SemrelError::CorruptedFile` on a bad magic number or version,
    /// and `SemrelError::Serialization` if the body cannot be decoded.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut reader = BufReader::new(file);

        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != CACHE_MAGIC {
            return Err(SemrelError::CorruptedFile(format!(
                "{}: invalid magic bytes - not a similarity cache",
                path.display()
            )));
        }

        let mut version_bytes = [0u8; 2];
        reader.read_exact(&mut version_bytes)?;
        let version = u16::from_le_bytes(version_bytes);
        if version != CACHE_VERSION {
            return Err(SemrelError::CorruptedFile(format!(
                "{}: unsupported cache version {} (expected {})",
                path.display(),
                version,
                CACHE_VERSION
            )));
        }

        Ok(bincode::deserialize_from(&mut reader)?)
    }

    /// Load the cache at `path` if it is current for both stores, otherwise
    /// rebuild and persist it.
    pub fn load_or_build<M, P>(path: P, forward: &M, transpose: &M) -> Result<Self>
    where
        M: MatrixStore + ?Sized,
        P: AsRef<Path>,
    {
        let path = path.as_ref();
        if path.exists() {
            match Self::load(path) {
                Ok(cache) if cache.is_current(forward, transpose)? => {
                    log::info!("reading matrix information from cache {}", path.display());
                    return Ok(cache);
                }
                Ok(_) => {
                    log::info!("similarity cache {} is stale", path.display());
                }
                Err(e) => {
                    log::warn!("discarding unreadable similarity cache {}: {}", path.display(), e);
                }
            }
        }

        log::info!(
            "building cached matrix information for {} rows",
            forward.row_count()
        );
        let cache = Self::build(forward, transpose)?;
        cache.save(path)?;
        Ok(cache)
    }
}
