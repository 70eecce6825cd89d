//! Error types for semrel operations.
//!
//! This module provides:
//! - [`SemrelError`] - The main error enum
//! - [`Result<T>`] - A type alias for `std::result::Result<T, SemrelError>`
//!
//! Expected steady-state conditions (empty vectors, absent rows, unknown
//! phrases) are not errors: they resolve to well-defined fallback values
//! such as a similarity of `0.0`.

/// Result type alias for semrel operations.
///
/// This is equivalent to `std::result::Result<T, SemrelError>`.
pub type Result<T> = std::result::Result<T, SemrelError>;

/// Error types for matrix stores, similarity, link probabilities and
/// normalization.
///
/// # Examples
///
/// ```rust
/// use semrel::normalize::PercentileNormalizer;
/// use semrel::SemrelError;
///
/// let normalizer = PercentileNormalizer::default();
///
/// // Queries before the sample is finalized fail fast
/// match normalizer.normalize(0.5) {
///     Err(SemrelError::NotBuilt(_)) => {}
///     other => panic!("unexpected: {:?}", other),
/// }
/// ```
#[derive(Debug, thiserror::Error)]
pub enum SemrelError {
    /// I/O error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// An operation was invoked before its required build or attach step.
    #[error("Not built: {0}")]
    NotBuilt(String),

    /// Corrupted key-value log entry detected at the given file offset.
    #[error("Corrupted entry at offset {0}")]
    CorruptedEntry(u64),

    /// A persisted file has a bad magic number, version, or layout.
    #[error("Corrupted file: {0}")]
    CorruptedFile(String),

    /// Inconsistent parameters detected at attach or build time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Empty key is not allowed.
    #[error("Empty key is not allowed")]
    EmptyKey,

    /// A write was attempted on a store opened read-only.
    #[error("Store is read-only: {0}")]
    ReadOnly(String),

    /// Key exceeds maximum length (65535 bytes).
    #[error("Key too long: {0} bytes (max 65535)")]
    KeyTooLong(usize),

    /// The normalizer was finalized without any observations.
    #[error("Sample is empty")]
    EmptySample,

    /// The worker pool for a parallel build could not be created.
    #[error("Thread pool error: {0}")]
    ThreadPool(String),
}
