//! Phrase statistics
//!
//! - [`LinkProbabilityEstimator`] - per-language anchor link probabilities
//!   built by a parallel corpus scan
//! - [`KvStore`] - the append-only store holding the results
//! - [`source`] - the corpus, anchor, tokenizer, and normalizer interfaces
//!   the estimator consumes

pub mod counter;
pub mod hash;
pub mod kv;
pub mod link_probability;
pub mod source;

pub use counter::PhraseCounter;
pub use hash::{phrase_hash, PrefixHash};
pub use kv::{KvConfig, KvStore};
pub use link_probability::{
    BuildStats, LinkProbabilityConfig, LinkProbabilityEstimator, SUBGRAM_SENTINEL,
};
pub use source::{
    AnchorPhraseSource, CorpusSource, Document, DocumentText, Language, PhraseNormalizer,
    PhraseTokenizer,
};
