//! Incremental phrase hashing.
//!
//! A phrase hash covers the language code and each word in turn, so the hash
//! of `"new york"` is obtained by extending the hash of `"new"` with one more
//! word. Corpus scanning relies on this to grow n-grams word by word.

use std::hash::Hasher;

use rustc_hash::FxHasher;

use crate::phrases::source::Language;

/// Separator mixed in after every component so `["ab", "c"]` and
/// `["a", "bc"]` hash differently.
const SEPARATOR: u8 = 0xff;

/// Running hash of a phrase prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixHash(u64);

impl PrefixHash {
    /// Hash of the empty phrase in `language`.
    pub fn start(language: &Language) -> Self {
        Self(fold(0, language.code()))
    }

    /// Hash of this prefix followed by `word`.
    #[inline]
    pub fn extend(self, word: &str) -> Self {
        Self(fold(self.0, word))
    }

    /// The hash value.
    #[inline]
    pub fn value(self) -> u64 {
        self.0
    }
}

fn fold(state: u64, component: &str) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_u64(state);
    hasher.write(component.as_bytes());
    hasher.write_u8(SEPARATOR);
    hasher.finish()
}

/// Hash of a whole phrase given as words.
pub fn phrase_hash<S: AsRef<str>>(language: &Language, words: &[S]) -> u64 {
    words
        .iter()
        .fold(PrefixHash::start(language), |h, w| h.extend(w.as_ref()))
        .value()
}
