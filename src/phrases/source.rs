// Copyright (c) 2025 Semrel Contributors
// Licensed under the Semrel License. See LICENSE file for details.

//! Interfaces to the text and anchor-phrase sources consumed by
//! [`LinkProbabilityEstimator::build`](crate::phrases::LinkProbabilityEstimator::build).
//!
//! The crate ships no tokenizer or language analysis. Callers supply
//! [`PhraseTokenizer`] and [`PhraseNormalizer`] implementations together
//! with their corpus and anchor statistics.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A language code such as `"en"` or `"simple"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Language(String);

impl Language {
    /// Create a language from its code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// The language code.
    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Language {
    fn from(code: &str) -> Self {
        Self::new(code)
    }
}

/// Document text, either raw or already split into sentences of words.
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentText {
    /// Plain text; normalized and tokenized during the scan.
    Raw(String),
    /// Sentences of words; each word is normalized during the scan.
    Tokenized(Vec<Vec<String>>),
}

/// One corpus document.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Language of the text
    pub language: Language,
    /// Text content
    pub content: DocumentText,
}

impl Document {
    /// A raw-text document.
    pub fn raw(language: Language, text: impl Into<String>) -> Self {
        Self {
            language,
            content: DocumentText::Raw(text.into()),
        }
    }

    /// A pre-tokenized document.
    pub fn tokenized(language: Language, sentences: Vec<Vec<String>>) -> Self {
        Self {
            language,
            content: DocumentText::Tokenized(sentences),
        }
    }
}

/// Splits text into sentences and words.
pub trait PhraseTokenizer: Send + Sync {
    /// Sentences of `text`.
    fn sentences(&self, language: &Language, text: &str) -> Vec<String>;

    /// Words of a sentence or phrase.
    fn words(&self, language: &Language, text: &str) -> Vec<String>;
}

/// Language-specific string normalization (case folding, accents).
pub trait PhraseNormalizer: Send + Sync {
    /// Normalized form of `text`.
    fn normalize(&self, language: &Language, text: &str) -> String;
}

/// Corpus of plain-text documents.
pub trait CorpusSource: Sync {
    /// Languages this corpus has documents for.
    fn languages(&self) -> Vec<Language>;

    /// Every document in `language`.
    fn documents(&self, language: &Language) -> Result<Box<dyn Iterator<Item = Result<Document>> + Send + '_>>;
}

/// Known anchor phrases and their hyperlink counts.
pub trait AnchorPhraseSource {
    /// Languages this source has anchor statistics for.
    fn languages(&self) -> Vec<Language>;

    /// Every known anchor phrase in `language`, already normalized.
    fn phrases(&self, language: &Language) -> Result<Box<dyn Iterator<Item = String> + '_>>;

    /// `(phrase, link count)` pairs. The same normalized phrase may appear
    /// more than once; counts are summed.
    fn phrase_counts(&self, language: &Language) -> Result<Box<dyn Iterator<Item = (String, u64)> + '_>>;
}
