// Copyright (c) 2025 Semrel Contributors
// Licensed under the Semrel License. See LICENSE file for details.

//! Link probability estimation.
//!
//! The link probability of a phrase is how often it appears as a hyperlink
//! anchor relative to how often it appears at all:
//!
//! ```text
//! p = link_count / (text_count + smoothing)
//! ```
//!
//! `link_count` comes from an [`AnchorPhraseSource`]; `text_count` is
//! measured by scanning a [`CorpusSource`] in parallel. Only word sequences
//! that extend a prefix of some known anchor phrase (a *subgram*) are
//! followed during the scan, so the work per start position is bounded by
//! the longest anchor phrase.
//!
//! # Store layout
//!
//! Results live in a [`KvStore`] directory:
//!
//! - `"<lang>:<phrase>"` → smoothed link probability
//! - `":s:<hash>"` → [`SUBGRAM_SENTINEL`], one per anchor prefix
//!
//! # Example
//!
//! ```rust,ignore
//! let config = LinkProbabilityConfig {
//!     path: "data/link-probability".into(),
//!     languages: vec![Language::new("en")],
//!     ..Default::default()
//! };
//! let mut estimator = LinkProbabilityEstimator::open(config, tokenizer, normalizer)?;
//! estimator.build(&corpus, &anchors)?;
//! let p = estimator.probability(&Language::new("en"), "New York", true)?;
//! ```

use std::collections::hash_map::Entry;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rayon::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SemrelError};
use crate::phrases::counter::PhraseCounter;
use crate::phrases::hash::{phrase_hash, PrefixHash};
use crate::phrases::kv::{KvConfig, KvStore};
use crate::phrases::source::{
    AnchorPhraseSource, CorpusSource, Document, DocumentText, Language, PhraseNormalizer,
    PhraseTokenizer,
};
use crate::storage::{fresh_staging_dir, remove_dir_if_exists, replace_dir};

/// Value stored for subgram keys. Never a valid probability.
pub const SUBGRAM_SENTINEL: f64 = -1.0;

const SUBGRAM_PREFIX: &str = ":s:";

/// Configuration for [`LinkProbabilityEstimator`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkProbabilityConfig {
    /// Directory of the probability store.
    pub path: PathBuf,

    /// Languages to build.
    pub languages: Vec<Language>,

    /// Added to the text count before dividing.
    ///
    /// Default: 3.0
    pub smoothing: f64,

    /// Documents handed to the worker pool at a time.
    ///
    /// Default: 100
    pub batch_size: usize,

    /// Worker threads for the corpus scan. `None` uses the available
    /// hardware parallelism.
    pub num_threads: Option<usize>,
}

impl Default for LinkProbabilityConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("link-probability"),
            languages: Vec::new(),
            smoothing: 3.0,
            batch_size: 100,
            num_threads: None,
        }
    }
}

/// Summary of one language's build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildStats {
    /// Language built
    pub language: Language,
    /// Distinct anchor phrases
    pub anchors: usize,
    /// Distinct anchor prefixes (including full phrases)
    pub subgrams: usize,
    /// Corpus documents scanned
    pub documents: usize,
    /// Probabilities written
    pub inserted: usize,
    /// Phrases never seen in the corpus text
    pub misses: usize,
    /// Mean of the written probabilities (0 if none)
    pub mean_probability: f64,
}

/// In-memory copy of the store, keyed by phrase hash.
#[derive(Debug, Default)]
struct ProbabilityCache {
    probabilities: FxHashMap<u64, f64>,
    subgrams: FxHashSet<u64>,
}

/// Estimates per-language phrase link probabilities.
///
/// Queries fail with `SemrelError::NotBuilt` until a store exists, either
/// from an earlier build found at open or from [`build`](Self::build).
pub struct LinkProbabilityEstimator {
    config: LinkProbabilityConfig,
    tokenizer: Arc<dyn PhraseTokenizer>,
    normalizer: Arc<dyn PhraseNormalizer>,
    store: Option<KvStore<f64>>,
    cache: Option<ProbabilityCache>,
}

impl std::fmt::Debug for LinkProbabilityEstimator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkProbabilityEstimator")
            .field("config", &self.config)
            .field("built", &self.store.is_some())
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl LinkProbabilityEstimator {
    /// Open the estimator, loading the store at `config.path` if present.
    ///
    /// A missing store is not an error; queries stay disabled until
    /// [`build`](Self::build) runs.
    pub fn open(
        config: LinkProbabilityConfig,
        tokenizer: Arc<dyn PhraseTokenizer>,
        normalizer: Arc<dyn PhraseNormalizer>,
    ) -> Result<Self> {
        let store = if KvStore::<f64>::exists(&config.path) {
            Some(KvStore::open_read_only(&config.path)?)
        } else {
            log::warn!(
                "path {} does not exist; link probabilities unavailable until build() is called",
                config.path.display()
            );
            None
        };

        Ok(Self {
            config,
            tokenizer,
            normalizer,
            store,
            cache: None,
        })
    }

    /// Returns `true` if a probability store is available.
    pub fn is_built(&self) -> bool {
        self.store.is_some()
    }

    /// The estimator configuration.
    pub fn config(&self) -> &LinkProbabilityConfig {
        &self.config
    }

    /// Store directory.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    /// Link probability of `phrase`; 0.0 if the phrase is unknown.
    ///
    /// With `normalize`, the phrase goes through the [`PhraseNormalizer`]
    /// before tokenization.
    pub fn probability(&self, language: &Language, phrase: &str, normalize: bool) -> Result<f64> {
        let store = self.store()?;
        let words = self.clean(language, phrase, normalize);
        if words.is_empty() {
            return Ok(0.0);
        }

        if let Some(cache) = &self.cache {
            let hash = phrase_hash(language, &words);
            return Ok(cache.probabilities.get(&hash).copied().unwrap_or(0.0));
        }
        Ok(store
            .get(&probability_key(language, &words))?
            .filter(|p| *p != SUBGRAM_SENTINEL)
            .unwrap_or(0.0))
    }

    /// Returns `true` if `phrase` is a known anchor phrase or a word prefix
    /// of one.
    pub fn is_subphrase(&self, language: &Language, phrase: &str, normalize: bool) -> Result<bool> {
        let store = self.store()?;
        let words = self.clean(language, phrase, normalize);
        if words.is_empty() {
            return Ok(false);
        }

        let hash = phrase_hash(language, &words);
        if let Some(cache) = &self.cache {
            return Ok(cache.subgrams.contains(&hash) || cache.probabilities.contains_key(&hash));
        }
        Ok(store.contains_key(&subgram_key(hash))
            || store.contains_key(&probability_key(language, &words)))
    }

    /// Turn the in-memory cache on or off.
    ///
    /// Enabling scans the whole store once. The cache is not kept in sync
    /// with later builds; [`build`](Self::build) drops it.
    pub fn use_cache(&mut self, enabled: bool) -> Result<()> {
        if !enabled {
            self.cache = None;
            return Ok(());
        }

        let store = self.store()?;
        log::info!("building link probability cache from {}", store.dir().display());

        let mut cache = ProbabilityCache::default();
        for entry in store.iter() {
            let (key, value) = entry?;
            if let Some(hash) = key.strip_prefix(SUBGRAM_PREFIX) {
                match hash.parse::<u64>() {
                    Ok(hash) => {
                        cache.subgrams.insert(hash);
                    }
                    Err(_) => log::warn!("skipping malformed subgram key {:?}", key),
                }
            } else if let Some((code, phrase)) = key.split_once(':') {
                let words: Vec<&str> = phrase.split(' ').collect();
                cache
                    .probabilities
                    .insert(phrase_hash(&Language::new(code), &words), value);
            } else {
                log::warn!("skipping malformed probability key {:?}", key);
            }
        }

        log::info!(
            "created cache with {} entries and {} subgrams",
            cache.probabilities.len(),
            cache.subgrams.len()
        );
        self.cache = Some(cache);
        Ok(())
    }

    /// Returns `true` if the in-memory cache is active.
    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Rebuild the store for every configured language.
    ///
    /// The new store is written to a staging directory that replaces the
    /// old one only once every language succeeded. On error the previous
    /// store (if any) is left on disk and reopened.
    ///
    /// # Errors
    ///
    /// * `SemrelError::Configuration` - a configured language is missing
    ///   from either source, or `batch_size` is zero
    /// * `SemrelError::ThreadPool` - the worker pool could not be created
    /// * `SemrelError::Io` - the store could not be written
    pub fn build(
        &mut self,
        corpus: &dyn CorpusSource,
        anchors: &dyn AnchorPhraseSource,
    ) -> Result<Vec<BuildStats>> {
        self.check_sources(corpus, anchors)?;

        let threads = self.config.num_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        });
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|idx| format!("link-probability-{}", idx))
            .build()
            .map_err(|e| SemrelError::ThreadPool(e.to_string()))?;

        // Release the current generation before its directory is replaced
        self.cache = None;
        self.store = None;

        let path = self.config.path.clone();
        let staging = fresh_staging_dir(&path)?;

        let result = self.build_into(&staging, &pool, corpus, anchors);
        let stats = match result {
            Ok(stats) => stats,
            Err(e) => {
                let _ = remove_dir_if_exists(&staging);
                self.reopen_existing();
                return Err(e);
            }
        };

        if let Err(e) = replace_dir(&staging, &path) {
            let _ = remove_dir_if_exists(&staging);
            self.reopen_existing();
            return Err(SemrelError::Io(e));
        }

        self.store = Some(KvStore::open_read_only(&path)?);
        Ok(stats)
    }

    fn check_sources(&self, corpus: &dyn CorpusSource, anchors: &dyn AnchorPhraseSource) -> Result<()> {
        if self.config.batch_size == 0 {
            return Err(SemrelError::Configuration(
                "link probability batch_size must be positive".to_string(),
            ));
        }

        let corpus_languages = corpus.languages();
        let anchor_languages = anchors.languages();
        for language in &self.config.languages {
            if !corpus_languages.contains(language) {
                return Err(SemrelError::Configuration(format!(
                    "corpus has no documents for language {}",
                    language
                )));
            }
            if !anchor_languages.contains(language) {
                return Err(SemrelError::Configuration(format!(
                    "anchor source has no phrases for language {}",
                    language
                )));
            }
        }
        Ok(())
    }

    fn reopen_existing(&mut self) {
        if KvStore::<f64>::exists(&self.config.path) {
            match KvStore::open_read_only(&self.config.path) {
                Ok(store) => self.store = Some(store),
                Err(e) => log::warn!(
                    "could not reopen previous store {}: {}",
                    self.config.path.display(),
                    e
                ),
            }
        }
    }

    fn build_into(
        &self,
        staging: &Path,
        pool: &rayon::ThreadPool,
        corpus: &dyn CorpusSource,
        anchors: &dyn AnchorPhraseSource,
    ) -> Result<Vec<BuildStats>> {
        let mut store: KvStore<f64> = KvStore::with_config(staging, KvConfig::default())?;
        let mut all_stats = Vec::with_capacity(self.config.languages.len());
        for language in &self.config.languages {
            all_stats.push(self.build_language(&mut store, pool, language, corpus, anchors)?);
        }
        store.sync()?;
        Ok(all_stats)
    }

    fn build_language(
        &self,
        store: &mut KvStore<f64>,
        pool: &rayon::ThreadPool,
        language: &Language,
        corpus: &dyn CorpusSource,
        anchors: &dyn AnchorPhraseSource,
    ) -> Result<BuildStats> {
        // Every word prefix of every anchor phrase is a subgram; only full
        // phrases are counted.
        let mut subgrams: FxHashSet<u64> = FxHashSet::default();
        let counter = PhraseCounter::new();
        for phrase in anchors.phrases(language)? {
            let words = self.tokenizer.words(language, &phrase);
            if words.is_empty() {
                continue;
            }
            let mut hash = PrefixHash::start(language);
            for word in &words {
                hash = hash.extend(word);
                subgrams.insert(hash.value());
            }
            counter.track(hash.value());
        }
        log::info!(
            "found {} unique anchor texts and {} subgrams for language {}",
            counter.len(),
            subgrams.len(),
            language
        );

        log::info!("building link probabilities for language {}", language);
        let documents = self.scan_corpus(pool, language, corpus, &subgrams, &counter)?;

        // Link counts are summed over surface forms that clean to the same
        // phrase; the first form seen names the key.
        let mut link_counts: FxHashMap<u64, u64> = FxHashMap::default();
        let mut phrases: Vec<(u64, Vec<String>)> = Vec::new();
        for (phrase, links) in anchors.phrase_counts(language)? {
            let words = self.tokenizer.words(language, &phrase);
            if words.is_empty() {
                continue;
            }
            let hash = phrase_hash(language, &words);
            match link_counts.entry(hash) {
                Entry::Occupied(mut total) => *total.get_mut() += links,
                Entry::Vacant(slot) => {
                    slot.insert(links);
                    phrases.push((hash, words));
                }
            }
        }

        let mut inserted = 0usize;
        let mut misses = 0usize;
        let mut sum = 0.0f64;
        for (hash, words) in &phrases {
            let links = link_counts.get(hash).copied().unwrap_or(0);
            let text = counter.count(*hash);
            if text == 0 {
                misses += 1;
            }
            let p = links as f64 / (text as f64 + self.config.smoothing);
            store.put(&probability_key(language, words), &p)?;
            sum += p;
            inserted += 1;
        }

        for hash in &subgrams {
            store.put(&subgram_key(*hash), &SUBGRAM_SENTINEL)?;
        }

        let mean_probability = if inserted > 0 { sum / inserted as f64 } else { 0.0 };
        if inserted > 0 {
            log::info!(
                "inserted link probabilities for {} anchors with mean probability {:.4} and {} misses",
                inserted,
                mean_probability,
                misses
            );
        }

        Ok(BuildStats {
            language: language.clone(),
            anchors: counter.len(),
            subgrams: subgrams.len(),
            documents,
            inserted,
            misses,
            mean_probability,
        })
    }

    /// Count anchor phrase occurrences in the corpus text. Returns the
    /// number of documents scanned.
    fn scan_corpus(
        &self,
        pool: &rayon::ThreadPool,
        language: &Language,
        corpus: &dyn CorpusSource,
        subgrams: &FxHashSet<u64>,
        counter: &PhraseCounter,
    ) -> Result<usize> {
        let mut documents = corpus.documents(language)?;
        let mut scanned = 0usize;
        let mut batch: Vec<Document> = Vec::with_capacity(self.config.batch_size);

        loop {
            batch.clear();
            for doc in documents.by_ref().take(self.config.batch_size) {
                batch.push(doc?);
            }
            if batch.is_empty() {
                break;
            }

            pool.install(|| {
                batch
                    .par_iter()
                    .for_each(|doc| self.scan_document(language, doc, subgrams, counter));
            });
            scanned += batch.len();
            log::debug!("scanned {} documents for language {}", scanned, language);
        }
        Ok(scanned)
    }

    fn scan_document(
        &self,
        language: &Language,
        doc: &Document,
        subgrams: &FxHashSet<u64>,
        counter: &PhraseCounter,
    ) {
        let sentences: Vec<Vec<String>> = match &doc.content {
            DocumentText::Raw(text) => self
                .tokenizer
                .sentences(language, text)
                .iter()
                .map(|s| self.clean(language, s, true))
                .collect(),
            DocumentText::Tokenized(sentences) => sentences
                .iter()
                .map(|words| self.clean(language, &words.join(" "), true))
                .collect(),
        };

        for words in &sentences {
            for start in 0..words.len() {
                let mut hash = PrefixHash::start(language);
                for word in &words[start..] {
                    hash = hash.extend(word);
                    if !subgrams.contains(&hash.value()) {
                        break;
                    }
                    counter.increment_if_tracked(hash.value());
                }
            }
        }
    }

    /// Split `phrase` into words, normalizing the whole text first when
    /// asked. Corpus text always goes through the normalizing path.
    fn clean(&self, language: &Language, phrase: &str, normalize: bool) -> Vec<String> {
        if normalize {
            let normalized = self.normalizer.normalize(language, phrase);
            self.tokenizer.words(language, &normalized)
        } else {
            self.tokenizer.words(language, phrase)
        }
    }

    fn store(&self) -> Result<&KvStore<f64>> {
        self.store.as_ref().ok_or_else(|| {
            SemrelError::NotBuilt(format!(
                "link probabilities at {} have not been built; call build()",
                self.config.path.display()
            ))
        })
    }
}

fn probability_key<S: AsRef<str>>(language: &Language, words: &[S]) -> String {
    let mut key = String::with_capacity(language.code().len() + 1 + words.len() * 8);
    key.push_str(language.code());
    key.push(':');
    for (i, word) in words.iter().enumerate() {
        if i > 0 {
            key.push(' ');
        }
        key.push_str(word.as_ref());
    }
    key
}

fn subgram_key(hash: u64) -> String {
    format!("{}{}", SUBGRAM_PREFIX, hash)
}
