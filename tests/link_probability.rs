//! Integration tests for LinkProbabilityEstimator
//!
//! Builds probability stores from in-memory corpora and checks the
//! smoothed estimate, subphrase lookups, persistence across reopen, and
//! full replacement on rebuild.

use approx::assert_relative_eq;
use semrel::phrases::{
    AnchorPhraseSource, CorpusSource, Document, Language, LinkProbabilityConfig,
    LinkProbabilityEstimator, PhraseNormalizer, PhraseTokenizer,
};
use semrel::{Result, SemrelError};
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

struct Whitespace;

impl PhraseTokenizer for Whitespace {
    fn sentences(&self, _language: &Language, text: &str) -> Vec<String> {
        text.split(['.', '!', '?'])
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    fn words(&self, _language: &Language, text: &str) -> Vec<String> {
        text.split(|c: char| c.is_whitespace() || c == ',')
            .filter(|w| !w.is_empty())
            .map(String::from)
            .collect()
    }
}

struct Lowercase;

impl PhraseNormalizer for Lowercase {
    fn normalize(&self, _language: &Language, text: &str) -> String {
        text.to_lowercase()
    }
}

/// Corpus of documents per language; a document equal to `"FAIL"` yields
/// an I/O error.
struct Corpus {
    docs: Vec<Document>,
}

impl CorpusSource for Corpus {
    fn languages(&self) -> Vec<Language> {
        let mut langs: Vec<Language> = self.docs.iter().map(|d| d.language.clone()).collect();
        langs.sort();
        langs.dedup();
        if langs.is_empty() {
            langs.push(Language::new("en"));
        }
        langs
    }

    fn documents(
        &self,
        language: &Language,
    ) -> Result<Box<dyn Iterator<Item = Result<Document>> + Send + '_>> {
        let language = language.clone();
        Ok(Box::new(
            self.docs
                .iter()
                .filter(move |d| d.language == language)
                .map(|d| match &d.content {
                    semrel::phrases::DocumentText::Raw(text) if text == "FAIL" => {
                        Err(SemrelError::Io(std::io::Error::other("corpus read failed")))
                    }
                    _ => Ok(d.clone()),
                }),
        ))
    }
}

struct Anchors {
    language: Language,
    counts: Vec<(String, u64)>,
}

impl AnchorPhraseSource for Anchors {
    fn languages(&self) -> Vec<Language> {
        vec![self.language.clone()]
    }

    fn phrases(&self, _language: &Language) -> Result<Box<dyn Iterator<Item = String> + '_>> {
        Ok(Box::new(self.counts.iter().map(|(p, _)| p.clone())))
    }

    fn phrase_counts(
        &self,
        _language: &Language,
    ) -> Result<Box<dyn Iterator<Item = (String, u64)> + '_>> {
        Ok(Box::new(self.counts.iter().cloned()))
    }
}

fn en() -> Language {
    Language::new("en")
}

fn anchors(counts: &[(&str, u64)]) -> Anchors {
    Anchors {
        language: en(),
        counts: counts.iter().map(|(p, n)| (p.to_string(), *n)).collect(),
    }
}

fn open(path: &Path) -> LinkProbabilityEstimator {
    let config = LinkProbabilityConfig {
        path: path.to_path_buf(),
        languages: vec![en()],
        batch_size: 16,
        num_threads: Some(4),
        ..Default::default()
    };
    LinkProbabilityEstimator::open(config, Arc::new(Whitespace), Arc::new(Lowercase)).unwrap()
}

/// 100 documents mention "new york": 40 as link anchors, 60 as plain
/// prose. The link count is supplied by the anchor source.
fn new_york_corpus() -> Corpus {
    let docs = (0..100)
        .map(|i| {
            let text = if i < 40 {
                format!("Article {}. See New York for details.", i)
            } else {
                format!("Article {}. I moved to new york, then left.", i)
            };
            Document::raw(en(), text)
        })
        .collect();
    Corpus { docs }
}

#[test]
fn test_new_york_probability() {
    let dir = tempdir().unwrap();
    let mut est = open(&dir.path().join("lp"));
    let stats = est
        .build(&new_york_corpus(), &anchors(&[("new york", 40)]))
        .unwrap();

    assert_eq!(stats[0].documents, 100);
    assert_eq!(stats[0].misses, 0);
    assert_relative_eq!(
        est.probability(&en(), "new york", false).unwrap(),
        40.0 / (100.0 + 3.0),
        epsilon = 1e-12
    );
    assert_relative_eq!(
        est.probability(&en(), "New York", true).unwrap(),
        40.0 / 103.0,
        epsilon = 1e-12
    );
}

#[test]
fn test_unknown_phrase_is_zero() {
    let dir = tempdir().unwrap();
    let mut est = open(&dir.path().join("lp"));
    est.build(&new_york_corpus(), &anchors(&[("new york", 40)]))
        .unwrap();

    assert_eq!(est.probability(&en(), "los angeles", false).unwrap(), 0.0);
    assert_eq!(est.probability(&en(), "", false).unwrap(), 0.0);
    assert_eq!(est.probability(&Language::new("fr"), "new york", false).unwrap(), 0.0);
}

#[test]
fn test_subphrase() {
    let dir = tempdir().unwrap();
    let mut est = open(&dir.path().join("lp"));
    est.build(&new_york_corpus(), &anchors(&[("new york city", 5)]))
        .unwrap();

    assert!(est.is_subphrase(&en(), "new", false).unwrap());
    assert!(est.is_subphrase(&en(), "new york", false).unwrap());
    assert!(est.is_subphrase(&en(), "NEW York", true).unwrap());
    assert!(est.is_subphrase(&en(), "new york city", false).unwrap());
    assert!(!est.is_subphrase(&en(), "york", false).unwrap());
    assert!(!est.is_subphrase(&en(), "new york city hall", false).unwrap());
}

#[test]
fn test_reopen_preserves_probabilities() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lp");
    let queries = ["new york", "big apple", "new", "manhattan"];

    let before: Vec<(f64, bool)> = {
        let mut est = open(&path);
        est.build(
            &new_york_corpus(),
            &anchors(&[("new york", 40), ("big apple", 2), ("manhattan", 0)]),
        )
        .unwrap();
        queries
            .iter()
            .map(|q| {
                (
                    est.probability(&en(), q, false).unwrap(),
                    est.is_subphrase(&en(), q, false).unwrap(),
                )
            })
            .collect()
    };

    let est = open(&path);
    assert!(est.is_built());
    for (q, expected) in queries.iter().zip(&before) {
        assert_eq!(est.probability(&en(), q, false).unwrap(), expected.0, "{}", q);
        assert_eq!(est.is_subphrase(&en(), q, false).unwrap(), expected.1, "{}", q);
    }
}

#[test]
fn test_rebuild_replaces_contents() {
    let dir = tempdir().unwrap();
    let mut est = open(&dir.path().join("lp"));
    est.build(&new_york_corpus(), &anchors(&[("new york", 40)]))
        .unwrap();
    est.use_cache(true).unwrap();
    assert!(est.probability(&en(), "new york", false).unwrap() > 0.0);

    est.build(&new_york_corpus(), &anchors(&[("big apple", 3)]))
        .unwrap();
    assert!(!est.is_cached());
    assert_eq!(est.probability(&en(), "new york", false).unwrap(), 0.0);
    assert!(!est.is_subphrase(&en(), "new", false).unwrap());
    assert_relative_eq!(est.probability(&en(), "big apple", false).unwrap(), 1.0);

    // A fresh handle sees only the second build as well
    let reopened = open(&dir.path().join("lp"));
    assert_eq!(reopened.probability(&en(), "new york", false).unwrap(), 0.0);
}

#[test]
fn test_failed_build_keeps_previous_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lp");
    let mut est = open(&path);
    est.build(&new_york_corpus(), &anchors(&[("new york", 40)]))
        .unwrap();

    let mut broken = new_york_corpus();
    broken.docs.push(Document::raw(en(), "FAIL"));
    let result = est.build(&broken, &anchors(&[("big apple", 3)]));
    assert!(matches!(result, Err(SemrelError::Io(_))));

    assert!(est.is_built());
    assert_relative_eq!(
        est.probability(&en(), "new york", false).unwrap(),
        40.0 / 103.0,
        epsilon = 1e-12
    );
    assert_eq!(est.probability(&en(), "big apple", false).unwrap(), 0.0);
}

#[test]
fn test_tokenized_documents() {
    let dir = tempdir().unwrap();
    let mut est = open(&dir.path().join("lp"));
    let sentence = |words: &[&str]| words.iter().map(|w| w.to_string()).collect::<Vec<_>>();
    let corpus = Corpus {
        docs: vec![
            Document::tokenized(en(), vec![sentence(&["The", "New", "York", "Times"])]),
            Document::tokenized(en(), vec![sentence(&["new"]), sentence(&["york"])]),
        ],
    };
    est.build(&corpus, &anchors(&[("new york", 2)])).unwrap();

    // Only the first document has the phrase within one sentence
    assert_relative_eq!(est.probability(&en(), "new york", false).unwrap(), 2.0 / 4.0);
}

#[test]
fn test_languages_kept_apart() {
    let dir = tempdir().unwrap();
    let config = LinkProbabilityConfig {
        path: dir.path().join("lp"),
        languages: vec![en()],
        ..Default::default()
    };
    let mut est =
        LinkProbabilityEstimator::open(config, Arc::new(Whitespace), Arc::new(Lowercase)).unwrap();
    est.build(&new_york_corpus(), &anchors(&[("new york", 40)]))
        .unwrap();

    let de = Language::new("de");
    assert_eq!(est.probability(&de, "new york", false).unwrap(), 0.0);
    assert!(!est.is_subphrase(&de, "new", false).unwrap());
}

#[test]
fn test_missing_anchor_language_is_configuration_error() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("lp");
    let mut est = open(&path);
    let german = Anchors {
        language: Language::new("de"),
        counts: vec![("berlin".to_string(), 1)],
    };
    assert!(matches!(
        est.build(&new_york_corpus(), &german),
        Err(SemrelError::Configuration(_))
    ));
    assert!(!est.is_built());
    assert!(!path.exists());
}
