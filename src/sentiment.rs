// src/sentiment.rs
//! Headline sentiment: a lexicon-based compound scorer and the keyword tagger
//! that fans one score out to every matched keyword.

use once_cell::sync::Lazy;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::keywords::KeywordIndex;

static LEXICON: Lazy<HashMap<String, f64>> = Lazy::new(|| {
    let raw = include_str!("../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, f64>>(raw).expect("valid sentiment lexicon")
});

/// Normalization constant of the compound score: `s / sqrt(s^2 + ALPHA)`.
const ALPHA: f64 = 15.0;
/// Valence multiplier applied to a negated word.
const NEGATION_SCALAR: f64 = -0.74;
/// Magnitude added to the next sentiment word by an intensifier.
const BOOSTER_INCR: f64 = 0.293;

/// Anything that turns text into a single compound score in `[-1, 1]`.
pub trait SentimentScorer: Send + Sync {
    fn compound(&self, text: &str) -> f64;
}

#[derive(Debug, Clone, Default)]
pub struct LexiconScorer;

impl LexiconScorer {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn word_valence(&self, w: &str) -> f64 {
        LEXICON.get(w).copied().unwrap_or(0.0)
    }

    /// Raw (unnormalized) valence sum.
    /// A negator in the previous 1..=3 tokens flips and dampens a word;
    /// an intensifier directly before it increases its magnitude.
    fn raw_score(&self, text: &str) -> f64 {
        let tokens: Vec<String> = tokenize(text).collect();
        let mut sum = 0.0;

        for i in 0..tokens.len() {
            let mut v = self.word_valence(&tokens[i]);
            if v == 0.0 {
                continue;
            }
            if i >= 1 && is_booster(&tokens[i - 1]) {
                v += BOOSTER_INCR * v.signum();
            }
            let negated = (1..=3).any(|k| i >= k && is_negator(&tokens[i - k]));
            if negated {
                v *= NEGATION_SCALAR;
            }
            sum += v;
        }
        sum
    }
}

impl SentimentScorer for LexiconScorer {
    fn compound(&self, text: &str) -> f64 {
        let s = self.raw_score(text);
        if s == 0.0 {
            return 0.0;
        }
        (s / (s * s + ALPHA).sqrt()).clamp(-1.0, 1.0)
    }
}

/// Lower-case word tokens. Hyphens ("sell-off") and inner apostrophes
/// ("isn't") stay inside the token; a possessive `'s` is dropped.
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !(c.is_alphanumeric() || matches!(c, '-' | '\'' | '\u{2019}')))
        .map(|t| t.trim_matches(|c: char| matches!(c, '-' | '\'' | '\u{2019}')))
        .filter(|t| !t.is_empty())
        .map(|t| {
            let mut t = t.to_lowercase().replace('\u{2019}', "'");
            if t.ends_with("'s") {
                t.truncate(t.len() - 2);
            }
            t
        })
}

fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not" | "no" | "never" | "nor" | "without" | "cannot" | "cant" | "dont" | "wont"
    ) || tok.ends_with("n't")
}

fn is_booster(tok: &str) -> bool {
    matches!(
        tok,
        "very" | "extremely" | "hugely" | "massive" | "major" | "sharply" | "deeply"
    )
}

/// Score `title` once and attach that score to every keyword it matches.
/// No match yields an empty map (the entry is still stored, just untagged).
pub fn tag(title: &str, index: &KeywordIndex, scorer: &dyn SentimentScorer) -> BTreeMap<String, f64> {
    let matched = index.match_any(title);
    if matched.is_empty() {
        return BTreeMap::new();
    }
    let score = scorer.compound(title);
    matched.into_iter().map(|k| (k, score)).collect()
}

/// Owns the keyword index and the scorer for the lifetime of the process.
pub struct SentimentTagger {
    index: KeywordIndex,
    scorer: Arc<dyn SentimentScorer>,
}

impl SentimentTagger {
    pub fn new(index: KeywordIndex, scorer: Arc<dyn SentimentScorer>) -> Self {
        Self { index, scorer }
    }

    /// Tagger backed by the built-in lexicon scorer.
    pub fn with_lexicon(index: KeywordIndex) -> Self {
        Self::new(index, Arc::new(LexiconScorer::new()))
    }

    pub fn tag(&self, title: &str) -> BTreeMap<String, f64> {
        tag(title, &self.index, self.scorer.as_ref())
    }
}
