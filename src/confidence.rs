//! Confidence estimation for deterministic extraction attempts.
//!
//! The estimator answers one question per page: can the text we got for free
//! be trusted, or should we pay for a vision call? It is a pure function of
//! the attempt, so the same page always gets the same score.
//!
//! ## Components
//!
//! | Component   | Signal                                                  | Default weight |
//! |-------------|---------------------------------------------------------|----------------|
//! | coverage    | share of the page area covered by text boxes            | 0.25           |
//! | cleanliness | absence of control chars, U+FFFD and symbol soup        | 0.25           |
//! | word ratio  | share of tokens that look like real words               | 0.35           |
//! | length      | enough characters to be a real page of text             | 0.15           |
//!
//! Pages with no text layer at all (scans) score 0.0 outright, as do
//! attempts that carry an error. Adapters that report their own confidence
//! (AI = 1.0) are trusted as-is.

use crate::extract::ExtractionAttempt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Pages scoring below this are escalation candidates.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// Coverage at which a page counts as fully text-bearing. Dense body text
/// rarely covers more than a third of the page once margins are counted.
const FULL_COVERAGE: f32 = 0.35;

/// Characters at which the length component saturates.
const FULL_LENGTH: f32 = 200.0;

/// Runs of 4+ non-word, non-space characters: `#$%&`, `�¤¤¤`, broken encodings.
static RE_GARBLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^\w\s]{4,}").unwrap());

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of",
        "on", "or", "that", "the", "to", "was", "with", "i", "we", "you", "he", "she", "they",
        "de", "la", "le", "et", "des", "du", "el", "en", "y", "der", "die", "das", "und",
    ]
    .into_iter()
    .collect()
});

/// Relative weights of the heuristic components. Normalised at scoring time,
/// so they need not sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub coverage: f32,
    pub cleanliness: f32,
    pub word_ratio: f32,
    pub length: f32,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            coverage: 0.25,
            cleanliness: 0.25,
            word_ratio: 0.35,
            length: 0.15,
        }
    }
}

/// Per-component scores, each in [0, 1], for logging and tuning.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ScoreBreakdown {
    pub coverage: f32,
    pub cleanliness: f32,
    pub word_ratio: f32,
    pub length: f32,
    /// The adapter's own belief (tesseract), when it reported one.
    pub engine: Option<f32>,
    pub total: f32,
}

/// Scores attempts and decides whether they need escalation.
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceEstimator {
    threshold: f32,
    weights: ConfidenceWeights,
}

impl Default for ConfidenceEstimator {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD, ConfidenceWeights::default())
    }
}

impl ConfidenceEstimator {
    pub fn new(threshold: f32, weights: ConfidenceWeights) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            weights,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Score an attempt in [0, 1].
    pub fn score(&self, attempt: &ExtractionAttempt) -> f32 {
        if attempt.error.is_some() {
            return 0.0;
        }
        if let Some(c) = attempt.confidence {
            return c.clamp(0.0, 1.0);
        }
        self.breakdown(attempt).total
    }

    /// Component scores for a deterministic attempt.
    pub fn breakdown(&self, attempt: &ExtractionAttempt) -> ScoreBreakdown {
        let payload = &attempt.payload;
        let text = payload.text.trim();
        if attempt.error.is_some() || !payload.has_text_layer || text.is_empty() {
            return ScoreBreakdown {
                engine: payload.engine_confidence,
                ..Default::default()
            };
        }

        let chars = text.chars().filter(|c| !c.is_whitespace()).count() as f32;
        let length = (chars / FULL_LENGTH).min(1.0);
        let coverage = match payload.text_coverage {
            Some(cov) => (cov / FULL_COVERAGE).min(1.0),
            None => length,
        };
        let cleanliness = cleanliness(text);
        let word_ratio = word_ratio(text);

        let w = &self.weights;
        let weight_sum = w.coverage + w.cleanliness + w.word_ratio + w.length;
        let heuristic = if weight_sum > 0.0 {
            (w.coverage * coverage
                + w.cleanliness * cleanliness
                + w.word_ratio * word_ratio
                + w.length * length)
                / weight_sum
        } else {
            0.0
        };

        let total = match payload.engine_confidence {
            Some(engine) => 0.5 * heuristic + 0.5 * engine.clamp(0.0, 1.0),
            None => heuristic,
        };

        ScoreBreakdown {
            coverage,
            cleanliness,
            word_ratio,
            length,
            engine: payload.engine_confidence,
            total: total.clamp(0.0, 1.0),
        }
    }

    /// Whether a page with this score should be escalated.
    pub fn needs_escalation(&self, score: f32) -> bool {
        score < self.threshold
    }
}

/// 1.0 minus the share of characters that are noise.
fn cleanliness(text: &str) -> f32 {
    let total = text.chars().count();
    if total == 0 {
        return 0.0;
    }
    let bad_chars = text
        .chars()
        .filter(|c| *c == '\u{FFFD}' || (c.is_control() && !c.is_whitespace()))
        .count();
    let garble_chars: usize = RE_GARBLE
        .find_iter(text)
        .map(|m| m.as_str().chars().count())
        .sum();
    let noise = (bad_chars + garble_chars).min(total) as f32;
    1.0 - noise / total as f32
}

/// Share of whitespace-separated tokens that look like words.
///
/// A token counts when, stripped of surrounding punctuation, it is a stop
/// word, a number, a non-ASCII alphabetic word, or an ASCII word of 2+
/// letters containing a vowel. Single stray letters (`t h e` spacing
/// artefacts) do not count.
fn word_ratio(text: &str) -> f32 {
    let mut total = 0usize;
    let mut recognised = 0usize;
    for raw in text.split_whitespace() {
        let token = raw.trim_matches(|c: char| !c.is_alphanumeric());
        total += 1;
        if token.is_empty() {
            continue;
        }
        let lower = token.to_lowercase();
        let is_word = STOP_WORDS.contains(lower.as_str())
            || token.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '/'))
            || (!token.is_ascii() && token.chars().all(char::is_alphabetic))
            || (token.chars().count() >= 2
                && token.chars().all(char::is_alphabetic)
                && lower.chars().any(|c| "aeiouy".contains(c)));
        if is_word {
            recognised += 1;
        }
    }
    if total == 0 {
        0.0
    } else {
        recognised as f32 / total as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PageError;
    use crate::extract::{ExtractionMethod, PagePayload};
    use std::time::Duration;

    fn attempt(text: &str, coverage: Option<f32>) -> ExtractionAttempt {
        ExtractionAttempt::succeeded(
            ExtractionMethod::Library,
            PagePayload {
                text: text.to_string(),
                text_coverage: coverage,
                has_text_layer: !text.trim().is_empty(),
                ..Default::default()
            },
            Duration::ZERO,
        )
    }

    const PROSE: &str = "The quarterly report shows that revenue grew in every region. \
        Operating costs were flat, and the board approved the new budget for the \
        coming year. Customers in the northern market responded well to the launch \
        of the subscription plan, which now accounts for most new sales.";

    #[test]
    fn clean_text_page_scores_high() {
        let est = ConfidenceEstimator::default();
        let score = est.score(&attempt(PROSE, Some(0.4)));
        assert!(score > 0.9, "got {score}");
        assert!(!est.needs_escalation(score));
    }

    #[test]
    fn image_only_page_scores_zero() {
        let est = ConfidenceEstimator::default();
        assert_eq!(est.score(&attempt("", Some(0.0))), 0.0);
        assert_eq!(est.score(&attempt("   \n", None)), 0.0);
    }

    #[test]
    fn errored_attempt_scores_zero() {
        let est = ConfidenceEstimator::default();
        let a = ExtractionAttempt::failed(
            ExtractionMethod::Library,
            PageError::ExtractionFailed {
                page: 1,
                method: "library".into(),
                detail: "bad xref".into(),
            },
            Duration::ZERO,
        );
        assert_eq!(est.score(&a), 0.0);
    }

    #[test]
    fn garbled_text_escalates() {
        let est = ConfidenceEstimator::default();
        let garbled = "¤¤¤¤ #$%& t h e q u i c k \u{FFFD}\u{FFFD}\u{FFFD} @@@@ x z q";
        let score = est.score(&attempt(garbled, Some(0.05)));
        assert!(est.needs_escalation(score), "got {score}");
    }

    #[test]
    fn reported_confidence_is_trusted() {
        let est = ConfidenceEstimator::default();
        let mut a = attempt("", None);
        a.confidence = Some(1.0);
        assert_eq!(est.score(&a), 1.0);
        a.confidence = Some(1.7);
        assert_eq!(est.score(&a), 1.0);
    }

    #[test]
    fn engine_confidence_is_blended() {
        let est = ConfidenceEstimator::default();
        let mut a = attempt(PROSE, Some(0.4));
        let alone = est.score(&a);
        a.payload.engine_confidence = Some(0.2);
        let blended = est.score(&a);
        assert!(blended < alone);
        let b = est.breakdown(&a);
        assert!((b.total - (0.5 * alone + 0.1)).abs() < 1e-4);
    }

    #[test]
    fn scoring_is_deterministic() {
        let est = ConfidenceEstimator::default();
        let a = attempt("Invoice 2024-113 total 42.00 EUR", Some(0.02));
        assert_eq!(est.score(&a), est.score(&a));
    }

    #[test]
    fn short_text_is_penalised() {
        let est = ConfidenceEstimator::default();
        let b = est.breakdown(&attempt("Figure 3", None));
        assert!(b.length < 0.1);
        assert!(b.coverage < 0.1);
    }

    #[test]
    fn word_ratio_ignores_spaced_letters() {
        assert!(word_ratio("t h e r e p o r t") < 0.2);
        assert!(word_ratio("the report was filed") > 0.99);
        assert!(word_ratio("Größe und Gewicht") > 0.99);
    }
}
