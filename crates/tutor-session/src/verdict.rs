//! Classifiers that turn a judge model's free text into a [`Verdict`].
//!
//! Both classifiers scan for fixed marker phrases with plain substring tests.
//! This is brittle: a judge that paraphrases its verdict, or quotes a marker
//! while negating it, is misclassified. Keeping the matching behind
//! [`VerdictClassifier`] lets a structured judge replace it without touching
//! the session lifecycle.

use serde::{Deserialize, Serialize};

/// Outcome of a judged submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// Fully correct; the user moves up a level.
    Pass,
    /// Partly correct; the level is unchanged.
    Partial,
    /// Incorrect or unrecognised; the user moves down a level.
    Fail,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Partial => write!(f, "partial"),
            Self::Fail => write!(f, "fail"),
        }
    }
}

/// Maps judge output to a verdict.
pub trait VerdictClassifier: Send + Sync {
    /// Classifies `judge_output` for the user's `submission`.
    fn classify(&self, judge_output: &str, submission: &str) -> Verdict;
}

/// Passes when the judge output contains a single success phrase.
///
/// Output without the phrase, including output with no recognisable verdict
/// at all, is a [`Verdict::Fail`].
#[derive(Debug, Clone)]
pub struct MarkerPhraseClassifier {
    marker: String,
}

impl MarkerPhraseClassifier {
    /// Phrase the sentence judge is instructed to end a passing reply with.
    pub const SENTENCE_MARKER: &'static str = "has captured the full meaning";

    /// Creates a classifier for `marker`.
    #[must_use]
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into(),
        }
    }

    /// Returns the marker phrase.
    #[must_use]
    pub fn marker(&self) -> &str {
        &self.marker
    }
}

impl Default for MarkerPhraseClassifier {
    fn default() -> Self {
        Self::new(Self::SENTENCE_MARKER)
    }
}

impl VerdictClassifier for MarkerPhraseClassifier {
    fn classify(&self, judge_output: &str, _submission: &str) -> Verdict {
        if judge_output.contains(&self.marker) {
            Verdict::Pass
        } else {
            Verdict::Fail
        }
    }
}

/// Three-way classifier for the vocabulary judge.
///
/// - `Pass`: pinyin, tone and meaning are all reported correct, and the
///   submission itself contains the reference numbered pinyin.
/// - `Fail`: no ` correct` appears anywhere (the leading space keeps
///   `incorrect` from counting).
/// - `Partial`: anything else.
#[derive(Debug, Clone)]
pub struct VocabularyJudgeClassifier {
    reference_pinyin: String,
}

impl VocabularyJudgeClassifier {
    /// Phrases that must all appear for a pass.
    pub const PASS_MARKERS: [&'static str; 3] =
        ["pinyin is correct", "tone is correct", "meaning is correct"];

    /// Creates a classifier for a word whose numbered pinyin is `reference_pinyin`.
    #[must_use]
    pub fn new(reference_pinyin: impl Into<String>) -> Self {
        Self {
            reference_pinyin: reference_pinyin.into(),
        }
    }
}

impl VerdictClassifier for VocabularyJudgeClassifier {
    fn classify(&self, judge_output: &str, submission: &str) -> Verdict {
        let all_correct = Self::PASS_MARKERS
            .iter()
            .all(|marker| judge_output.contains(marker));

        if all_correct && submission.contains(&self.reference_pinyin) {
            Verdict::Pass
        } else if judge_output.contains(" correct") {
            Verdict::Partial
        } else {
            Verdict::Fail
        }
    }
}
