//! HSK Tutor Corpus
//!
//! Loads the reference material the tutor bots sample problems from. Both
//! sources are parsed once at startup into level-indexed buckets.
//!
//! # Types
//!
//! - [`Level`] - Validated difficulty ordinal in `1..=7`
//! - [`SentenceCorpus`] - Sentences segmented from a flat reference text, each
//!   carrying the section headers that enclosed it
//! - [`WordList`] - Typed vocabulary records loaded from a CSV word list
//!
//! # Example
//!
//! ```rust
//! use tutor_corpus::{Level, SentenceCorpus};
//!
//! let text = "A.1 一级\nA.1.1 代词\n我是学生。\n";
//! let corpus = SentenceCorpus::parse(text).unwrap();
//!
//! let entries = corpus.level(Level::MIN).unwrap();
//! assert_eq!(entries[0].text, "我是学生。");
//! assert_eq!(entries[0].context, vec!["A.1.1 代词".to_string()]);
//! ```

mod level;
pub mod sentences;
pub mod words;

pub use level::{Level, LEVEL_COUNT};
pub use sentences::{Entry, SentenceCorpus, MAX_ENTRY_CHARS};
pub use words::{ScriptFormat, WordList, WordRecord};

use std::path::PathBuf;

use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading reference material.
///
/// Every variant is fatal at startup: a tutor cannot serve problems from a
/// corpus it failed to load.
#[derive(Debug, Error)]
pub enum CorpusError {
    /// The reference file does not exist.
    #[error("Corpus file not found: '{path}'\n\nSuggestion: Check the corpus path in tutor.json")]
    NotFound {
        /// Path where the file was expected.
        path: PathBuf,
    },

    /// The reference file is not valid UTF-8.
    #[error("Corpus file has invalid encoding: '{path}'\n\nSuggestion: Convert the file to UTF-8 encoding")]
    Encoding {
        /// Path to the offending file.
        path: PathBuf,
    },

    /// A sentence was found before any level marker opened a bucket.
    #[error("Line {line_number} holds a sentence before any level marker: '{line}'\n\nSuggestion: Start the file with a level marker such as 'A.1 '")]
    EntryBeforeLevelMarker {
        /// 1-based line number of the sentence.
        line_number: usize,
        /// The offending line, trimmed.
        line: String,
    },

    /// A word list row could not be decoded.
    #[error("Invalid word list row {row}: {message}")]
    WordRow {
        /// 1-based data row number (header excluded).
        row: usize,
        /// Description of the decode failure.
        message: String,
    },

    /// A word list row names a level outside `1..=7`.
    #[error("Word list row {row} has level {level}, expected 1 to 7")]
    WordLevel {
        /// 1-based data row number (header excluded).
        row: usize,
        /// The level found in the row.
        level: i64,
    },

    /// The CSV reader failed before any row could be decoded.
    #[error("Invalid word list: {0}")]
    Csv(#[from] csv::Error),

    /// A built-in pattern failed to compile.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// General I/O error while reading a corpus file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CorpusError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound { path: path.into() }
    }

    /// Creates a new `Encoding` error.
    #[must_use]
    pub fn encoding(path: impl Into<PathBuf>) -> Self {
        Self::Encoding { path: path.into() }
    }

    /// Creates a new `WordRow` error.
    #[must_use]
    pub fn word_row(row: usize, message: impl Into<String>) -> Self {
        Self::WordRow {
            row,
            message: message.into(),
        }
    }
}

/// A specialized `Result` type for corpus loading.
pub type Result<T> = std::result::Result<T, CorpusError>;

/// Reads a reference file as UTF-8, mapping missing files and bad encodings
/// to their dedicated error variants.
pub(crate) fn read_utf8(path: &std::path::Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CorpusError::not_found(path),
        std::io::ErrorKind::InvalidData => CorpusError::encoding(path),
        _ => CorpusError::Io(e),
    })
}
