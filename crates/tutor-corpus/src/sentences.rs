//! Segmentation of a flat reference text into leveled sentences.
//!
//! The reference file is a grammar outline: level markers (`A.1 `, `A.2 `, ...)
//! open a bucket, dotted headers (`A.1.2.3 ...`) nest by the number of dots,
//! and `【...】` / `（...）` lines annotate the headers above them. Every other
//! line is a candidate sentence. Accepted sentences keep a snapshot of the
//! headers and annotations active when they were read.

use std::collections::BTreeMap;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::{read_utf8, CorpusError, Level, Result};

/// Longest accepted sentence, in characters.
pub const MAX_ENTRY_CHARS: usize = 50;

/// Start of a level bucket, e.g. `A.1 一级语法`.
const LEVEL_MARKER_PATTERN: &str = r"^A\.\d\s";

/// Substring identifying a hierarchical header line.
const HEADER_MARKER: &str = "A.";

/// Each occurrence in a header line adds one level of nesting.
const DEPTH_DELIMITER: char = '.';

const BRACKET_ANNOTATION: char = '【';
const PAREN_ANNOTATION: char = '（';

/// A sentence must end (or at least contain) one of these.
const SENTENCE_TERMINALS: [char; 2] = ['。', '？'];

/// Dialogue role labels; lines carrying them are exchanges, not sentences.
const ROLE_LABELS: [char; 2] = ['甲', '乙'];

/// A reference sentence with the section headers that enclosed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// The sentence itself, trimmed.
    pub text: String,

    /// Active headers at the point the sentence was read: dotted headers by
    /// ascending depth, then the bracket annotation, then the parenthesis
    /// annotation.
    pub context: Vec<String>,
}

impl Entry {
    /// Creates a new `Entry`.
    #[must_use]
    pub fn new(text: impl Into<String>, context: Vec<String>) -> Self {
        Self {
            text: text.into(),
            context,
        }
    }
}

/// The headers currently in effect while scanning.
///
/// Setting a header at depth `d` evicts every header deeper than `d` together
/// with both annotation slots. A bracket annotation evicts the parenthesis
/// annotation.
#[derive(Debug, Default)]
struct ContextStack {
    headers: BTreeMap<usize, String>,
    bracket: Option<String>,
    paren: Option<String>,
}

impl ContextStack {
    fn set_header(&mut self, depth: usize, line: &str) {
        drop(self.headers.split_off(&depth.saturating_add(1)));
        self.headers.insert(depth, line.to_string());
        self.bracket = None;
        self.paren = None;
    }

    fn set_bracket(&mut self, line: &str) {
        self.bracket = Some(line.to_string());
        self.paren = None;
    }

    fn set_paren(&mut self, line: &str) {
        self.paren = Some(line.to_string());
    }

    fn snapshot(&self) -> Vec<String> {
        self.headers
            .values()
            .chain(self.bracket.iter())
            .chain(self.paren.iter())
            .cloned()
            .collect()
    }
}

/// How a single trimmed line affects the scan.
#[derive(Debug, PartialEq, Eq)]
enum LineKind {
    LevelMarker,
    Blank,
    Header { depth: usize },
    Bracket,
    Paren,
    Candidate,
}

fn classify(line: &str, level_marker: &Regex) -> LineKind {
    if level_marker.is_match(line) {
        LineKind::LevelMarker
    } else if line.is_empty() {
        LineKind::Blank
    } else if line.contains(HEADER_MARKER) {
        LineKind::Header {
            depth: line.matches(DEPTH_DELIMITER).count(),
        }
    } else if line.contains(BRACKET_ANNOTATION) {
        LineKind::Bracket
    } else if line.contains(PAREN_ANNOTATION) {
        LineKind::Paren
    } else {
        LineKind::Candidate
    }
}

/// Returns `true` if a candidate line qualifies as a standalone sentence.
///
/// A sentence contains a terminal mark, carries no dialogue role label and no
/// slash, and is at most [`MAX_ENTRY_CHARS`] characters long.
#[must_use]
pub fn is_sentence(line: &str) -> bool {
    line.contains(SENTENCE_TERMINALS)
        && !line.contains(ROLE_LABELS)
        && !line.contains('/')
        && line.chars().count() <= MAX_ENTRY_CHARS
}

/// Sentences grouped into level buckets.
///
/// Bucket `i` holds the sentences read after the `i + 1`-th level marker.
/// Buckets with no accepted sentence are kept so that level numbers map to
/// bucket positions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SentenceCorpus {
    levels: Vec<Vec<Entry>>,
}

impl SentenceCorpus {
    /// Loads and segments a reference file.
    ///
    /// # Errors
    ///
    /// Returns `CorpusError::NotFound` if the file doesn't exist,
    /// `CorpusError::Encoding` if it is not UTF-8, and any error from
    /// [`SentenceCorpus::parse`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_utf8(path.as_ref())?;
        Self::parse(&content)
    }

    /// Segments reference text already held in memory.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_lines(text.lines())
    }

    /// Segments a sequence of raw lines in a single forward pass.
    ///
    /// # Errors
    ///
    /// Returns `CorpusError::EntryBeforeLevelMarker` if a sentence appears
    /// before the first level marker.
    pub fn from_lines<I, S>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let level_marker = Regex::new(LEVEL_MARKER_PATTERN)?;
        let mut levels: Vec<Vec<Entry>> = Vec::new();
        let mut context = ContextStack::default();

        for (index, raw) in lines.into_iter().enumerate() {
            let line = raw.as_ref().trim();
            match classify(line, &level_marker) {
                LineKind::LevelMarker => levels.push(Vec::new()),
                LineKind::Blank => {}
                LineKind::Header { depth } => context.set_header(depth, line),
                LineKind::Bracket => context.set_bracket(line),
                LineKind::Paren => context.set_paren(line),
                LineKind::Candidate => {
                    if !is_sentence(line) {
                        continue;
                    }
                    let Some(bucket) = levels.last_mut() else {
                        return Err(CorpusError::EntryBeforeLevelMarker {
                            line_number: index + 1,
                            line: line.to_string(),
                        });
                    };
                    bucket.push(Entry::new(line, context.snapshot()));
                }
            }
        }

        Ok(Self { levels })
    }

    /// Returns the sentences of `level`, or `None` if the file had fewer
    /// level markers than that.
    #[must_use]
    pub fn level(&self, level: Level) -> Option<&[Entry]> {
        self.levels.get(level.index()).map(Vec::as_slice)
    }

    /// Returns every bucket in level order.
    #[must_use]
    pub fn levels(&self) -> &[Vec<Entry>] {
        &self.levels
    }

    /// Returns the 1-based numbers of levels whose marker is present but
    /// that hold no sentences.
    pub fn empty_levels(&self) -> impl Iterator<Item = usize> + '_ {
        self.levels
            .iter()
            .enumerate()
            .filter(|(_, bucket)| bucket.is_empty())
            .map(|(index, _)| index + 1)
    }

    /// Returns the number of level markers seen.
    #[must_use]
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Returns the total number of accepted sentences.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }
}
