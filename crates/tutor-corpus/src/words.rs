//! Typed vocabulary records loaded from a CSV word list.
//!
//! The expected header names are `level`, `simplified`, `traditional`,
//! `numerical_pinyin` (or `pinyin`), `translation` and optionally `exclude`
//! (or `excluded`). Other columns are ignored.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{read_utf8, CorpusError, Level, Result, LEVEL_COUNT};

/// Which Chinese script a word is displayed in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptFormat {
    /// Simplified characters (default).
    #[default]
    Simplified,
    /// Traditional characters.
    Traditional,
}

impl ScriptFormat {
    /// Returns the other script.
    #[must_use]
    pub const fn other(self) -> Self {
        match self {
            Self::Simplified => Self::Traditional,
            Self::Traditional => Self::Simplified,
        }
    }
}

impl std::fmt::Display for ScriptFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simplified => write!(f, "simplified"),
            Self::Traditional => write!(f, "traditional"),
        }
    }
}

/// A single vocabulary word.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordRecord {
    /// Difficulty level of the word.
    pub level: Level,

    /// Simplified form.
    pub simplified: String,

    /// Traditional form.
    pub traditional: String,

    /// Reference pinyin with numbered tones, e.g. `mo4 shou1`.
    pub pinyin: String,

    /// Reference meanings.
    pub translation: String,

    /// Whether the word is withheld from sampling.
    #[serde(default)]
    pub excluded: bool,
}

impl WordRecord {
    /// Returns the word written in `format`.
    #[must_use]
    pub fn display(&self, format: ScriptFormat) -> &str {
        match format {
            ScriptFormat::Simplified => &self.simplified,
            ScriptFormat::Traditional => &self.traditional,
        }
    }

    /// Returns `true` if the simplified and traditional forms differ.
    #[must_use]
    pub fn has_variant(&self) -> bool {
        self.simplified != self.traditional
    }
}

/// Raw CSV row before level validation.
#[derive(Debug, Deserialize)]
struct WordRow {
    level: i64,
    simplified: String,
    traditional: String,
    #[serde(default)]
    numerical_pinyin: Option<String>,
    #[serde(default)]
    pinyin: Option<String>,
    translation: String,
    #[serde(default, alias = "exclude", deserialize_with = "deserialize_flag")]
    excluded: bool,
}

/// Accepts `true/false`, `1/0` and `yes/no` in any case; empty means `false`.
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_lowercase().as_str() {
        "" | "false" | "0" | "no" => Ok(false),
        "true" | "1" | "yes" => Ok(true),
        other => Err(serde::de::Error::custom(format!(
            "invalid flag '{other}': expected true/false, 1/0 or yes/no"
        ))),
    }
}

impl WordRow {
    fn into_record(self, row: usize) -> Result<WordRecord> {
        let level = u8::try_from(self.level)
            .ok()
            .and_then(Level::new)
            .ok_or(CorpusError::WordLevel {
                row,
                level: self.level,
            })?;

        let pinyin = self
            .numerical_pinyin
            .or(self.pinyin)
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| CorpusError::word_row(row, "missing pinyin"))?;

        Ok(WordRecord {
            level,
            simplified: self.simplified,
            traditional: self.traditional,
            pinyin,
            translation: self.translation,
            excluded: self.excluded,
        })
    }
}

/// Vocabulary grouped by level, with excluded words removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WordList {
    levels: Vec<Vec<WordRecord>>,
    excluded: usize,
}

impl Default for WordList {
    fn default() -> Self {
        Self {
            levels: vec![Vec::new(); LEVEL_COUNT],
            excluded: 0,
        }
    }
}

impl WordList {
    /// Loads a CSV word list from disk.
    ///
    /// # Errors
    ///
    /// Returns `CorpusError::NotFound` if the file doesn't exist,
    /// `CorpusError::Encoding` if it is not UTF-8, and any error from
    /// [`WordList::from_reader`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = read_utf8(path.as_ref())?;
        Self::from_reader(content.as_bytes())
    }

    /// Reads a CSV word list with a header row.
    ///
    /// # Errors
    ///
    /// Returns `CorpusError::WordRow` for a row that cannot be decoded and
    /// `CorpusError::WordLevel` for a row whose level is outside `1..=7`.
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut list = Self::default();
        for (index, row) in csv_reader.deserialize::<WordRow>().enumerate() {
            let row_number = index + 1;
            let record = row
                .map_err(|e| CorpusError::word_row(row_number, e.to_string()))?
                .into_record(row_number)?;
            list.push(record);
        }

        Ok(list)
    }

    /// Builds a list from records already in memory.
    #[must_use]
    pub fn from_records(records: impl IntoIterator<Item = WordRecord>) -> Self {
        let mut list = Self::default();
        for record in records {
            list.push(record);
        }
        list
    }

    fn push(&mut self, record: WordRecord) {
        if record.excluded {
            self.excluded += 1;
            return;
        }
        if let Some(bucket) = self.levels.get_mut(record.level.index()) {
            bucket.push(record);
        }
    }

    /// Returns the words available for sampling at `level`.
    #[must_use]
    pub fn level(&self, level: Level) -> &[WordRecord] {
        self.levels
            .get(level.index())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Returns the number of words available for sampling.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Returns `true` if no word is available for sampling.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns how many rows were dropped because they were excluded.
    #[must_use]
    pub const fn excluded_count(&self) -> usize {
        self.excluded
    }
}
