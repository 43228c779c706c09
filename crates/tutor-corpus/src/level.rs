//! Difficulty levels shared by users and reference entries.

use serde::{Deserialize, Serialize};

/// Number of difficulty levels (HSK 1 through 7).
pub const LEVEL_COUNT: usize = 7;

/// A difficulty ordinal, always within `Level::MIN..=Level::MAX`.
///
/// Users and corpus entries share the same scale; a user at level `n` is
/// served entries from bucket `n`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u8")]
pub struct Level(u8);

impl Level {
    /// The lowest level, assigned to users on first contact.
    pub const MIN: Self = Self(1);

    /// The highest level.
    #[allow(clippy::cast_possible_truncation)]
    pub const MAX: Self = Self(LEVEL_COUNT as u8);

    /// Creates a level, returning `None` when `value` is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_corpus::Level;
    ///
    /// assert_eq!(Level::new(3).map(Level::get), Some(3));
    /// assert!(Level::new(0).is_none());
    /// assert!(Level::new(8).is_none());
    /// ```
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        if value >= Self::MIN.0 && value <= Self::MAX.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Creates a level from any integer, clamping it into range.
    #[must_use]
    pub fn clamped(value: i64) -> Self {
        let bounded = value.clamp(i64::from(Self::MIN.0), i64::from(Self::MAX.0));
        // In range after the clamp above.
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Self(bounded as u8)
    }

    /// Returns the numeric level.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// Returns the 0-based bucket index for this level.
    #[must_use]
    pub const fn index(self) -> usize {
        (self.0 - 1) as usize
    }

    /// Returns the next level up, saturating at [`Level::MAX`].
    #[must_use]
    pub fn increment(self) -> Self {
        Self::clamped(i64::from(self.0) + 1)
    }

    /// Returns the next level down, saturating at [`Level::MIN`].
    #[must_use]
    pub fn decrement(self) -> Self {
        Self::clamped(i64::from(self.0) - 1)
    }

    /// Interprets a chat message as a direct level assignment.
    ///
    /// Only a message consisting of a single digit `1`..`7` (surrounding
    /// whitespace ignored) qualifies.
    ///
    /// # Examples
    ///
    /// ```
    /// use tutor_corpus::Level;
    ///
    /// assert_eq!(Level::parse_override(" 4 ").map(Level::get), Some(4));
    /// assert!(Level::parse_override("8").is_none());
    /// assert!(Level::parse_override("12").is_none());
    /// assert!(Level::parse_override("level 4").is_none());
    /// ```
    #[must_use]
    pub fn parse_override(message: &str) -> Option<Self> {
        let mut chars = message.trim().chars();
        let digit = chars.next()?.to_digit(10)?;
        if chars.next().is_some() {
            return None;
        }
        u8::try_from(digit).ok().and_then(Self::new)
    }

    /// Iterates over every level from lowest to highest.
    pub fn all() -> impl Iterator<Item = Self> {
        (Self::MIN.0..=Self::MAX.0).map(Self)
    }
}

impl Default for Level {
    fn default() -> Self {
        Self::MIN
    }
}

impl TryFrom<i64> for Level {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u8::try_from(value)
            .ok()
            .and_then(Self::new)
            .ok_or_else(|| format!("level {value} is outside 1..={}", Self::MAX.0))
    }
}

impl From<Level> for u8 {
    fn from(level: Level) -> Self {
        level.0
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
