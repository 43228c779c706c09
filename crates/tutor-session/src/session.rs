//! Conversation lifecycle shared by the tutor bots.
//!
//! Each conversation moves through three states, recorded only in the store:
//!
//! | State | Problem key | Submitted key | Action |
//! | --- | --- | --- | --- |
//! | no problem | absent | absent | sample and emit a new problem |
//! | awaiting submission | present | absent | forward the reply to the judge |
//! | submitted | present | present | forward to free-form dialogue |
//!
//! A user's level lives under a per-user key shared by all of that user's
//! conversations with the same bot.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use tutor_corpus::{Entry, Level, ScriptFormat, SentenceCorpus, WordList, WordRecord};

use crate::events::{EventBroadcaster, SessionEvent};
use crate::store::KeyValueStore;
use crate::verdict::Verdict;
use crate::{Result, TutorError};

// ============================================================================
// Problem sources
// ============================================================================

/// Level-bucketed reference material problems are sampled from.
pub trait ProblemSource: Send + Sync + 'static {
    /// What a single problem looks like once stored.
    type Problem: Clone + Serialize + DeserializeOwned + Send + Sync;

    /// Returns the candidates for `level`, or `None` if the level was never
    /// loaded.
    fn bucket(&self, level: Level) -> Option<&[Self::Problem]>;
}

impl ProblemSource for SentenceCorpus {
    type Problem = Entry;

    fn bucket(&self, level: Level) -> Option<&[Entry]> {
        self.level(level)
    }
}

impl ProblemSource for WordList {
    type Problem = WordRecord;

    fn bucket(&self, level: Level) -> Option<&[WordRecord]> {
        Some(self.level(level))
    }
}

// ============================================================================
// Turn types
// ============================================================================

/// A problem as cached for a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedProblem<P> {
    /// The sampled entry, stored verbatim.
    pub problem: P,
    /// Level bucket it was drawn from.
    pub level: Level,
    /// When it was issued.
    pub issued_at: DateTime<Utc>,
}

/// What a bot should do with the current message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnAction<P> {
    /// A problem was just sampled and stored; present it.
    EmitNewProblem(IssuedProblem<P>),
    /// The message is a submission for the stored problem.
    ForwardToJudge(IssuedProblem<P>),
    /// The problem was already judged; continue the conversation.
    ForwardToFreeform(IssuedProblem<P>),
}

impl<P> TurnAction<P> {
    /// Returns the problem the action concerns.
    #[must_use]
    pub const fn problem(&self) -> &IssuedProblem<P> {
        match self {
            Self::EmitNewProblem(p) | Self::ForwardToJudge(p) | Self::ForwardToFreeform(p) => p,
        }
    }

    /// Returns a short name for logging.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::EmitNewProblem(_) => "emit_new_problem",
            Self::ForwardToJudge(_) => "forward_to_judge",
            Self::ForwardToFreeform(_) => "forward_to_freeform",
        }
    }
}

/// Outcome of [`SessionManager::begin_turn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn<P> {
    /// The user's level after any override.
    pub level: Level,
    /// Level set by this message, if it was an override.
    pub overridden: Option<Level>,
    /// Whether this message cleared an existing problem.
    pub reset: bool,
    /// What to do next.
    pub action: TurnAction<P>,
}

/// Messages that end the current problem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecyclePhrases {
    /// Gives up on the current problem.
    pub skip: String,
    /// Asks for a new problem after discussing the current one.
    pub next: String,
}

impl LifecyclePhrases {
    /// Phrases used by the sentence translation bot.
    #[must_use]
    pub fn sentence() -> Self {
        Self {
            skip: "I will pass this sentence.".to_string(),
            next: "I want another sentence.".to_string(),
        }
    }

    /// Phrases used by the vocabulary bot.
    #[must_use]
    pub fn vocabulary() -> Self {
        Self {
            skip: "I will pass this word.".to_string(),
            next: "I want another word.".to_string(),
        }
    }

    /// Returns `true` if `message` is exactly one of the phrases, ignoring
    /// surrounding whitespace.
    #[must_use]
    pub fn is_reset(&self, message: &str) -> bool {
        let message = message.trim();
        message == self.skip || message == self.next
    }
}

// ============================================================================
// Session manager
// ============================================================================

/// Drives the per-conversation lifecycle against a key-value store.
///
/// Nothing is cached between calls; every decision re-reads the store.
pub struct SessionManager<S: ProblemSource> {
    bot: String,
    key_prefix: String,
    phrases: LifecyclePhrases,
    source: Arc<S>,
    store: Arc<dyn KeyValueStore>,
    rng: Mutex<StdRng>,
    events: Option<EventBroadcaster>,
}

impl<S: ProblemSource> std::fmt::Debug for SessionManager<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("bot", &self.bot)
            .field("key_prefix", &self.key_prefix)
            .field("phrases", &self.phrases)
            .finish_non_exhaustive()
    }
}

impl<S: ProblemSource> SessionManager<S> {
    /// Creates a manager for `bot`, storing state under `key_prefix`.
    #[must_use]
    pub fn new(
        bot: impl Into<String>,
        key_prefix: impl Into<String>,
        phrases: LifecyclePhrases,
        source: Arc<S>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            bot: bot.into(),
            key_prefix: key_prefix.into(),
            phrases,
            source,
            store,
            rng: Mutex::new(StdRng::from_entropy()),
            events: None,
        }
    }

    /// Makes sampling deterministic.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// Publishes lifecycle transitions on `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventBroadcaster) -> Self {
        self.events = Some(events);
        self
    }

    /// Returns the bot name used in events.
    #[must_use]
    pub fn bot(&self) -> &str {
        &self.bot
    }

    /// Returns the reset phrases.
    #[must_use]
    pub const fn phrases(&self) -> &LifecyclePhrases {
        &self.phrases
    }

    /// Returns the problem source.
    #[must_use]
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Store key of a user's level.
    #[must_use]
    pub fn level_key(&self, user_id: &str) -> String {
        format!("{}-level-{user_id}", self.key_prefix)
    }

    /// Store key of a user's script preference.
    #[must_use]
    pub fn format_key(&self, user_id: &str) -> String {
        format!("{}-format-{user_id}", self.key_prefix)
    }

    /// Store key of a conversation's problem.
    #[must_use]
    pub fn problem_key(&self, conversation_id: &str) -> String {
        format!("{}-problem-{conversation_id}", self.key_prefix)
    }

    /// Store key of a conversation's submitted flag.
    #[must_use]
    pub fn submitted_key(&self, conversation_id: &str) -> String {
        format!("{}-submitted-{conversation_id}", self.key_prefix)
    }

    fn publish(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }

    /// Decides what to do with `message`, updating the store as needed.
    ///
    /// The target level is an override carried by `message`, else the
    /// stored level (1 on first contact). A skip/next phrase discards the
    /// open problem, and the remaining state selects the action. Any new
    /// problem is sampled before the store is touched; the override, reset
    /// and problem writes follow in that order.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::EmptyLevel` if a problem is needed but the
    /// target level has no entries, or any store error. A turn that fails
    /// with `EmptyLevel` leaves the store unchanged.
    pub async fn begin_turn(
        &self,
        user_id: &str,
        conversation_id: &str,
        message: &str,
    ) -> Result<Turn<S::Problem>> {
        let overridden = Level::parse_override(message);
        let (stored_level, persisted) = self.read_level(user_id).await?;
        let level = overridden.unwrap_or(stored_level);
        let wants_reset = self.phrases.is_reset(message);

        let open = if wants_reset {
            None
        } else {
            self.stored_problem(conversation_id).await?
        };
        let action = match open {
            None => TurnAction::EmitNewProblem(IssuedProblem {
                problem: self.sample(level)?,
                level,
                issued_at: Utc::now(),
            }),
            Some(issued) => {
                if self.is_submitted(conversation_id).await? {
                    TurnAction::ForwardToFreeform(issued)
                } else {
                    TurnAction::ForwardToJudge(issued)
                }
            }
        };

        if let Some(level) = overridden {
            self.set_user_level(user_id, level).await?;
            info!(bot = %self.bot, user_id, level = %level, "Level overridden");
            self.publish(SessionEvent::level_overridden(&self.bot, user_id, level));
        } else if !persisted {
            self.set_user_level(user_id, level).await?;
        }

        let reset = wants_reset && self.reset(conversation_id).await?;

        if let TurnAction::EmitNewProblem(issued) = &action {
            self.store
                .set(&self.problem_key(conversation_id), serde_json::to_value(issued)?)
                .await?;
            info!(bot = %self.bot, user_id, conversation_id, level = %level, "Problem issued");
            self.publish(SessionEvent::problem_issued(
                &self.bot,
                user_id,
                conversation_id,
                level,
            ));
        }

        debug!(
            bot = %self.bot,
            conversation_id,
            action = action.name(),
            "Turn decided"
        );

        Ok(Turn {
            level,
            overridden,
            reset,
            action,
        })
    }

    /// Records a judged submission and adjusts the user's level.
    ///
    /// `level` is the level the turn started at. Returns the new level.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn record_verdict(
        &self,
        user_id: &str,
        conversation_id: &str,
        level: Level,
        verdict: Verdict,
    ) -> Result<Level> {
        let new_level = match verdict {
            Verdict::Pass => level.increment(),
            Verdict::Partial => level,
            Verdict::Fail => level.decrement(),
        };

        self.store
            .set(&self.submitted_key(conversation_id), Value::Bool(true))
            .await?;
        self.set_user_level(user_id, new_level).await?;

        info!(
            bot = %self.bot,
            user_id,
            conversation_id,
            verdict = %verdict,
            previous_level = %level,
            level = %new_level,
            "Submission judged"
        );
        self.publish(SessionEvent::submission_judged(
            &self.bot,
            user_id,
            conversation_id,
            verdict,
            level,
            new_level,
        ));

        Ok(new_level)
    }

    /// Clears a conversation's problem and submitted flag.
    ///
    /// Returns `true` if a problem was stored. Resetting a conversation
    /// without a problem leaves the store untouched.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn reset(&self, conversation_id: &str) -> Result<bool> {
        let problem_key = self.problem_key(conversation_id);
        let submitted_key = self.submitted_key(conversation_id);

        let had_problem = self.store.get(&problem_key).await?.is_some();
        let had_flag = self.store.get(&submitted_key).await?.is_some();
        if !had_problem && !had_flag {
            debug!(bot = %self.bot, conversation_id, "Reset with nothing stored");
            return Ok(false);
        }

        self.store.delete(&problem_key).await?;
        self.store.delete(&submitted_key).await?;

        info!(bot = %self.bot, conversation_id, "Conversation reset");
        self.publish(SessionEvent::conversation_reset(&self.bot, conversation_id));
        Ok(had_problem)
    }

    /// Returns a user's level, storing the default on first contact.
    ///
    /// Stored values outside `1..=7` are clamped.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn user_level(&self, user_id: &str) -> Result<Level> {
        let (level, persisted) = self.read_level(user_id).await?;
        if !persisted {
            self.set_user_level(user_id, level).await?;
        }
        Ok(level)
    }

    /// Reads a user's level without writing it back.
    ///
    /// The flag is `false` when nothing usable is stored and the default
    /// still has to be written.
    async fn read_level(&self, user_id: &str) -> Result<(Level, bool)> {
        match self.store.get(&self.level_key(user_id)).await? {
            Some(value) => {
                if let Some(raw) = value.as_i64() {
                    return Ok((Level::clamped(raw), true));
                }
                warn!(bot = %self.bot, user_id, value = %value, "Ignoring non-integer level");
            }
            None => debug!(bot = %self.bot, user_id, "First contact, starting at level 1"),
        }
        Ok((Level::MIN, false))
    }

    /// Stores a user's level.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn set_user_level(&self, user_id: &str, level: Level) -> Result<()> {
        self.store
            .set(&self.level_key(user_id), Value::from(level.get()))
            .await
    }

    /// Returns a user's script preference, storing the default on first use.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn user_format(&self, user_id: &str) -> Result<ScriptFormat> {
        let key = self.format_key(user_id);
        if let Some(value) = self.store.get(&key).await? {
            match serde_json::from_value(value) {
                Ok(format) => return Ok(format),
                Err(e) => warn!(bot = %self.bot, user_id, error = %e, "Ignoring invalid format"),
            }
        }

        let format = ScriptFormat::default();
        self.set_user_format(user_id, format).await?;
        Ok(format)
    }

    /// Stores a user's script preference.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn set_user_format(&self, user_id: &str, format: ScriptFormat) -> Result<()> {
        self.store
            .set(&self.format_key(user_id), serde_json::to_value(format)?)
            .await?;
        info!(bot = %self.bot, user_id, format = %format, "Script format set");
        Ok(())
    }

    /// Returns the problem stored for a conversation.
    ///
    /// # Errors
    ///
    /// Returns any store error, or `TutorError::Json` if the stored value
    /// cannot be decoded.
    pub async fn stored_problem(
        &self,
        conversation_id: &str,
    ) -> Result<Option<IssuedProblem<S::Problem>>> {
        self.store
            .get(&self.problem_key(conversation_id))
            .await?
            .map(serde_json::from_value)
            .transpose()
            .map_err(TutorError::from)
    }

    /// Returns whether a conversation's problem was already judged.
    ///
    /// # Errors
    ///
    /// Returns any store error.
    pub async fn is_submitted(&self, conversation_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get(&self.submitted_key(conversation_id))
            .await?
            .is_some())
    }

    fn sample(&self, level: Level) -> Result<S::Problem> {
        let bucket = self
            .source
            .bucket(level)
            .ok_or(TutorError::EmptyLevel { level })?;
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        bucket
            .choose(&mut *rng)
            .cloned()
            .ok_or(TutorError::EmptyLevel { level })
    }
}
