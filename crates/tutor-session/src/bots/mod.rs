//! Tutor bots and the registry that serves them.
//!
//! A bot turns one [`QueryRequest`] into a stream of [`BotEvent`]s written to
//! a [`ResponseSink`]. Both tutors delegate the conversation lifecycle to a
//! [`SessionManager`](crate::session::SessionManager) and only decide what to
//! say in each state.
//!
//! [`BotEvent`]: crate::protocol::BotEvent

pub mod prompts;
mod statement;
mod vocab;

pub use statement::StatementBot;
pub use vocab::VocabBot;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::model::ChatMessage;
use crate::protocol::{ProtocolMessage, QueryRequest, ResponseSink};
use crate::{Result, TutorError};

/// A chat bot served over the API.
#[async_trait]
pub trait Bot: Send + Sync {
    /// Name the bot is addressed by.
    fn name(&self) -> &str;

    /// Static settings advertised to clients.
    fn settings(&self) -> BotSettings;

    /// Answers the last message of `request`.
    ///
    /// On error nothing further is persisted for this turn; the caller
    /// reports the error to the client.
    async fn respond(&self, request: &QueryRequest, sink: &ResponseSink) -> Result<()>;
}

/// Settings a client fetches before the first turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotSettings {
    /// Shown before the conversation starts.
    pub introduction_message: String,

    /// Upstream models called per turn, by name.
    pub server_bot_dependencies: BTreeMap<String, u32>,
}

impl BotSettings {
    /// Creates settings with no dependencies.
    #[must_use]
    pub fn new(introduction_message: impl Into<String>) -> Self {
        Self {
            introduction_message: introduction_message.into(),
            server_bot_dependencies: BTreeMap::new(),
        }
    }

    /// Counts one more call to `model`.
    #[must_use]
    pub fn depends_on(mut self, model: &str) -> Self {
        *self
            .server_bot_dependencies
            .entry(model.to_string())
            .or_insert(0) += 1;
        self
    }
}

/// Bots by name.
#[derive(Default, Clone)]
pub struct BotRegistry {
    bots: BTreeMap<String, Arc<dyn Bot>>,
}

impl std::fmt::Debug for BotRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotRegistry")
            .field("bots", &self.names())
            .finish()
    }
}

impl BotRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a bot, returning any bot previously registered under its name.
    pub fn register(&mut self, bot: Arc<dyn Bot>) -> Option<Arc<dyn Bot>> {
        self.bots.insert(bot.name().to_string(), bot)
    }

    /// Looks up a bot by name.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::UnknownBot` if no bot has that name.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Bot>> {
        self.bots
            .get(name)
            .cloned()
            .ok_or_else(|| TutorError::UnknownBot(name.to_string()))
    }

    /// Returns the registered names in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.bots.keys().cloned().collect()
    }

    /// Returns the number of registered bots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bots.len()
    }

    /// Returns `true` if no bot is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }
}

/// Logit bias applied to grading calls. Discourages the tokens for "If" and
/// " |\n\n".
pub(crate) fn grading_logit_bias() -> BTreeMap<String, i32> {
    BTreeMap::from([("2746".to_string(), -5), ("36821".to_string(), -10)])
}

/// Prepends `prompt` to the client's conversation history.
pub(crate) fn with_history(mut prompt: Vec<ChatMessage>, query: &[ProtocolMessage]) -> Vec<ChatMessage> {
    prompt.extend(query.iter().map(ChatMessage::from));
    prompt
}
