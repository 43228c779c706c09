//! Request and response shapes exchanged with chat clients.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::{Result, TutorError};

/// Author of a message in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolRole {
    /// Instructions injected by the host.
    System,
    /// The learner.
    User,
    /// A previous bot reply.
    Bot,
}

/// One message of the conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    /// Who wrote the message.
    pub role: ProtocolRole,
    /// Message text.
    pub content: String,
}

impl ProtocolMessage {
    /// Creates a message from the learner.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ProtocolRole::User,
            content: content.into(),
        }
    }

    /// Creates a message from the bot.
    #[must_use]
    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            role: ProtocolRole::Bot,
            content: content.into(),
        }
    }
}

/// A single conversation turn sent to a bot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    /// Conversation history, oldest first. The last message is the one being
    /// answered.
    pub query: Vec<ProtocolMessage>,

    /// Stable identifier of the learner.
    pub user_id: String,

    /// Identifier of this conversation.
    pub conversation_id: String,

    /// Optional identifier of the message being answered, for log correlation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl QueryRequest {
    /// Creates a request with a single learner message.
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            query: vec![ProtocolMessage::user(message)],
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            message_id: None,
        }
    }

    /// Checks that the request can be answered.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::InvalidRequest` for an empty history or blank
    /// identifiers.
    pub fn validate(&self) -> Result<()> {
        if self.query.is_empty() {
            return Err(TutorError::invalid_request("query must contain at least one message"));
        }
        if self.user_id.trim().is_empty() {
            return Err(TutorError::invalid_request("userId must not be empty"));
        }
        if self.conversation_id.trim().is_empty() {
            return Err(TutorError::invalid_request("conversationId must not be empty"));
        }
        Ok(())
    }

    /// Returns the text of the message being answered.
    #[must_use]
    pub fn last_message(&self) -> &str {
        self.query.last().map_or("", |m| m.content.as_str())
    }
}

/// One item of a streamed bot response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BotEvent {
    /// A piece of reply text, appended to what came before.
    Text {
        /// The text chunk.
        text: String,
    },
    /// A reply the client may offer the learner as a one-tap answer.
    SuggestedReply {
        /// The suggested reply.
        text: String,
    },
    /// Display hints for the current reply.
    Meta {
        /// Whether the client should show suggested replies for this reply.
        #[serde(rename = "suggestedReplies")]
        suggested_replies: bool,
    },
    /// The turn failed; persisted state was left as it was.
    Error {
        /// Human-readable description.
        message: String,
        /// Whether retrying the same message may succeed.
        transient: bool,
    },
    /// The reply is complete.
    Done,
}

impl BotEvent {
    /// Returns the event name used on the wire.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::SuggestedReply { .. } => "suggested_reply",
            Self::Meta { .. } => "meta",
            Self::Error { .. } => "error",
            Self::Done => "done",
        }
    }
}

/// Writer half of a streamed response.
///
/// Once the reader is dropped every send fails with
/// [`TutorError::ClientDisconnected`], which bots propagate with `?` so no
/// further state is written for an abandoned turn.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    sender: mpsc::Sender<BotEvent>,
}

impl ResponseSink {
    /// Creates a sink and the receiver that drains it.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BotEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Sends an event to the client.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ClientDisconnected` if the client is gone.
    pub async fn send(&self, event: BotEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| TutorError::ClientDisconnected)
    }

    /// Sends a piece of reply text.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ClientDisconnected` if the client is gone.
    pub async fn text(&self, text: impl Into<String>) -> Result<()> {
        self.send(BotEvent::Text { text: text.into() }).await
    }

    /// Sends a suggested reply.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ClientDisconnected` if the client is gone.
    pub async fn suggest(&self, text: impl Into<String>) -> Result<()> {
        self.send(BotEvent::SuggestedReply { text: text.into() })
            .await
    }

    /// Sends display hints.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ClientDisconnected` if the client is gone.
    pub async fn meta(&self, suggested_replies: bool) -> Result<()> {
        self.send(BotEvent::Meta { suggested_replies }).await
    }

    /// Fails fast if the client already went away.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ClientDisconnected` if the client is gone.
    pub fn ensure_open(&self) -> Result<()> {
        if self.sender.is_closed() {
            return Err(TutorError::ClientDisconnected);
        }
        Ok(())
    }
}
