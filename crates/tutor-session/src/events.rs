//! Session event types and broadcasting for live observation.
//!
//! Every lifecycle transition the session manager performs is published as a
//! [`SessionEvent`]. Operators can watch them over the `/ws` WebSocket feed.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, lists the served bots
//! - `problem_issued` - A new entry was sampled for a conversation
//! - `submission_judged` - A judged exchange completed and the level moved
//! - `conversation_reset` - A skip or next phrase cleared a conversation
//! - `level_overridden` - A user set their level directly
//! - `turn_failed` - A turn ended with an error
//!
//! # Example
//!
//! ```no_run
//! use tutor_session::events::{EventBroadcaster, SessionEvent};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(SessionEvent::conversation_reset("ChineseStatement", "c1"));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};
use tutor_corpus::Level;

use crate::api::AppState;
use crate::verdict::Verdict;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    /// Names of the bots this server answers for.
    pub bots: Vec<String>,
    /// When the server started.
    pub started_at: DateTime<Utc>,
}

/// Payload for the `problem_issued` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemIssuedPayload {
    /// The bot that issued the problem.
    pub bot: String,
    /// The user the problem was issued to.
    pub user_id: String,
    /// The conversation now holding the problem.
    pub conversation_id: String,
    /// Level bucket the problem was sampled from.
    pub level: Level,
}

/// Payload for the `submission_judged` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionJudgedPayload {
    /// The bot that judged the submission.
    pub bot: String,
    /// The submitting user.
    pub user_id: String,
    /// The conversation the submission belongs to.
    pub conversation_id: String,
    /// Classified outcome.
    pub verdict: Verdict,
    /// Level before the adjustment.
    pub previous_level: Level,
    /// Level after the adjustment.
    pub level: Level,
}

/// Payload for the `conversation_reset` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResetPayload {
    /// The bot owning the conversation.
    pub bot: String,
    /// The conversation that was cleared.
    pub conversation_id: String,
}

/// Payload for the `level_overridden` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LevelOverriddenPayload {
    /// The bot that received the override.
    pub bot: String,
    /// The user whose level changed.
    pub user_id: String,
    /// The level now stored.
    pub level: Level,
}

/// Payload for the `turn_failed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnFailedPayload {
    /// The bot whose turn failed.
    pub bot: String,
    /// The conversation the turn belonged to.
    pub conversation_id: String,
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// Session events published to observers.
///
/// All events are serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum SessionEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// Sent when a problem is sampled for a conversation.
    ProblemIssued(ProblemIssuedPayload),
    /// Sent when a judged exchange completes.
    SubmissionJudged(SubmissionJudgedPayload),
    /// Sent when a conversation is cleared.
    ConversationReset(ConversationResetPayload),
    /// Sent when a user sets their level directly.
    LevelOverridden(LevelOverriddenPayload),
    /// Sent when a turn ends with an error.
    TurnFailed(TurnFailedPayload),
}

impl SessionEvent {
    /// Creates a `Connected` event.
    #[must_use]
    pub const fn connected(bots: Vec<String>, started_at: DateTime<Utc>) -> Self {
        Self::Connected(ConnectedPayload { bots, started_at })
    }

    /// Creates a `ProblemIssued` event.
    #[must_use]
    pub fn problem_issued(
        bot: impl Into<String>,
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        level: Level,
    ) -> Self {
        Self::ProblemIssued(ProblemIssuedPayload {
            bot: bot.into(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            level,
        })
    }

    /// Creates a `SubmissionJudged` event.
    #[must_use]
    pub fn submission_judged(
        bot: impl Into<String>,
        user_id: impl Into<String>,
        conversation_id: impl Into<String>,
        verdict: Verdict,
        previous_level: Level,
        level: Level,
    ) -> Self {
        Self::SubmissionJudged(SubmissionJudgedPayload {
            bot: bot.into(),
            user_id: user_id.into(),
            conversation_id: conversation_id.into(),
            verdict,
            previous_level,
            level,
        })
    }

    /// Creates a `ConversationReset` event.
    #[must_use]
    pub fn conversation_reset(bot: impl Into<String>, conversation_id: impl Into<String>) -> Self {
        Self::ConversationReset(ConversationResetPayload {
            bot: bot.into(),
            conversation_id: conversation_id.into(),
        })
    }

    /// Creates a `LevelOverridden` event.
    #[must_use]
    pub fn level_overridden(
        bot: impl Into<String>,
        user_id: impl Into<String>,
        level: Level,
    ) -> Self {
        Self::LevelOverridden(LevelOverriddenPayload {
            bot: bot.into(),
            user_id: user_id.into(),
            level,
        })
    }

    /// Creates a `TurnFailed` event.
    #[must_use]
    pub fn turn_failed(
        bot: impl Into<String>,
        conversation_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::TurnFailed(TurnFailedPayload {
            bot: bot.into(),
            conversation_id: conversation_id.into(),
            message: message.into(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::ProblemIssued(_) => "problem_issued",
            Self::SubmissionJudged(_) => "submission_judged",
            Self::ConversationReset(_) => "conversation_reset",
            Self::LevelOverridden(_) => "level_overridden",
            Self::TurnFailed(_) => "turn_failed",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts session events to all subscribers.
///
/// Events are not persisted for disconnected clients.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBroadcaster {
    /// Creates a new `EventBroadcaster` with the specified buffer capacity.
    ///
    /// A subscriber that falls more than `capacity` events behind misses the
    /// oldest ones.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber for receiving events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event, returning how many subscribers will receive it.
    pub fn send(&self, event: SessionEvent) -> usize {
        // Err only means nobody is listening.
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Seconds between heartbeat pings.
const HEARTBEAT_SECS: u64 = 30;

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// WebSocket upgrade handler for `GET /ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("New WebSocket connection request");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handles a single WebSocket connection.
///
/// - Sends `connected` immediately
/// - Forwards every broadcast event to the client
/// - Sends heartbeat pings every 30 seconds
/// - Closes the connection after 3 missed pongs
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before greeting so no event slips between the two.
    let mut event_receiver = state.broadcaster.subscribe();

    let connected_event = SessionEvent::connected(state.registry.names(), state.started_at);
    let connected_json = match serde_json::to_string(&connected_event) {
        Ok(json) => json,
        Err(e) => {
            warn!("Failed to serialize connected event: {}", e);
            return;
        }
    };

    if sender.send(Message::Text(connected_json)).await.is_err() {
        debug!("Client disconnected before receiving connected event");
        return;
    }

    info!("WebSocket client connected");

    let mut heartbeat_interval = interval(Duration::from_secs(HEARTBEAT_SECS));
    // The first tick completes immediately.
    heartbeat_interval.tick().await;
    let mut missed_pongs = 0u8;

    loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Pong(_))) => {
                        missed_pongs = 0;
                        debug!("Received pong from client");
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Client requested close");
                        break;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            debug!("Failed to send pong, client disconnected");
                            break;
                        }
                    }
                    Some(Ok(Message::Text(_) | Message::Binary(_))) => {
                        debug!("Ignoring data message from client");
                    }
                    Some(Err(e)) => {
                        debug!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        debug!("WebSocket stream ended");
                        break;
                    }
                }
            }

            event = event_receiver.recv() => {
                match event {
                    Ok(session_event) => {
                        let json = match serde_json::to_string(&session_event) {
                            Ok(j) => j,
                            Err(e) => {
                                warn!("Failed to serialize event: {}", e);
                                continue;
                            }
                        };

                        if sender.send(Message::Text(json)).await.is_err() {
                            debug!("Failed to send event, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Client lagged, missed {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        info!("Broadcaster closed");
                        break;
                    }
                }
            }

            _ = heartbeat_interval.tick() => {
                if sender.send(Message::Ping(vec![])).await.is_err() {
                    debug!("Failed to send ping, client disconnected");
                    break;
                }
                missed_pongs += 1;
                if missed_pongs >= MAX_MISSED_PONGS {
                    info!("Client missed {} pongs, closing connection", MAX_MISSED_PONGS);
                    break;
                }
            }
        }
    }

    info!("WebSocket client disconnected");
}

// ============================================================================
// Tests
// ============================================================================
