//! HTTP API for the tutor bots.
//!
//! # Endpoints
//!
//! - `POST /api/bots/:bot` - Answer one conversation turn as a server-sent
//!   event stream (`text`, `suggested_reply`, `meta`, `error`, `done`)
//! - `GET /api/bots` - List bot names
//! - `GET /api/bots/:bot/settings` - Introduction message and model dependencies
//! - `GET /api/status` - Uptime, bots and turn counters
//! - `GET /ws` - Live feed of session events
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tutor_session::{create_router, AppState, BotRegistry, EventBroadcaster};
//!
//! # async fn example() {
//! let state = AppState::new(Arc::new(BotRegistry::new()), EventBroadcaster::default());
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await.unwrap();
//! axum::serve(listener, router).await.unwrap();
//! # }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::bots::{BotRegistry, BotSettings};
use crate::events::{ws_handler, EventBroadcaster, SessionEvent};
use crate::protocol::{BotEvent, QueryRequest, ResponseSink};
use crate::TutorError;

/// Events buffered between a bot and a slow client.
const RESPONSE_BUFFER: usize = 64;

// ============================================================================
// Response Types
// ============================================================================

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

/// Response body for `GET /api/bots`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotsResponse {
    /// Registered bot names.
    pub bots: Vec<String>,
}

/// Turn totals since startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnStats {
    /// Turns accepted.
    pub started: u64,
    /// Turns answered in full.
    pub completed: u64,
    /// Turns that ended with an error event.
    pub failed: u64,
    /// Turns whose client went away.
    pub abandoned: u64,
}

/// Response body for `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// When the server started.
    pub started_at: DateTime<Utc>,
    /// Seconds since startup.
    pub uptime_secs: i64,
    /// Registered bot names.
    pub bots: Vec<String>,
    /// Turn totals.
    pub turns: TurnStats,
    /// Connected event feed clients.
    pub observers: usize,
}

// ============================================================================
// Application State
// ============================================================================

/// Lock-free turn counters.
#[derive(Debug, Default)]
pub struct TurnCounters {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

impl TurnCounters {
    /// Returns the current totals.
    #[must_use]
    pub fn snapshot(&self) -> TurnStats {
        TurnStats {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Bots served by name.
    pub registry: Arc<BotRegistry>,
    /// Session event feed.
    pub broadcaster: EventBroadcaster,
    /// When the server started.
    pub started_at: DateTime<Utc>,
    /// Turn totals.
    pub turns: Arc<TurnCounters>,
}

impl AppState {
    /// Creates state for `registry`, publishing failures on `broadcaster`.
    #[must_use]
    pub fn new(registry: Arc<BotRegistry>, broadcaster: EventBroadcaster) -> Self {
        Self {
            registry,
            broadcaster,
            started_at: Utc::now(),
            turns: Arc::new(TurnCounters::default()),
        }
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Internal error type for API handlers.
#[derive(Debug)]
enum ApiError {
    /// No such bot.
    NotFound(String),
    /// The request cannot be answered.
    BadRequest(String),
}

impl From<TutorError> for ApiError {
    fn from(error: TutorError) -> Self {
        match error {
            TutorError::UnknownBot(_) => Self::NotFound(error.to_string()),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        let body = Json(ErrorResponse { error: message });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all API endpoints.
///
/// Routes live under `/api`, the event feed at `/ws`. CORS allows any
/// origin and every request is traced.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/bots", get(handle_list_bots))
        .route("/bots/:bot", post(handle_query))
        .route("/bots/:bot/settings", get(handle_settings))
        .route("/status", get(handle_status));

    Router::new()
        .nest("/api", api_routes)
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `POST /api/bots/:bot`.
///
/// The bot runs in its own task so a slow client only applies backpressure
/// through the response buffer. Dropping the stream closes the sink, which
/// stops the bot at its next send.
async fn handle_query(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<QueryRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, ApiError> {
    let bot = state.registry.get(&name)?;
    request.validate()?;

    info!(
        bot = %name,
        user_id = %request.user_id,
        conversation_id = %request.conversation_id,
        message_id = ?request.message_id,
        "Turn started"
    );
    state.turns.started.fetch_add(1, Ordering::Relaxed);

    let (sink, receiver) = ResponseSink::channel(RESPONSE_BUFFER);
    tokio::spawn(async move {
        match bot.respond(&request, &sink).await {
            Ok(()) => {
                state.turns.completed.fetch_add(1, Ordering::Relaxed);
                info!(bot = %name, conversation_id = %request.conversation_id, "Turn completed");
            }
            Err(TutorError::ClientDisconnected) => {
                state.turns.abandoned.fetch_add(1, Ordering::Relaxed);
                info!(bot = %name, conversation_id = %request.conversation_id, "Client disconnected");
                return;
            }
            Err(e) => {
                state.turns.failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    bot = %name,
                    conversation_id = %request.conversation_id,
                    transient = e.is_transient(),
                    error = %e,
                    "Turn failed"
                );
                state.broadcaster.send(SessionEvent::turn_failed(
                    &name,
                    &request.conversation_id,
                    e.to_string(),
                ));
                let _ = sink
                    .send(BotEvent::Error {
                        message: e.to_string(),
                        transient: e.is_transient(),
                    })
                    .await;
            }
        }
        let _ = sink.send(BotEvent::Done).await;
    });

    let events = stream::unfold(receiver, |mut receiver| async move {
        receiver.recv().await.map(|event| {
            let sse = Event::default().event(event.event_name()).json_data(&event);
            (sse, receiver)
        })
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

/// Handler for `GET /api/bots`.
async fn handle_list_bots(State(state): State<Arc<AppState>>) -> Json<BotsResponse> {
    Json(BotsResponse {
        bots: state.registry.names(),
    })
}

/// Handler for `GET /api/bots/:bot/settings`.
async fn handle_settings(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<BotSettings>, ApiError> {
    let bot = state.registry.get(&name)?;
    Ok(Json(bot.settings()))
}

/// Handler for `GET /api/status`.
async fn handle_status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        started_at: state.started_at,
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        bots: state.registry.names(),
        turns: state.turns.snapshot(),
        observers: state.broadcaster.receiver_count(),
    })
}

// ============================================================================
// Tests
// ============================================================================
