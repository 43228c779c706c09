//! Integration tests for the live session event feed.
//!
//! Turns are posted over HTTP while WebSocket clients watch `/ws`, checking
//! that every lifecycle transition reaches observers in order.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;
use tutor_corpus::{Level, SentenceCorpus};
use tutor_session::testing::ScriptedModel;
use tutor_session::{
    create_router, AppState, BotRegistry, EventBroadcaster, MemoryStore, SessionEvent,
    StatementBot, StatementConfig, Verdict,
};

const JUDGE: &str = "Claude-3.5-Sonnet";

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A running tutor with a scripted model behind it.
struct TestServer {
    base_url: String,
    ws_url: String,
    model: Arc<ScriptedModel>,
    http: reqwest::Client,
    _handle: tokio::task::JoinHandle<()>,
}

/// Spawns the test server wired to its own broadcaster.
async fn spawn_test_server() -> TestServer {
    let corpus_path =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/chinese_sentences.txt");
    let corpus = SentenceCorpus::load(corpus_path).expect("Failed to load sentence fixture");
    let model = Arc::new(ScriptedModel::new());
    let broadcaster = EventBroadcaster::default();

    let bot = StatementBot::new(
        &StatementConfig::default(),
        Arc::new(corpus),
        Arc::new(MemoryStore::new()),
        model.clone(),
    )
    .with_events(broadcaster.clone());
    let mut registry = BotRegistry::new();
    registry.register(Arc::new(bot));

    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let router = create_router(AppState::new(Arc::new(registry), broadcaster));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        base_url: format!("http://{addr}"),
        ws_url: format!("ws://{addr}/ws"),
        model,
        http: reqwest::Client::new(),
        _handle: handle,
    }
}

impl TestServer {
    /// Posts a turn and waits for its stream to finish.
    async fn post_turn(&self, conversation: &[&str]) {
        let query: Vec<serde_json::Value> = conversation
            .iter()
            .enumerate()
            .map(|(i, content)| {
                let role = if i % 2 == 0 { "user" } else { "bot" };
                serde_json::json!({ "role": role, "content": content })
            })
            .collect();

        let response = self
            .http
            .post(format!("{}/api/bots/ChineseStatement", self.base_url))
            .json(&serde_json::json!({
                "query": query,
                "userId": "watcher",
                "conversationId": "observed",
            }))
            .send()
            .await
            .expect("Request failed");
        assert!(response.status().is_success());
        response.text().await.expect("Failed to read stream");
    }
}

/// Connects a WebSocket client to the given URL.
async fn connect_client(url: &str) -> WsClient {
    let (ws_stream, _) = connect_async(url)
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next text message from the WebSocket and parses it as SessionEvent.
/// Automatically handles ping frames by responding with pong.
async fn receive_event(client: &mut WsClient) -> SessionEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

fn level(n: u8) -> Level {
    Level::new(n).expect("Invalid level")
}

// ============================================================================
// Connection Tests
// ============================================================================

/// Tests that a client is greeted with the served bots.
#[tokio::test]
async fn test_client_receives_connected_event() {
    let server = spawn_test_server().await;
    let mut client = connect_client(&server.ws_url).await;

    match receive_event(&mut client).await {
        SessionEvent::Connected(payload) => {
            assert_eq!(payload.bots, vec!["ChineseStatement"]);
        }
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

/// Tests that connected observers are counted in the status endpoint.
#[tokio::test]
async fn test_status_counts_observers() {
    let server = spawn_test_server().await;
    let mut client = connect_client(&server.ws_url).await;
    receive_event(&mut client).await;

    let status: serde_json::Value = server
        .http
        .get(format!("{}/api/status", server.base_url))
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid status body");

    assert_eq!(status["observers"], 1);
    assert_eq!(status["bots"], serde_json::json!(["ChineseStatement"]));
}

// ============================================================================
// Lifecycle Events
// ============================================================================

/// Tests that override, issue, judge, reset and failure all reach observers.
#[tokio::test]
async fn test_lifecycle_events_are_broadcast_in_order() {
    let server = spawn_test_server().await;
    let mut client = connect_client(&server.ws_url).await;
    receive_event(&mut client).await;

    // An override on a fresh conversation stores the level, then samples at it.
    server.post_turn(&["3"]).await;
    match receive_event(&mut client).await {
        SessionEvent::LevelOverridden(payload) => {
            assert_eq!(payload.user_id, "watcher");
            assert_eq!(payload.level, level(3));
        }
        other => panic!("Expected LevelOverridden event, got: {other:?}"),
    }
    match receive_event(&mut client).await {
        SessionEvent::ProblemIssued(payload) => {
            assert_eq!(payload.conversation_id, "observed");
            assert_eq!(payload.level, level(3));
        }
        other => panic!("Expected ProblemIssued event, got: {other:?}"),
    }

    // A passing judgement moves the level up by one.
    server.model.queue_reply(
        JUDGE,
        "- Your translation has captured the full meaning of the sentence.",
    );
    server.post_turn(&["3", "...", "He runs fast."]).await;
    match receive_event(&mut client).await {
        SessionEvent::SubmissionJudged(payload) => {
            assert_eq!(payload.verdict, Verdict::Pass);
            assert_eq!(payload.previous_level, level(3));
            assert_eq!(payload.level, level(4));
        }
        other => panic!("Expected SubmissionJudged event, got: {other:?}"),
    }

    // Asking for another sentence resets and resamples in the same turn.
    server
        .post_turn(&["3", "...", "He runs fast.", "...", "I want another sentence."])
        .await;
    assert!(matches!(
        receive_event(&mut client).await,
        SessionEvent::ConversationReset(_)
    ));
    match receive_event(&mut client).await {
        SessionEvent::ProblemIssued(payload) => assert_eq!(payload.level, level(4)),
        other => panic!("Expected ProblemIssued event, got: {other:?}"),
    }

    // Nothing is queued for the judge, so the next answer fails the turn.
    server.post_turn(&["I want another sentence.", "...", "My bike"]).await;
    match receive_event(&mut client).await {
        SessionEvent::TurnFailed(payload) => {
            assert_eq!(payload.bot, "ChineseStatement");
            assert_eq!(payload.conversation_id, "observed");
        }
        other => panic!("Expected TurnFailed event, got: {other:?}"),
    }
}

/// Tests that every connected client receives the same events.
#[tokio::test]
async fn test_multiple_clients_receive_events() {
    let server = spawn_test_server().await;
    let mut first = connect_client(&server.ws_url).await;
    let mut second = connect_client(&server.ws_url).await;
    receive_event(&mut first).await;
    receive_event(&mut second).await;

    server.post_turn(&["start"]).await;

    for client in [&mut first, &mut second] {
        match receive_event(client).await {
            SessionEvent::ProblemIssued(payload) => assert_eq!(payload.level, Level::MIN),
            other => panic!("Expected ProblemIssued event, got: {other:?}"),
        }
    }
}
