//! Integration tests for the HTTP API over a real socket.
//!
//! The tutor server is bound to a free local port and its model calls go to a
//! second local server that speaks the OpenAI streaming format, so a turn
//! travels the whole path: HTTP request, bot, model client, SSE response.

use std::net::TcpListener;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tutor_corpus::SentenceCorpus;
use tutor_session::{
    create_router, AppState, BotRegistry, EventBroadcaster, HttpModelClient, KeyValueStore,
    MemoryStore, StatementBot, StatementConfig, StatusResponse,
};

/// Helper to find an available port for testing.
fn find_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Binds `router` to a free port and returns its base URL.
async fn spawn_server(router: Router) -> (String, tokio::task::JoinHandle<()>) {
    let port = find_available_port();
    let addr = format!("127.0.0.1:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind");

    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://{addr}"), handle)
}

// ============================================================================
// Fake Model Endpoint
// ============================================================================

/// What the fake endpoint answers with.
#[derive(Clone)]
enum Upstream {
    /// Streams the reply seven characters per chunk.
    Reply(String),
    /// Returns this HTTP status with an error body.
    Status(StatusCode),
}

/// A captured upstream call.
#[derive(Debug, Clone)]
struct Captured {
    authorization: Option<String>,
    body: Value,
}

#[derive(Clone)]
struct FakeModel {
    upstream: Upstream,
    captured: Arc<Mutex<Vec<Captured>>>,
}

async fn fake_completions(
    State(fake): State<FakeModel>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    fake.captured
        .lock()
        .expect("Lock poisoned")
        .push(Captured {
            authorization,
            body,
        });

    match fake.upstream {
        Upstream::Reply(text) => {
            let mut stream = String::from(": upstream keep-alive\n\n");
            let chars: Vec<char> = text.chars().collect();
            for piece in chars.chunks(7) {
                let content: String = piece.iter().collect();
                let chunk = json!({ "choices": [{ "delta": { "content": content } }] });
                stream.push_str(&format!("data: {chunk}\n\n"));
            }
            stream.push_str("data: [DONE]\n\n");
            ([(header::CONTENT_TYPE, "text/event-stream")], stream).into_response()
        }
        Upstream::Status(status) => {
            (status, Json(json!({ "error": { "message": "try later" } }))).into_response()
        }
    }
}

/// Starts a fake OpenAI-compatible endpoint and returns its base URL.
async fn spawn_fake_model(upstream: Upstream) -> (String, Arc<Mutex<Vec<Captured>>>) {
    let captured = Arc::new(Mutex::new(Vec::new()));
    let router = Router::new()
        .route("/v1/chat/completions", post(fake_completions))
        .with_state(FakeModel {
            upstream,
            captured: Arc::clone(&captured),
        });
    let (url, _handle) = spawn_server(router).await;
    (format!("{url}/v1"), captured)
}

// ============================================================================
// Tutor Server
// ============================================================================

struct Tutor {
    url: String,
    store: Arc<MemoryStore>,
    client: reqwest::Client,
}

fn fixture_corpus() -> Arc<SentenceCorpus> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures/chinese_sentences.txt");
    Arc::new(SentenceCorpus::load(path).expect("Failed to load sentence fixture"))
}

/// Serves the sentence bot with model calls going to `model_url`.
async fn spawn_tutor(model_url: &str) -> Tutor {
    let store = Arc::new(MemoryStore::new());
    let model = HttpModelClient::new(
        model_url,
        Some("test-key".to_string()),
        Duration::from_secs(5),
    )
    .expect("Failed to build model client");

    let bot = StatementBot::new(
        &StatementConfig::default(),
        fixture_corpus(),
        store.clone(),
        Arc::new(model),
    )
    .with_seed(11);
    let mut registry = BotRegistry::new();
    registry.register(Arc::new(bot));

    let state = AppState::new(Arc::new(registry), EventBroadcaster::default());
    let (url, _handle) = spawn_server(create_router(state)).await;

    Tutor {
        url,
        store,
        client: reqwest::Client::new(),
    }
}

/// A parsed server-sent event.
#[derive(Debug)]
struct SseEvent {
    name: String,
    data: Value,
}

/// Splits an SSE body into events, skipping comments.
fn parse_sse(body: &str) -> Vec<SseEvent> {
    body.split("\n\n")
        .filter_map(|block| {
            let mut name = None;
            let mut data = None;
            for line in block.lines() {
                if let Some(value) = line.strip_prefix("event:") {
                    name = Some(value.trim().to_string());
                } else if let Some(value) = line.strip_prefix("data:") {
                    data = Some(serde_json::from_str(value.trim()).expect("Invalid event data"));
                }
            }
            Some(SseEvent {
                name: name?,
                data: data?,
            })
        })
        .collect()
}

impl Tutor {
    /// Posts a turn and reads the whole event stream.
    async fn query(&self, conversation: &[&str]) -> Vec<SseEvent> {
        let query: Vec<Value> = conversation
            .iter()
            .enumerate()
            .map(|(i, content)| {
                let role = if i % 2 == 0 { "user" } else { "bot" };
                json!({ "role": role, "content": content })
            })
            .collect();

        let response = self
            .client
            .post(format!("{}/api/bots/ChineseStatement", self.url))
            .json(&json!({
                "query": query,
                "userId": "learner",
                "conversationId": "conv",
            }))
            .send()
            .await
            .expect("Request failed");

        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(content_type.starts_with("text/event-stream"), "Got {content_type}");

        let body = tokio::time::timeout(Duration::from_secs(5), response.text())
            .await
            .expect("Timeout waiting for stream end")
            .expect("Failed to read body");
        parse_sse(&body)
    }

    async fn status(&self) -> StatusResponse {
        self.client
            .get(format!("{}/api/status", self.url))
            .send()
            .await
            .expect("Request failed")
            .json()
            .await
            .expect("Invalid status body")
    }
}

fn text_of(events: &[SseEvent]) -> String {
    events
        .iter()
        .filter(|e| e.name == "text")
        .filter_map(|e| e.data["text"].as_str())
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

/// Tests that a first turn streams the sampled sentence without a model call.
#[tokio::test]
async fn test_start_streams_sentence() {
    let (model_url, captured) = spawn_fake_model(Upstream::Reply(String::new())).await;
    let tutor = spawn_tutor(&model_url).await;

    let events = tutor.query(&["start"]).await;

    let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["text", "suggested_reply", "done"]);
    assert!(text_of(&events).contains("HSK level 1"));
    assert_eq!(events[1].data["text"], "I will pass this sentence.");
    assert!(captured.lock().expect("Lock poisoned").is_empty());
    assert_eq!(
        tutor.store.get("ChineseStatement-level-learner").await.unwrap(),
        Some(json!(1))
    );
}

/// Tests that a judged answer is streamed from the model and promotes the learner.
#[tokio::test]
async fn test_judged_turn_streams_model_reply() {
    let judgement = "很好！\n- Your translation has captured the full meaning of the sentence.";
    let (model_url, captured) = spawn_fake_model(Upstream::Reply(judgement.to_string())).await;
    let tutor = spawn_tutor(&model_url).await;
    tutor.query(&["start"]).await;

    let events = tutor.query(&["start", "...", "I am a student."]).await;

    assert_eq!(events[0].name, "meta");
    assert_eq!(events[0].data["suggestedReplies"], false);
    assert_eq!(text_of(&events), judgement);
    assert_eq!(events.last().map(|e| e.name.as_str()), Some("done"));
    assert_eq!(
        tutor.store.get("ChineseStatement-level-learner").await.unwrap(),
        Some(json!(2))
    );

    let calls = captured.lock().expect("Lock poisoned").clone();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].authorization.as_deref(), Some("Bearer test-key"));
    assert_eq!(calls[0].body["model"], "Claude-3.5-Sonnet");
    assert_eq!(calls[0].body["stream"], true);
    assert_eq!(calls[0].body["temperature"], 0.0);
    assert_eq!(calls[0].body["logit_bias"]["36821"], -10);
    assert_eq!(calls[0].body["messages"][0]["role"], "system");
    assert_eq!(calls[0].body["messages"][2]["role"], "assistant");

    let status = tutor.status().await;
    assert_eq!(status.turns.started, 2);
    assert_eq!(status.turns.completed, 2);
}

/// Tests that an upstream rate limit becomes a transient error event.
#[tokio::test]
async fn test_rate_limited_judge_reports_transient_error() {
    let (model_url, _captured) =
        spawn_fake_model(Upstream::Status(StatusCode::TOO_MANY_REQUESTS)).await;
    let tutor = spawn_tutor(&model_url).await;
    tutor.query(&["start"]).await;
    let before = tutor.store.snapshot().await;

    let events = tutor.query(&["start", "...", "I am a student."]).await;

    let error = events
        .iter()
        .find(|e| e.name == "error")
        .expect("No error event");
    assert_eq!(error.data["transient"], true);
    assert_eq!(events.last().map(|e| e.name.as_str()), Some("done"));
    assert_eq!(tutor.store.snapshot().await, before);

    let status = tutor.status().await;
    assert_eq!(status.turns.failed, 1);
}

/// Tests the listing, settings and error endpoints.
#[tokio::test]
async fn test_bot_listing_and_errors() {
    let (model_url, _captured) = spawn_fake_model(Upstream::Reply(String::new())).await;
    let tutor = spawn_tutor(&model_url).await;

    let bots: Value = tutor
        .client
        .get(format!("{}/api/bots", tutor.url))
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid body");
    assert_eq!(bots, json!({ "bots": ["ChineseStatement"] }));

    let settings: Value = tutor
        .client
        .get(format!("{}/api/bots/ChineseStatement/settings", tutor.url))
        .send()
        .await
        .expect("Request failed")
        .json()
        .await
        .expect("Invalid body");
    assert_eq!(settings["serverBotDependencies"]["Claude-3.5-Sonnet"], 1);
    assert_eq!(settings["serverBotDependencies"]["ChatGPT"], 1);

    let missing = tutor
        .client
        .post(format!("{}/api/bots/Nope", tutor.url))
        .json(&json!({ "query": [], "userId": "u", "conversationId": "c" }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(missing.status(), reqwest::StatusCode::NOT_FOUND);

    let invalid = tutor
        .client
        .post(format!("{}/api/bots/ChineseStatement", tutor.url))
        .json(&json!({ "query": [], "userId": "u", "conversationId": "c" }))
        .send()
        .await
        .expect("Request failed");
    assert_eq!(invalid.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = invalid.json().await.expect("Invalid body");
    assert!(body["error"].as_str().is_some_and(|e| e.contains("query")));
}
