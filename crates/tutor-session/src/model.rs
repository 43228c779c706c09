//! Upstream language-model invocation.
//!
//! A [`ModelClient`] turns a [`CompletionRequest`] into a finite stream of
//! text chunks. Streams are not restartable; callers either drain them with
//! [`relay`] / [`collect`] or drop them to abandon the call.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ModelErrorKind;
use crate::protocol::{ProtocolMessage, ProtocolRole, ResponseSink};
use crate::{Result, TutorError};

/// A lazily produced sequence of reply chunks.
pub type ChunkStream = BoxStream<'static, Result<String>>;

/// Author of a prompt message, in model terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions.
    System,
    /// The learner.
    User,
    /// A previous model reply.
    Assistant,
}

/// One prompt message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who wrote the message.
    pub role: ChatRole,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    /// Creates a system message.
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// Creates a user message.
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Creates an assistant message.
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

impl From<&ProtocolMessage> for ChatMessage {
    fn from(message: &ProtocolMessage) -> Self {
        let role = match message.role {
            ProtocolRole::System => ChatRole::System,
            ProtocolRole::User => ChatRole::User,
            ProtocolRole::Bot => ChatRole::Assistant,
        };
        Self {
            role,
            content: message.content.clone(),
        }
    }
}

/// A single model call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    /// Model name as understood by the endpoint.
    pub model: String,

    /// Prompt, oldest first.
    pub messages: Vec<ChatMessage>,

    /// Sampling temperature; the endpoint default when `None`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Token id to bias adjustments.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub logit_bias: BTreeMap<String, i32>,
}

impl CompletionRequest {
    /// Creates a request with endpoint-default sampling.
    #[must_use]
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            logit_bias: BTreeMap::new(),
        }
    }

    /// Sets the sampling temperature.
    #[must_use]
    pub const fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the logit bias map.
    #[must_use]
    pub fn with_logit_bias(mut self, logit_bias: BTreeMap<String, i32>) -> Self {
        self.logit_bias = logit_bias;
        self
    }
}

/// Streams completions from a language model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Starts a completion.
    ///
    /// Errors that happen before the first chunk (authentication, rate
    /// limits) are returned here; later failures appear as stream items.
    async fn stream_completion(&self, request: &CompletionRequest) -> Result<ChunkStream>;
}

/// Forwards every chunk of `stream` to `sink` and returns the whole reply.
///
/// # Errors
///
/// Returns the first stream error, or `TutorError::ClientDisconnected` if the
/// client went away mid-reply. The stream is dropped either way.
pub async fn relay(mut stream: ChunkStream, sink: &ResponseSink) -> Result<String> {
    let mut reply = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        sink.text(chunk.as_str()).await?;
        reply.push_str(&chunk);
    }
    Ok(reply)
}

/// Drains `stream` without forwarding it.
///
/// # Errors
///
/// Returns the first stream error.
pub async fn collect(mut stream: ChunkStream) -> Result<String> {
    let mut reply = String::new();
    while let Some(chunk) = stream.next().await {
        reply.push_str(&chunk?);
    }
    Ok(reply)
}

// ============================================================================
// OpenAI-compatible HTTP client
// ============================================================================

/// Client for an OpenAI-compatible `POST {base_url}/chat/completions`
/// endpoint, streaming over server-sent events.
///
/// `reqwest::Client` is reference counted, so cloning is cheap.
#[derive(Debug, Clone)]
pub struct HttpModelClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpModelClient {
    /// Builds a client.
    ///
    /// `api_key` is sent as a bearer token when present.
    ///
    /// # Errors
    ///
    /// Returns a `Model` error if the HTTP client cannot be constructed.
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| {
                TutorError::model(ModelErrorKind::Other, format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    /// Returns the full completions URL.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "no_bias")]
    logit_bias: &'a BTreeMap<String, i32>,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn no_bias(bias: &&BTreeMap<String, i32>) -> bool {
    bias.is_empty()
}

#[async_trait]
impl ModelClient for HttpModelClient {
    async fn stream_completion(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        let payload = WireRequest {
            model: &request.model,
            messages: &request.messages,
            stream: true,
            temperature: request.temperature,
            logit_bias: &request.logit_bias,
        };

        debug!(
            model = %request.model,
            messages = request.messages.len(),
            temperature = ?request.temperature,
            "Sending completion request"
        );

        let mut builder = self.client.post(&self.endpoint).json(&payload);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            warn!(endpoint = %self.endpoint, error = %e, "Model request failed (transport)");
            TutorError::model(ModelErrorKind::Network, e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(model = %request.model, status = %status, "Model endpoint returned an error");
            return Err(TutorError::model(
                ModelErrorKind::from_status(status.as_u16()),
                format!("HTTP {status}: {}", body.trim()),
            ));
        }

        Ok(decode_event_stream(response.bytes_stream()).boxed())
    }
}

/// Turns a raw SSE byte stream into content chunks.
fn decode_event_stream<S, B, E>(bytes: S) -> impl Stream<Item = Result<String>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    struct State<S> {
        bytes: std::pin::Pin<Box<S>>,
        decoder: SseDecoder,
        pending: VecDeque<String>,
        finished: bool,
    }

    let state = State {
        bytes: Box::pin(bytes),
        decoder: SseDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((Ok(chunk), state));
            }
            if state.finished || state.decoder.is_done() {
                return None;
            }

            let decoded = match state.bytes.next().await {
                Some(Ok(bytes)) => state.decoder.push(bytes.as_ref()),
                Some(Err(e)) => Err(TutorError::model(ModelErrorKind::Network, e.to_string())),
                None => {
                    state.finished = true;
                    state.decoder.finish()
                }
            };

            match decoded {
                Ok(chunks) => state.pending.extend(chunks),
                Err(e) => {
                    state.finished = true;
                    return Some((Err(e), state));
                }
            }
        }
    })
}

/// Incremental decoder for `data:` lines of an OpenAI streaming response.
///
/// Bytes are buffered until a full line is available, so a multi-byte
/// character split across network reads is reassembled before decoding.
#[derive(Debug, Default)]
struct SseDecoder {
    buffer: Vec<u8>,
    done: bool,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    #[serde(default)]
    delta: WireDelta,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
}

impl SseDecoder {
    const fn is_done(&self) -> bool {
        self.done
    }

    fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(bytes);
        let mut chunks = Vec::new();
        while let Some(end) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=end).collect();
            if self.done {
                continue;
            }
            if let Some(chunk) = self.decode_line(&line)? {
                chunks.push(chunk);
            }
        }
        Ok(chunks)
    }

    fn finish(&mut self) -> Result<Vec<String>> {
        let line = std::mem::take(&mut self.buffer);
        if self.done || line.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.decode_line(&line)?.into_iter().collect())
    }

    fn decode_line(&mut self, raw: &[u8]) -> Result<Option<String>> {
        let line = std::str::from_utf8(raw)
            .map_err(|e| TutorError::model(ModelErrorKind::Protocol, format!("invalid UTF-8 in stream: {e}")))?
            .trim();

        // Comments, `event:` and `id:` fields, and blank separators carry no content.
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(None);
        };
        let data = data.trim();
        if data == "[DONE]" {
            self.done = true;
            return Ok(None);
        }

        let chunk: WireChunk = serde_json::from_str(data).map_err(|e| {
            TutorError::model(ModelErrorKind::Protocol, format!("undecodable stream chunk: {e}"))
        })?;

        if let Some(error) = chunk.error {
            return Err(TutorError::model(ModelErrorKind::Other, error.to_string()));
        }

        Ok(chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|content| !content.is_empty()))
    }
}
