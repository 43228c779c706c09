//! In-process fakes for exercising bots without a model endpoint.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};

use crate::error::ModelErrorKind;
use crate::model::{ChunkStream, CompletionRequest, ModelClient};
use crate::{Result, TutorError};

enum Script {
    Reply(Vec<String>),
    Refuse(TutorError),
    BreakAfter(Vec<String>, TutorError),
}

/// A [`ModelClient`] that plays back queued replies per model name.
///
/// Every request is recorded, whether or not a reply was queued for it. A
/// request with nothing queued fails with a `Model` error.
#[derive(Default)]
pub struct ScriptedModel {
    scripts: Mutex<HashMap<String, VecDeque<Script>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl std::fmt::Debug for ScriptedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedModel")
            .field("requests", &self.recorded_requests().len())
            .finish_non_exhaustive()
    }
}

impl ScriptedModel {
    /// Creates a model with nothing queued.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, model: &str, script: Script) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(model.to_string())
            .or_default()
            .push_back(script);
    }

    /// Queues `text` as the next reply of `model`, streamed word by word.
    pub fn queue_reply(&self, model: &str, text: &str) {
        let chunks = text.split_inclusive(' ').map(str::to_string).collect();
        self.push(model, Script::Reply(chunks));
    }

    /// Queues a reply delivered as exactly these chunks.
    pub fn queue_chunks(&self, model: &str, chunks: &[&str]) {
        let chunks = chunks.iter().map(|c| (*c).to_string()).collect();
        self.push(model, Script::Reply(chunks));
    }

    /// Queues a call that fails before streaming anything.
    pub fn queue_error(&self, model: &str, error: TutorError) {
        self.push(model, Script::Refuse(error));
    }

    /// Queues a reply that breaks off with `error` after `chunks`.
    pub fn queue_broken_stream(&self, model: &str, chunks: &[&str], error: TutorError) {
        let chunks = chunks.iter().map(|c| (*c).to_string()).collect();
        self.push(model, Script::BreakAfter(chunks, error));
    }

    /// Returns every request received, in order.
    #[must_use]
    pub fn recorded_requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the requests received for `model`, in order.
    #[must_use]
    pub fn requests_for(&self, model: &str) -> Vec<CompletionRequest> {
        self.recorded_requests()
            .into_iter()
            .filter(|r| r.model == model)
            .collect()
    }

    /// Returns how many queued replies have not been consumed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(VecDeque::len)
            .sum()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn stream_completion(&self, request: &CompletionRequest) -> Result<ChunkStream> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&request.model)
            .and_then(VecDeque::pop_front);

        match script {
            Some(Script::Reply(chunks)) => Ok(stream::iter(chunks.into_iter().map(Ok)).boxed()),
            Some(Script::Refuse(error)) => Err(error),
            Some(Script::BreakAfter(chunks, error)) => Ok(stream::iter(chunks.into_iter().map(Ok))
                .chain(stream::once(async move { Err(error) }))
                .boxed()),
            None => Err(TutorError::model(
                ModelErrorKind::Other,
                format!("no scripted reply queued for model '{}'", request.model),
            )),
        }
    }
}
