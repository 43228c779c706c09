//! Sentence translation tutor.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;
use tutor_corpus::SentenceCorpus;

use super::{grading_logit_bias, prompts, with_history, Bot, BotSettings};
use crate::config::StatementConfig;
use crate::events::EventBroadcaster;
use crate::model::{relay, ChatMessage, CompletionRequest, ModelClient};
use crate::protocol::{QueryRequest, ResponseSink};
use crate::session::{LifecyclePhrases, SessionManager, TurnAction};
use crate::store::KeyValueStore;
use crate::verdict::{MarkerPhraseClassifier, VerdictClassifier};
use crate::Result;

/// Asks the learner to translate a sentence sampled at their level.
///
/// The judge's reply is streamed to the learner and scanned for the
/// [`MarkerPhraseClassifier`] marker to move the level up or down.
pub struct StatementBot {
    session: SessionManager<SentenceCorpus>,
    model: Arc<dyn ModelClient>,
    judge_model: String,
    freeform_model: String,
    classifier: MarkerPhraseClassifier,
}

impl std::fmt::Debug for StatementBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementBot")
            .field("session", &self.session)
            .field("judge_model", &self.judge_model)
            .field("freeform_model", &self.freeform_model)
            .finish_non_exhaustive()
    }
}

impl StatementBot {
    /// Name the bot is served under.
    pub const NAME: &'static str = "ChineseStatement";

    /// Shown before the first message.
    pub const INTRODUCTION: &'static str = "Say 'start' to get the sentence to translate.";

    /// Creates the bot.
    #[must_use]
    pub fn new(
        config: &StatementConfig,
        corpus: Arc<SentenceCorpus>,
        store: Arc<dyn KeyValueStore>,
        model: Arc<dyn ModelClient>,
    ) -> Self {
        Self {
            session: SessionManager::new(
                Self::NAME,
                config.key_prefix.clone(),
                LifecyclePhrases::sentence(),
                corpus,
                store,
            ),
            model,
            judge_model: config.judge_model.clone(),
            freeform_model: config.freeform_model.clone(),
            classifier: MarkerPhraseClassifier::default(),
        }
    }

    /// Makes sentence sampling deterministic.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.session = self.session.with_seed(seed);
        self
    }

    /// Publishes lifecycle events on `events`.
    #[must_use]
    pub fn with_events(mut self, events: EventBroadcaster) -> Self {
        self.session = self.session.with_events(events);
        self
    }

    /// Returns the session manager.
    #[must_use]
    pub const fn session(&self) -> &SessionManager<SentenceCorpus> {
        &self.session
    }
}

#[async_trait]
impl Bot for StatementBot {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn settings(&self) -> BotSettings {
        BotSettings::new(Self::INTRODUCTION)
            .depends_on(&self.judge_model)
            .depends_on(&self.freeform_model)
    }

    async fn respond(&self, request: &QueryRequest, sink: &ResponseSink) -> Result<()> {
        let user_id = request.user_id.as_str();
        let conversation_id = request.conversation_id.as_str();
        let message = request.last_message();

        let turn = self
            .session
            .begin_turn(user_id, conversation_id, message)
            .await?;

        if let Some(level) = turn
            .overridden
            .filter(|_| !matches!(turn.action, TurnAction::EmitNewProblem(_)))
        {
            sink.text(prompts::level_set_reply(level, "sentence")).await?;
            return sink.suggest(self.session.phrases().skip.as_str()).await;
        }

        match turn.action {
            TurnAction::EmitNewProblem(issued) => {
                sink.text(prompts::sentence_starting_reply(
                    issued.level,
                    &issued.problem.text,
                ))
                .await?;
                sink.suggest(self.session.phrases().skip.as_str()).await?;
            }
            TurnAction::ForwardToJudge(issued) => {
                sink.meta(false).await?;

                let messages = with_history(
                    vec![ChatMessage::system(prompts::sentence_judge_prompt(
                        &issued.problem.text,
                    ))],
                    &request.query,
                );
                let completion = CompletionRequest::new(&self.judge_model, messages)
                    .with_temperature(0.0)
                    .with_logit_bias(grading_logit_bias());
                let judgement = relay(self.model.stream_completion(&completion).await?, sink).await?;

                let verdict = self.classifier.classify(&judgement, message);
                sink.ensure_open()?;
                self.session
                    .record_verdict(user_id, conversation_id, turn.level, verdict)
                    .await?;

                sink.suggest(prompts::SIMILAR_SENTENCES).await?;
                sink.suggest(self.session.phrases().next.as_str()).await?;
            }
            TurnAction::ForwardToFreeform(issued) => {
                let messages = with_history(
                    vec![ChatMessage::system(prompts::sentence_freeform_prompt(
                        &issued.problem.context,
                    ))],
                    &request.query,
                );
                let completion = CompletionRequest::new(&self.freeform_model, messages);
                let reply = relay(self.model.stream_completion(&completion).await?, sink).await?;
                info!(
                    bot = Self::NAME,
                    conversation_id,
                    chars = reply.chars().count(),
                    "Follow-up answered"
                );
            }
        }

        Ok(())
    }
}
