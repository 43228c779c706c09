//! Vocabulary tutor.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, warn};
use tutor_corpus::{Level, ScriptFormat, WordList, WordRecord};

use super::{grading_logit_bias, prompts, with_history, Bot, BotSettings};
use crate::config::VocabConfig;
use crate::events::EventBroadcaster;
use crate::model::{collect, relay, ChatMessage, CompletionRequest, ModelClient};
use crate::protocol::{ProtocolMessage, QueryRequest, ResponseSink};
use crate::session::{IssuedProblem, LifecyclePhrases, SessionManager, TurnAction};
use crate::store::KeyValueStore;
use crate::verdict::{VerdictClassifier, VocabularyJudgeClassifier};
use crate::{Result, TutorError};

/// Asks the learner for the pinyin and meaning of a word sampled at their
/// level.
///
/// A submission takes two model calls: one tabulates the answer against the
/// reference and is shown to the learner, the other grades the table and is
/// kept private. Follow-up replies end with model-proposed suggestions.
pub struct VocabBot {
    session: SessionManager<WordList>,
    model: Arc<dyn ModelClient>,
    models: VocabConfig,
    suggestion_pattern: Regex,
}

impl std::fmt::Debug for VocabBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VocabBot")
            .field("session", &self.session)
            .field("models", &self.models)
            .finish_non_exhaustive()
    }
}

impl VocabBot {
    /// Name the bot is served under.
    pub const NAME: &'static str = "ChineseVocab";

    /// Shown before the first message.
    pub const INTRODUCTION: &'static str = "Say 'start' to get the Chinese word.";

    /// Creates the bot.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::Pattern` if the suggestion pattern fails to
    /// compile.
    pub fn new(
        config: &VocabConfig,
        words: Arc<WordList>,
        store: Arc<dyn KeyValueStore>,
        model: Arc<dyn ModelClient>,
    ) -> Result<Self> {
        Ok(Self {
            session: SessionManager::new(
                Self::NAME,
                config.key_prefix.clone(),
                LifecyclePhrases::vocabulary(),
                words,
                store,
            ),
            model,
            models: config.clone(),
            suggestion_pattern: Regex::new(prompts::SUGGESTION_PATTERN)?,
        })
    }

    /// Makes word sampling deterministic.
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
    pub const fn session(&self) -> &SessionManager<WordList> {
        &self.session
    }

    /// Pulls `<a>...</a>` suggestions out of the suggestion model's reply.
    #[must_use]
    pub fn extract_suggestions(&self, raw: &str) -> Vec<String> {
        self.suggestion_pattern
            .captures_iter(raw)
            .filter_map(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
            .filter(|s| !s.is_empty())
            .take(prompts::MAX_MODEL_SUGGESTIONS)
            .collect()
    }

    async fn present(
        &self,
        issued: &IssuedProblem<WordRecord>,
        format: ScriptFormat,
        offer_switch: bool,
        sink: &ResponseSink,
    ) -> Result<()> {
        let word = &issued.problem;
        sink.text(prompts::word_starting_reply(issued.level, word.display(format)))
            .await?;
        if offer_switch && word.has_variant() {
            sink.suggest(prompts::format_phrase(format.other())).await?;
        }
        sink.suggest(self.session.phrases().skip.as_str()).await
    }

    async fn judge(
        &self,
        request: &QueryRequest,
        issued: &IssuedProblem<WordRecord>,
        format: ScriptFormat,
        level: Level,
        sink: &ResponseSink,
    ) -> Result<()> {
        let word = &issued.problem;
        sink.meta(false).await?;

        let messages = with_history(
            vec![ChatMessage::system(prompts::word_tabulation_prompt(word))],
            &request.query,
        );
        let completion = CompletionRequest::new(&self.models.tabulation_model, messages)
            .with_temperature(0.0)
            .with_logit_bias(grading_logit_bias());
        let tabulation = relay(self.model.stream_completion(&completion).await?, sink).await?;
        sink.text("\n\n").await?;

        let next = self.session.phrases().next.as_str();
        if !tabulation.contains(prompts::TABLE_RULE) {
            debug!(
                bot = Self::NAME,
                conversation_id = %request.conversation_id,
                "No table in tabulation, not grading"
            );
            return sink.suggest(next).await;
        }

        let shown = word.display(format);
        let grading = CompletionRequest::new(
            &self.models.judge_model,
            vec![ChatMessage::user(prompts::word_judge_prompt(shown, &tabulation))],
        )
        .with_temperature(0.0);
        let judgement = collect(self.model.stream_completion(&grading).await?).await?;
        debug!(bot = Self::NAME, judgement = %judgement, "Tabulation graded");

        let verdict =
            VocabularyJudgeClassifier::new(&word.pinyin).classify(&judgement, request.last_message());
        sink.ensure_open()?;
        self.session
            .record_verdict(&request.user_id, &request.conversation_id, level, verdict)
            .await?;

        sink.suggest(prompts::word_usage_suggestion(shown)).await?;
        sink.suggest(prompts::related_words_suggestion(shown)).await?;
        sink.suggest(next).await
    }

    async fn follow_up(
        &self,
        request: &QueryRequest,
        issued: &IssuedProblem<WordRecord>,
        format: ScriptFormat,
        sink: &ResponseSink,
    ) -> Result<()> {
        let messages = with_history(
            vec![
                ChatMessage::system(prompts::word_freeform_prompt(format)),
                ChatMessage::system(prompts::script_reminder(format)),
            ],
            &request.query,
        );
        let completion = CompletionRequest::new(&self.models.freeform_model, messages);
        let reply = relay(self.model.stream_completion(&completion).await?, sink).await?;

        let mut conversation = request.query.clone();
        conversation.push(ProtocolMessage::bot(reply));
        match self
            .suggest_follow_ups(&conversation, issued.problem.display(format))
            .await
        {
            Ok(suggestions) => {
                for suggestion in suggestions {
                    sink.suggest(suggestion).await?;
                }
            }
            Err(TutorError::ClientDisconnected) => return Err(TutorError::ClientDisconnected),
            Err(e) => warn!(
                bot = Self::NAME,
                conversation_id = %request.conversation_id,
                error = %e,
                "Suggestion model failed, offering defaults only"
            ),
        }

        sink.suggest(self.session.phrases().next.as_str()).await
    }

    async fn suggest_follow_ups(
        &self,
        conversation: &[ProtocolMessage],
        word: &str,
    ) -> Result<Vec<String>> {
        let completion = CompletionRequest::new(
            &self.models.suggestion_model,
            vec![
                ChatMessage::system(prompts::SUGGESTION_SYSTEM_PROMPT),
                ChatMessage::user(prompts::transcript(conversation)),
                ChatMessage::user(prompts::suggestion_prompt(word)),
            ],
        );
        let raw = collect(self.model.stream_completion(&completion).await?).await?;
        Ok(self.extract_suggestions(&raw))
    }
}

#[async_trait]
impl Bot for VocabBot {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn settings(&self) -> BotSettings {
        BotSettings::new(Self::INTRODUCTION)
            .depends_on(&self.models.tabulation_model)
            .depends_on(&self.models.judge_model)
            .depends_on(&self.models.freeform_model)
            .depends_on(&self.models.suggestion_model)
    }

    async fn respond(&self, request: &QueryRequest, sink: &ResponseSink) -> Result<()> {
        let user_id = request.user_id.as_str();
        let message = request.last_message();

        let turn = self
            .session
            .begin_turn(user_id, &request.conversation_id, message)
            .await?;

        let requested_format = prompts::parse_format_phrase(message);
        let format = match requested_format {
            Some(format) => {
                self.session.set_user_format(user_id, format).await?;
                format
            }
            None => self.session.user_format(user_id).await?,
        };

        if let Some(level) = turn
            .overridden
            .filter(|_| !matches!(turn.action, TurnAction::EmitNewProblem(_)))
        {
            sink.text(prompts::level_set_reply(level, "word")).await?;
            return sink.suggest(self.session.phrases().skip.as_str()).await;
        }

        match &turn.action {
            TurnAction::EmitNewProblem(issued) => self.present(issued, format, true, sink).await,
            action if requested_format.is_some() => {
                info!(
                    bot = Self::NAME,
                    conversation_id = %request.conversation_id,
                    format = %format,
                    "Word shown again in new script"
                );
                self.present(action.problem(), format, false, sink).await
            }
            TurnAction::ForwardToJudge(issued) => {
                self.judge(request, issued, format, turn.level, sink).await
            }
            TurnAction::ForwardToFreeform(issued) => {
                self.follow_up(request, issued, format, sink).await
            }
        }
    }
}
