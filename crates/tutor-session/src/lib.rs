//! HSK Tutor Session Layer
//!
//! Conversation lifecycle, tutor bots, model client and the HTTP API that
//! serves them.
//!
//! A turn flows from the API into a [`Bot`], which asks its
//! [`SessionManager`] what state the conversation is in, calls a
//! [`ModelClient`] when the state needs one, and writes [`BotEvent`]s to a
//! [`ResponseSink`]. All state lives behind a [`KeyValueStore`].

pub mod api;
pub mod bots;
pub mod config;
pub mod error;
pub mod events;
pub mod model;
pub mod protocol;
pub mod session;
pub mod store;
pub mod testing;
pub mod verdict;

pub use api::{create_router, AppState, ErrorResponse, StatusResponse, TurnStats};
pub use bots::{Bot, BotRegistry, BotSettings, StatementBot, VocabBot};
pub use config::{Config, ModelConfig, StatementConfig, StoreConfig, StoreKind, VocabConfig};
pub use error::{ModelErrorKind, Result, TutorError};
pub use events::{EventBroadcaster, SessionEvent};
pub use model::{ChatMessage, ChatRole, ChunkStream, CompletionRequest, HttpModelClient, ModelClient};
pub use protocol::{BotEvent, ProtocolMessage, ProtocolRole, QueryRequest, ResponseSink};
pub use session::{IssuedProblem, LifecyclePhrases, ProblemSource, SessionManager, Turn, TurnAction};
pub use store::{JsonFileStore, KeyValueStore, MemoryStore};
pub use verdict::{MarkerPhraseClassifier, Verdict, VerdictClassifier, VocabularyJudgeClassifier};
