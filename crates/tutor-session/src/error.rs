//! Error types for the HSK Tutor session layer.
//!
//! This module defines the error hierarchy for configuration loading, corpus
//! loading, state persistence, model invocation and request handling.

use std::path::PathBuf;

use tutor_corpus::{CorpusError, Level};

/// A specialized `Result` type for tutor operations.
pub type Result<T> = std::result::Result<T, TutorError>;

/// Errors that can occur while serving tutor conversations.
///
/// Startup errors (configuration, corpus) carry actionable suggestions.
/// Turn errors (store, model, disconnect) end the current turn without
/// touching persisted state, so the next turn can retry the same transition.
#[derive(Debug, thiserror::Error)]
pub enum TutorError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your tutor.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Corpus Errors
    // ========================================================================
    /// Reference material could not be loaded.
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    /// The level bucket a user was due to sample from holds no entries.
    #[error("No entries available at level {level}\n\nSuggestion: Add entries for level {level} to the corpus or exclude fewer words")]
    EmptyLevel {
        /// The level that was sampled.
        level: Level,
    },

    // ========================================================================
    // State Store Errors
    // ========================================================================
    /// The key-value store failed to read or write.
    #[error("State store error: {message}")]
    Store {
        /// Description of the failure.
        message: String,
    },

    /// The persisted store file cannot be decoded.
    #[error("Corrupted store file '{path}': {message}\n\nSuggestion: Remove the store file to start fresh, or restore from backup")]
    StoreCorrupted {
        /// Path to the corrupted store file.
        path: PathBuf,
        /// Description of the corruption.
        message: String,
    },

    // ========================================================================
    // Model Errors
    // ========================================================================
    /// The upstream model failed or returned an error.
    #[error("Model error ({kind}): {message}\n\nSuggestion: {suggestion}")]
    Model {
        /// The kind of failure.
        kind: ModelErrorKind,
        /// Detailed error message.
        message: String,
        /// Actionable suggestion for the operator.
        suggestion: String,
    },

    // ========================================================================
    // Request Errors
    // ========================================================================
    /// The incoming request is malformed.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No bot is registered under the requested name.
    #[error("Unknown bot: '{0}'")]
    UnknownBot(String),

    /// The client stopped reading the response stream.
    #[error("Client disconnected")]
    ClientDisconnected,

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A built-in pattern failed to compile.
    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Categories of model invocation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelErrorKind {
    /// Authentication failure (missing or invalid API key).
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues.
    Network,
    /// The response could not be decoded.
    Protocol,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for ModelErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::Protocol => write!(f, "protocol"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl ModelErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check the API key environment variable named in tutor.json",
            Self::RateLimit => "Wait and retry, or reduce request frequency",
            Self::Server => "Retry later; the model service may be experiencing issues",
            Self::Network => "Check your network connection and the model baseUrl",
            Self::Protocol => "Check that baseUrl points at an OpenAI-compatible endpoint",
            Self::Other => "Check the model provider's status page",
        }
    }

    /// Classifies an HTTP status code returned by the model endpoint.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }
}

impl TutorError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `Store` error.
    #[must_use]
    pub fn store(message: impl Into<String>) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    /// Creates a new `StoreCorrupted` error.
    #[must_use]
    pub fn store_corrupted(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StoreCorrupted {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `Model` error with automatic suggestion based on error kind.
    #[must_use]
    pub fn model(kind: ModelErrorKind, message: impl Into<String>) -> Self {
        let suggestion = kind.suggestion().to_string();
        Self::Model {
            kind,
            message: message.into(),
            suggestion,
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// Returns `true` if this error is transient and the turn may be retried.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Model {
                kind: ModelErrorKind::RateLimit | ModelErrorKind::Server | ModelErrorKind::Network,
                ..
            } | Self::Store { .. }
        )
    }

    /// Returns `true` if this error is fatal and the server must not start.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. }
                | Self::ConfigValidationError { .. }
                | Self::Corpus(_)
                | Self::StoreCorrupted { .. }
        )
    }
}
