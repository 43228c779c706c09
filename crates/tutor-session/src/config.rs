//! Configuration types for the HSK Tutor server.
//!
//! Everything is read from a single `tutor.json`. Every field has a default,
//! so an empty object (or no file at all) yields a server running both bots
//! against the bundled data files.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TutorError};

/// The default config file name.
const CONFIG_FILE_NAME: &str = "tutor.json";

/// Default listen address.
fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

/// Default path for the file-backed store.
fn default_store_path() -> String {
    ".tutor/state.json".to_string()
}

/// Default model endpoint base URL.
fn default_base_url() -> String {
    "https://api.poe.com/v1".to_string()
}

/// Default name of the environment variable holding the API key.
fn default_api_key_env() -> String {
    "POE_API_KEY".to_string()
}

/// Default request timeout in seconds for a single model call.
const fn default_request_timeout() -> u64 {
    120
}

/// Default value for boolean options that default to true.
const fn default_true() -> bool {
    true
}

fn default_sentence_corpus() -> String {
    "data/chinese_sentences.txt".to_string()
}

fn default_word_list() -> String {
    "data/chinese_words.csv".to_string()
}

fn default_statement_prefix() -> String {
    "ChineseStatement".to_string()
}

fn default_vocab_prefix() -> String {
    "ChineseVocab".to_string()
}

fn default_judge_model() -> String {
    "Claude-3.5-Sonnet".to_string()
}

fn default_freeform_model() -> String {
    "ChatGPT".to_string()
}

fn default_tabulation_model() -> String {
    "Llama-3-8b-Groq".to_string()
}

fn default_suggestion_model() -> String {
    "Claude-3-Haiku".to_string()
}

/// Main configuration for the tutor server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Address the HTTP server listens on.
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Where per-user and per-conversation state is kept.
    #[serde(default)]
    pub store: StoreConfig,

    /// Upstream model endpoint.
    #[serde(default)]
    pub model: ModelConfig,

    /// Sentence translation bot.
    #[serde(default)]
    pub statement: StatementConfig,

    /// Vocabulary bot.
    #[serde(default)]
    pub vocab: VocabConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            store: StoreConfig::default(),
            model: ModelConfig::default(),
            statement: StatementConfig::default(),
            vocab: VocabConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `tutor.json` in the current directory. If not found, returns
    /// the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON or fails
    /// validation.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            TutorError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads `tutor.json` from a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON or fails
    /// validation.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        Self::load_from_file(&dir.join(CONFIG_FILE_NAME))
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigParseError` if the file exists but contains
    /// invalid JSON or invalid enum values.
    ///
    /// Returns `TutorError::ConfigValidationError` if the configuration
    /// values are invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(TutorError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| TutorError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `TutorError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.bind.trim().is_empty() {
            return Err(TutorError::config_validation(
                "bind must not be empty",
                "Set bind to an address such as \"127.0.0.1:8080\" in your tutor.json",
            ));
        }

        if self.store.kind == StoreKind::File && self.store.path.trim().is_empty() {
            return Err(TutorError::config_validation(
                "store.path must not be empty when store.kind is \"file\"",
                "Provide a state file path in your tutor.json",
            ));
        }

        if self.model.base_url.trim().is_empty() {
            return Err(TutorError::config_validation(
                "model.baseUrl must not be empty",
                "Point model.baseUrl at an OpenAI-compatible endpoint in your tutor.json",
            ));
        }

        if self.model.api_key_env.trim().is_empty() {
            return Err(TutorError::config_validation(
                "model.apiKeyEnv must not be empty",
                "Name the environment variable holding your API key in your tutor.json",
            ));
        }

        if self.model.request_timeout_secs == 0 {
            return Err(TutorError::config_validation(
                "model.requestTimeoutSecs must be greater than 0",
                "Set model.requestTimeoutSecs to at least 1 in your tutor.json",
            ));
        }

        if !self.statement.enabled && !self.vocab.enabled {
            return Err(TutorError::config_validation(
                "no bot is enabled",
                "Set statement.enabled or vocab.enabled to true in your tutor.json",
            ));
        }

        if self.statement.enabled {
            self.statement.validate()?;
        }
        if self.vocab.enabled {
            self.vocab.validate()?;
        }

        if self.statement.enabled
            && self.vocab.enabled
            && self.statement.key_prefix == self.vocab.key_prefix
        {
            return Err(TutorError::config_validation(
                format!(
                    "statement.keyPrefix and vocab.keyPrefix are both '{}'",
                    self.statement.key_prefix
                ),
                "Give each bot its own keyPrefix so their levels and problems do not collide",
            ));
        }

        Ok(())
    }
}

fn require(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(TutorError::config_validation(
            format!("{field} must not be empty"),
            format!("Provide a value for {field} in your tutor.json"),
        ));
    }
    Ok(())
}

// ============================================================================
// Store
// ============================================================================

/// Which key-value backend holds session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StoreKind {
    /// Process memory; state is lost on restart (default).
    #[default]
    Memory,
    /// A JSON file on disk.
    File,
}

impl StoreKind {
    /// Parses a string into a `StoreKind`, case-insensitively.
    fn from_str_case_insensitive(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "memory" => Some(Self::Memory),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

impl<'de> Deserialize<'de> for StoreKind {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_str_case_insensitive(&s).ok_or_else(|| {
            serde::de::Error::custom(format!(
                "invalid store kind '{s}': expected one of 'memory', 'file'"
            ))
        })
    }
}

impl Serialize for StoreKind {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let s = match self {
            Self::Memory => "memory",
            Self::File => "file",
        };
        serializer.serialize_str(s)
    }
}

/// Key-value store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreConfig {
    /// Backend kind.
    #[serde(default)]
    pub kind: StoreKind,

    /// State file, used when `kind` is `file`.
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            path: default_store_path(),
        }
    }
}

// ============================================================================
// Model endpoint
// ============================================================================

/// Upstream model endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelConfig {
    /// Base URL of an OpenAI-compatible API; `/chat/completions` is appended.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Environment variable the API key is read from.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Timeout for a single model call, streaming included.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

// ============================================================================
// Bots
// ============================================================================

/// Sentence translation bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementConfig {
    /// Whether the bot is served.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path to the sentence reference text.
    #[serde(default = "default_sentence_corpus")]
    pub corpus: String,

    /// Prefix for this bot's store keys.
    #[serde(default = "default_statement_prefix")]
    pub key_prefix: String,

    /// Model that judges translations.
    #[serde(default = "default_judge_model")]
    pub judge_model: String,

    /// Model for follow-up conversation.
    #[serde(default = "default_freeform_model")]
    pub freeform_model: String,
}

impl Default for StatementConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            corpus: default_sentence_corpus(),
            key_prefix: default_statement_prefix(),
            judge_model: default_judge_model(),
            freeform_model: default_freeform_model(),
        }
    }
}

impl StatementConfig {
    fn validate(&self) -> Result<()> {
        require(&self.corpus, "statement.corpus")?;
        require(&self.key_prefix, "statement.keyPrefix")?;
        require(&self.judge_model, "statement.judgeModel")?;
        require(&self.freeform_model, "statement.freeformModel")
    }
}

/// Vocabulary bot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocabConfig {
    /// Whether the bot is served.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Path to the CSV word list.
    #[serde(default = "default_word_list")]
    pub word_list: String,

    /// Prefix for this bot's store keys.
    #[serde(default = "default_vocab_prefix")]
    pub key_prefix: String,

    /// Model that tabulates the user's answer against the reference.
    #[serde(default = "default_tabulation_model")]
    pub tabulation_model: String,

    /// Model that judges the tabulated answer.
    #[serde(default = "default_tabulation_model")]
    pub judge_model: String,

    /// Model for follow-up conversation.
    #[serde(default = "default_freeform_model")]
    pub freeform_model: String,

    /// Model that proposes suggested replies.
    #[serde(default = "default_suggestion_model")]
    pub suggestion_model: String,
}

impl Default for VocabConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            word_list: default_word_list(),
            key_prefix: default_vocab_prefix(),
            tabulation_model: default_tabulation_model(),
            judge_model: default_tabulation_model(),
            freeform_model: default_freeform_model(),
            suggestion_model: default_suggestion_model(),
        }
    }
}

impl VocabConfig {
    fn validate(&self) -> Result<()> {
        require(&self.word_list, "vocab.wordList")?;
        require(&self.key_prefix, "vocab.keyPrefix")?;
        require(&self.tabulation_model, "vocab.tabulationModel")?;
        require(&self.judge_model, "vocab.judgeModel")?;
        require(&self.freeform_model, "vocab.freeformModel")?;
        require(&self.suggestion_model, "vocab.suggestionModel")
    }
}
