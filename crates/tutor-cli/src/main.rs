//! HSK Tutor CLI
//!
//! Loads the reference material and serves the tutor bots over HTTP.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;
use tutor_corpus::{Level, SentenceCorpus, WordList, LEVEL_COUNT};
use tutor_session::{
    create_router, AppState, BotRegistry, Config, EventBroadcaster, HttpModelClient,
    JsonFileStore, KeyValueStore, MemoryStore, ModelClient, StatementBot, StoreConfig, StoreKind,
    VocabBot,
};

/// HSK Tutor - Chinese practice bots
///
/// Serves a sentence translation tutor and a vocabulary tutor that adapt to
/// each learner's HSK level.
#[derive(Parser, Debug)]
#[command(name = "hsk-tutor")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: tutor.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Address to listen on, overriding the configuration
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,

    /// Load configuration and reference material, print a summary and exit
    #[arg(long)]
    check: bool,
}

/// Reference material for the enabled bots.
struct Corpora {
    sentences: Option<Arc<SentenceCorpus>>,
    words: Option<Arc<WordList>>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("HSK Tutor starting");
    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Loads everything, then serves until Ctrl+C.
async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(bind) = args.bind {
        config.bind = bind;
    }
    config.validate()?;

    print_config(&config);

    let corpora = load_corpora(&config)?;
    print_corpus_info(&corpora);

    if args.check {
        println!();
        println!("Configuration and reference material OK");
        return Ok(());
    }

    let store = open_store(&config.store).await?;
    let model = build_model_client(&config)?;
    let broadcaster = EventBroadcaster::default();
    let registry = build_registry(&config, &corpora, &store, &model, &broadcaster)?;

    let state = AppState::new(Arc::new(registry), broadcaster);
    let router = create_router(state);

    let listener = TcpListener::bind(&config.bind).await.map_err(|e| {
        anyhow::anyhow!(
            "Failed to bind to {}: {e}\n\nSuggestion: Try a different address with --bind",
            config.bind
        )
    })?;

    println!();
    println!("HTTP API server running on http://{}", config.bind);
    println!("Press Ctrl+C to stop");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("HSK Tutor stopped");
    Ok(())
}

/// Loads configuration from the specified path or the current directory.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

/// Loads the reference material each enabled bot samples from.
fn load_corpora(config: &Config) -> anyhow::Result<Corpora> {
    let sentences = if config.statement.enabled {
        tracing::info!(path = %config.statement.corpus, "Loading sentence corpus");
        let corpus = SentenceCorpus::load(&config.statement.corpus)?;
        if corpus.level_count() != LEVEL_COUNT {
            tracing::warn!(
                found = corpus.level_count(),
                expected = LEVEL_COUNT,
                "Sentence corpus level count differs; missing levels cannot be sampled"
            );
        }
        for level in corpus.empty_levels() {
            tracing::warn!(level, "No sentences available at level");
        }
        Some(Arc::new(corpus))
    } else {
        None
    };

    let words = if config.vocab.enabled {
        tracing::info!(path = %config.vocab.word_list, "Loading word list");
        let words = WordList::load(&config.vocab.word_list)?;
        for level in Level::all().filter(|l| words.level(*l).is_empty()) {
            tracing::warn!(level = %level, "No words available at level");
        }
        Some(Arc::new(words))
    } else {
        None
    };

    Ok(Corpora { sentences, words })
}

/// Opens the configured key-value store.
async fn open_store(config: &StoreConfig) -> anyhow::Result<Arc<dyn KeyValueStore>> {
    match config.kind {
        StoreKind::Memory => {
            tracing::warn!("Using in-memory store; learner progress is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::File => {
            let store = JsonFileStore::open(&config.path).await?;
            tracing::info!(path = %store.path().display(), "Opened state file");
            Ok(Arc::new(store))
        }
    }
}

/// Builds the upstream model client, reading the API key from the environment.
fn build_model_client(config: &Config) -> anyhow::Result<Arc<dyn ModelClient>> {
    let api_key = std::env::var(&config.model.api_key_env)
        .ok()
        .filter(|key| !key.trim().is_empty());
    if api_key.is_none() {
        tracing::warn!(
            variable = %config.model.api_key_env,
            "API key not set; model calls will be sent without credentials"
        );
    }

    let client = HttpModelClient::new(
        &config.model.base_url,
        api_key,
        Duration::from_secs(config.model.request_timeout_secs),
    )?;
    tracing::debug!(endpoint = %client.endpoint(), "Model endpoint");
    Ok(Arc::new(client))
}

/// Registers a bot for every enabled section.
fn build_registry(
    config: &Config,
    corpora: &Corpora,
    store: &Arc<dyn KeyValueStore>,
    model: &Arc<dyn ModelClient>,
    broadcaster: &EventBroadcaster,
) -> anyhow::Result<BotRegistry> {
    let mut registry = BotRegistry::new();

    if let Some(sentences) = &corpora.sentences {
        let bot = StatementBot::new(
            &config.statement,
            Arc::clone(sentences),
            Arc::clone(store),
            Arc::clone(model),
        )
        .with_events(broadcaster.clone());
        registry.register(Arc::new(bot));
    }

    if let Some(words) = &corpora.words {
        let bot = VocabBot::new(
            &config.vocab,
            Arc::clone(words),
            Arc::clone(store),
            Arc::clone(model),
        )?
        .with_events(broadcaster.clone());
        registry.register(Arc::new(bot));
    }

    tracing::info!(bots = ?registry.names(), "Bots registered");
    Ok(registry)
}

/// Resolves when Ctrl+C is received.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("Received Ctrl+C, shutting down");
}

/// Prints configuration summary.
fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Bind address: {}", config.bind);
    println!("  Store: {:?} ({})", config.store.kind, config.store.path);
    println!("  Model endpoint: {}", config.model.base_url);
    println!(
        "  Sentence bot: {}",
        if config.statement.enabled { "enabled" } else { "disabled" }
    );
    println!(
        "  Vocabulary bot: {}",
        if config.vocab.enabled { "enabled" } else { "disabled" }
    );
}

/// Prints per-level entry counts.
fn print_corpus_info(corpora: &Corpora) {
    if let Some(sentences) = &corpora.sentences {
        println!();
        println!("Sentence corpus loaded:");
        println!("  Levels: {}", sentences.level_count());
        println!("  Sentences: {}", sentences.entry_count());
        for (index, bucket) in sentences.levels().iter().enumerate() {
            println!("    Level {}: {}", index + 1, bucket.len());
        }
    }

    if let Some(words) = &corpora.words {
        println!();
        println!("Word list loaded:");
        println!("  Words: {} ({} excluded)", words.len(), words.excluded_count());
        for level in Level::all() {
            println!("    Level {level}: {}", words.level(level).len());
        }
    }
}
