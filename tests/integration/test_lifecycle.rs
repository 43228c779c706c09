//! End-to-end tests for the conversation lifecycle.
//!
//! These tests load the reference fixtures from disk and drive the tutor bots
//! through complete conversations against a scripted model, checking what
//! ends up in the store after every turn.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::json;
use tutor_corpus::sentences::is_sentence;
use tutor_corpus::{Level, SentenceCorpus, WordList, LEVEL_COUNT};
use tutor_session::testing::ScriptedModel;
use tutor_session::{
    Bot, BotEvent, Config, JsonFileStore, KeyValueStore, LifecyclePhrases, MemoryStore,
    ProtocolMessage, QueryRequest, ResponseSink, SessionManager, StatementBot, StatementConfig,
    StoreKind, TurnAction, Verdict, VocabBot, VocabConfig,
};

const JUDGE: &str = "Claude-3.5-Sonnet";
const FREEFORM: &str = "ChatGPT";
const PASS: &str = "Good work.\n- Your translation has captured the full meaning of the sentence.";

/// Path to the fixtures directory.
fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

fn load_sentences() -> Arc<SentenceCorpus> {
    let corpus = SentenceCorpus::load(fixture_path().join("chinese_sentences.txt"))
        .expect("Failed to load sentence fixture");
    Arc::new(corpus)
}

fn load_words() -> Arc<WordList> {
    let words =
        WordList::load(fixture_path().join("chinese_words.csv")).expect("Failed to load word fixture");
    Arc::new(words)
}

fn bucket_texts(corpus: &SentenceCorpus, level: u8) -> Vec<String> {
    let level = Level::new(level).expect("Invalid level");
    corpus
        .level(level)
        .expect("Missing level")
        .iter()
        .map(|entry| entry.text.clone())
        .collect()
}

/// Builds alternating user/bot history ending with a user message.
fn history(messages: &[&str]) -> Vec<ProtocolMessage> {
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| {
            if i % 2 == 0 {
                ProtocolMessage::user(*m)
            } else {
                ProtocolMessage::bot(*m)
            }
        })
        .collect()
}

/// Runs one turn and collects everything the bot streamed.
async fn turn(bot: &dyn Bot, conversation_id: &str, messages: &[&str]) -> Vec<BotEvent> {
    let request = QueryRequest {
        query: history(messages),
        user_id: "learner".to_string(),
        conversation_id: conversation_id.to_string(),
        message_id: None,
    };
    let (sink, mut receiver) = ResponseSink::channel(256);
    bot.respond(&request, &sink).await.expect("Turn failed");
    drop(sink);

    let mut events = Vec::new();
    while let Some(event) = receiver.recv().await {
        events.push(event);
    }
    events
}

fn text_of(events: &[BotEvent]) -> String {
    events
        .iter()
        .filter_map(|e| match e {
            BotEvent::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

/// Extracts the sampled item from a starting reply (the `# ` heading line).
fn presented_item(events: &[BotEvent]) -> String {
    text_of(events)
        .lines()
        .find_map(|line| line.strip_prefix("# "))
        .expect("No item presented")
        .to_string()
}

// ============================================================================
// Reference Material
// ============================================================================

/// Tests that the sentence fixture loads into seven filtered buckets.
#[test]
fn test_sentence_fixture_loads() {
    let corpus = load_sentences();

    assert_eq!(corpus.level_count(), LEVEL_COUNT);
    for bucket in corpus.levels() {
        assert!(!bucket.is_empty(), "Every fixture level has sentences");
        for entry in bucket {
            assert!(is_sentence(&entry.text), "Unfiltered entry: {}", entry.text);
        }
    }

    assert_eq!(
        bucket_texts(&corpus, 1),
        vec!["我是学生。", "你是老师吗？", "他有三本书。"]
    );
}

/// Tests that headers and annotations attach to the sentences below them.
#[test]
fn test_sentence_fixture_context() {
    let corpus = load_sentences();
    let level_one = corpus.level(Level::MIN).expect("Missing level 1");

    assert_eq!(
        level_one[0].context,
        vec!["A.1.1 词类", "A.1.1.1 代词", "【人称代词】"]
    );
    // A shallower header evicts the deeper one and both annotations.
    assert_eq!(level_one[2].context, vec!["A.1.2 数词"]);

    for entry in corpus.levels().iter().flatten() {
        let depths: Vec<usize> = entry
            .context
            .iter()
            .filter(|line| line.contains("A."))
            .map(|line| line.matches('.').count())
            .collect();
        assert!(
            depths.windows(2).all(|pair| pair[0] < pair[1]),
            "Headers out of order for {}: {:?}",
            entry.text,
            entry.context
        );
    }
}

/// Tests that the word fixture drops excluded rows and indexes by level.
#[test]
fn test_word_fixture_loads() {
    let words = load_words();

    assert_eq!(words.len(), 7);
    assert_eq!(words.excluded_count(), 1);
    for level in Level::all() {
        assert_eq!(words.level(level).len(), 1, "One word at level {level}");
    }
    let first = &words.level(Level::MIN)[0];
    assert_eq!(first.simplified, "学习");
    assert_eq!(first.traditional, "學習");
    assert_eq!(first.pinyin, "xue2 xi2");
}

/// Tests that the sample config loads successfully.
#[test]
fn test_sample_config_loads() {
    let config =
        Config::load_from_file(&fixture_path().join("tutor.json")).expect("Failed to load config");

    assert_eq!(config.bind, "127.0.0.1:9090");
    assert_eq!(config.store.kind, StoreKind::File);
    assert_eq!(config.model.api_key_env, "TUTOR_TEST_KEY");
    assert_eq!(config.model.request_timeout_secs, 30);
    assert!(config.statement.enabled);
    assert_eq!(config.statement.key_prefix, "ChineseStatement");
    assert_eq!(config.vocab.suggestion_model, "Claude-3-Haiku");
}

// ============================================================================
// Sentence Conversations
// ============================================================================

/// Walks a learner through start, a passing answer, a skip and an override.
#[tokio::test]
async fn test_sentence_conversation_walkthrough() {
    let corpus = load_sentences();
    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(ScriptedModel::new());
    let bot = StatementBot::new(
        &StatementConfig::default(),
        Arc::clone(&corpus),
        store.clone(),
        model.clone(),
    )
    .with_seed(42);

    // A new learner starts at level 1 with a fresh, unsubmitted problem.
    let events = turn(&bot, "conv", &["start"]).await;
    let first = presented_item(&events);
    assert!(bucket_texts(&corpus, 1).contains(&first));
    assert_eq!(store.get("ChineseStatement-level-learner").await.unwrap(), Some(json!(1)));
    assert!(store.get("ChineseStatement-problem-conv").await.unwrap().is_some());
    assert_eq!(store.get("ChineseStatement-submitted-conv").await.unwrap(), None);

    // A passing judgement promotes the learner and marks the submission.
    model.queue_reply(JUDGE, PASS);
    let events = turn(&bot, "conv", &["start", "...", "I am a student."]).await;
    assert!(text_of(&events).contains("captured the full meaning"));
    assert_eq!(store.get("ChineseStatement-level-learner").await.unwrap(), Some(json!(2)));
    assert_eq!(
        store.get("ChineseStatement-submitted-conv").await.unwrap(),
        Some(json!(true))
    );

    // Asking for another sentence clears the conversation and samples at level 2.
    let events = turn(
        &bot,
        "conv",
        &["start", "...", "I am a student.", "...", "I want another sentence."],
    )
    .await;
    let second = presented_item(&events);
    assert!(bucket_texts(&corpus, 2).contains(&second));
    assert_eq!(store.get("ChineseStatement-submitted-conv").await.unwrap(), None);

    // An override sets the level directly without judging the message.
    let events = turn(
        &bot,
        "conv",
        &["start", "...", "I am a student.", "...", "I want another sentence.", "...", "4"],
    )
    .await;
    assert!(text_of(&events).starts_with("Your level is now HSK 4."));
    assert_eq!(store.get("ChineseStatement-level-learner").await.unwrap(), Some(json!(4)));
    assert_eq!(model.requests_for(JUDGE).len(), 1);

    // The override applies to the next sample.
    let events = turn(&bot, "conv", &["I will pass this sentence."]).await;
    let third = presented_item(&events);
    assert!(bucket_texts(&corpus, 4).contains(&third));
}

/// Tests that follow-up questions after a verdict go to the freeform model.
#[tokio::test]
async fn test_follow_up_after_verdict_is_freeform() {
    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(ScriptedModel::new());
    let bot = StatementBot::new(&StatementConfig::default(), load_sentences(), store, model.clone())
        .with_seed(3);

    turn(&bot, "conv", &["start"]).await;
    model.queue_reply(JUDGE, "The verb is missing.");
    turn(&bot, "conv", &["start", "...", "he book"]).await;
    model.queue_reply(FREEFORM, "Try adding a verb.");

    let events = turn(&bot, "conv", &["start", "...", "he book", "...", "Which verb?"]).await;

    assert_eq!(text_of(&events), "Try adding a verb.");
    assert_eq!(model.requests_for(JUDGE).len(), 1);
    assert_eq!(model.requests_for(FREEFORM).len(), 1);
    assert_eq!(model.pending(), 0);
}

/// Tests that two conversations of the same learner keep separate problems.
#[tokio::test]
async fn test_conversations_are_independent() {
    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(ScriptedModel::new());
    let bot = StatementBot::new(&StatementConfig::default(), load_sentences(), store.clone(), model.clone());

    turn(&bot, "first", &["start"]).await;
    model.queue_reply(JUDGE, PASS);
    turn(&bot, "first", &["start", "...", "answer"]).await;

    // The shared level moved, but the second conversation starts fresh.
    turn(&bot, "second", &["start"]).await;
    assert!(!bot.session().is_submitted("second").await.unwrap());
    assert!(bot.session().is_submitted("first").await.unwrap());
    let second = bot
        .session()
        .stored_problem("second")
        .await
        .unwrap()
        .expect("No problem stored");
    assert_eq!(second.level, Level::new(2).expect("Invalid level"));
}

// ============================================================================
// Session Manager Properties
// ============================================================================

fn manager(store: Arc<dyn KeyValueStore>) -> SessionManager<SentenceCorpus> {
    let corpus = SentenceCorpus::parse("A.1 一级\n我是学生。\nA.2 二级\n他在看书。\n")
        .expect("Failed to parse corpus");
    SessionManager::new(
        "ChineseStatement",
        "ChineseStatement",
        LifecyclePhrases::sentence(),
        Arc::new(corpus),
        store,
    )
}

/// Tests that skipping with nothing stored leaves the store untouched.
#[tokio::test]
async fn test_skip_without_problem_is_noop() {
    let store = Arc::new(MemoryStore::new());
    store
        .set("ChineseStatement-level-learner", json!(3))
        .await
        .unwrap();
    let session = manager(store.clone());
    let before = store.snapshot().await;

    assert!(!session.reset("conv").await.unwrap());
    assert_eq!(store.snapshot().await, before);
}

/// Tests that the stored level stays within 1..=7 under any verdict sequence.
#[tokio::test]
async fn test_level_stays_clamped() {
    let store = Arc::new(MemoryStore::new());
    let session = manager(store.clone());

    let mut level = session.user_level("learner").await.unwrap();
    for _ in 0..10 {
        level = session
            .record_verdict("learner", "conv", level, Verdict::Pass)
            .await
            .unwrap();
    }
    assert_eq!(level, Level::MAX);
    assert_eq!(store.get("ChineseStatement-level-learner").await.unwrap(), Some(json!(7)));

    for _ in 0..10 {
        level = session
            .record_verdict("learner", "conv", level, Verdict::Fail)
            .await
            .unwrap();
    }
    assert_eq!(level, Level::MIN);

    store
        .set("ChineseStatement-level-learner", json!(12))
        .await
        .unwrap();
    assert_eq!(session.user_level("learner").await.unwrap(), Level::MAX);
}

/// Tests that a level without sentences fails the turn without changing state.
#[tokio::test]
async fn test_missing_level_fails_turn() {
    let store = Arc::new(MemoryStore::new());
    let session = manager(store.clone());
    store
        .set("ChineseStatement-level-learner", json!(5))
        .await
        .unwrap();
    let before = store.snapshot().await;

    let result = session.begin_turn("learner", "conv", "start").await;

    assert!(result.is_err());
    assert_eq!(store.snapshot().await, before);
}

/// Tests that an override on a fresh conversation samples at the new level.
#[tokio::test]
async fn test_override_on_fresh_conversation_samples_immediately() {
    let session = manager(Arc::new(MemoryStore::new()));

    let turn = session.begin_turn("learner", "conv", "2").await.unwrap();

    assert_eq!(turn.overridden, Level::new(2));
    match turn.action {
        TurnAction::EmitNewProblem(issued) => assert_eq!(issued.problem.text, "他在看书。"),
        other => panic!("Expected a new problem, got {}", other.name()),
    }
}

// ============================================================================
// Vocabulary Conversations
// ============================================================================

const TABLE: &str = "\
|             | Pinyin   | Meaning  |
| ----------- | -------- | -------- |
| Your answer | xue2 xi2 | to learn |
| Reference   | xue2 xi2 | to study |";

/// Tests a vocabulary conversation from start to promotion.
#[tokio::test]
async fn test_vocabulary_conversation_promotes() {
    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(ScriptedModel::new());
    let config = VocabConfig::default();
    let bot = VocabBot::new(&config, load_words(), store.clone(), model.clone())
        .expect("Failed to build bot");

    let events = turn(&bot, "conv", &["start"]).await;
    assert_eq!(presented_item(&events), "学习");

    model.queue_reply(&config.tabulation_model, TABLE);
    model.queue_reply(
        &config.judge_model,
        "The pinyin is correct. The tone is correct. The meaning is correct.",
    );
    let events = turn(&bot, "conv", &["start", "...", "xue2 xi2, to learn"]).await;

    assert!(text_of(&events).starts_with(TABLE));
    assert_eq!(store.get("ChineseVocab-level-learner").await.unwrap(), Some(json!(2)));
    assert!(bot.session().is_submitted("conv").await.unwrap());

    let events = turn(
        &bot,
        "conv",
        &["start", "...", "xue2 xi2, to learn", "...", "I want another word."],
    )
    .await;
    assert_eq!(presented_item(&events), "朋友");
}

/// Tests that both bots keep their levels apart for the same learner.
#[tokio::test]
async fn test_bots_share_store_without_collisions() {
    let store = Arc::new(MemoryStore::new());
    let model = Arc::new(ScriptedModel::new());
    let statement = StatementBot::new(
        &StatementConfig::default(),
        load_sentences(),
        store.clone(),
        model.clone(),
    );
    let vocab = VocabBot::new(&VocabConfig::default(), load_words(), store.clone(), model.clone())
        .expect("Failed to build bot");

    turn(&statement, "conv", &["5"]).await;
    turn(&vocab, "conv", &["start"]).await;

    assert_eq!(store.get("ChineseStatement-level-learner").await.unwrap(), Some(json!(5)));
    assert_eq!(store.get("ChineseVocab-level-learner").await.unwrap(), Some(json!(1)));
    assert!(store.get("ChineseStatement-problem-conv").await.unwrap().is_some());
    assert!(store.get("ChineseVocab-problem-conv").await.unwrap().is_some());
}

// ============================================================================
// Persistence
// ============================================================================

/// Tests that a conversation survives reopening the state file.
#[tokio::test]
async fn test_file_store_survives_restart() {
    let path = std::env::temp_dir().join(format!("tutor-state-{}.json", std::process::id()));
    let _ = std::fs::remove_file(&path);
    let model = Arc::new(ScriptedModel::new());
    let corpus = load_sentences();

    let problem = {
        let store = Arc::new(JsonFileStore::open(&path).await.expect("Failed to open store"));
        let bot = StatementBot::new(
            &StatementConfig::default(),
            Arc::clone(&corpus),
            store,
            model.clone(),
        );
        presented_item(&turn(&bot, "conv", &["start"]).await)
    };

    let store = Arc::new(JsonFileStore::open(&path).await.expect("Failed to reopen store"));
    let bot = StatementBot::new(&StatementConfig::default(), corpus, store, model.clone());
    let stored = bot
        .session()
        .stored_problem("conv")
        .await
        .unwrap()
        .expect("Problem lost on restart");
    assert_eq!(stored.problem.text, problem);

    model.queue_reply(JUDGE, PASS);
    turn(&bot, "conv", &["start", "...", "answer"]).await;
    assert_eq!(
        bot.session().user_level("learner").await.unwrap(),
        Level::new(2).expect("Invalid level")
    );

    let _ = std::fs::remove_file(&path);
}
