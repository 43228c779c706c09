//! Reply templates and model instructions for the tutor bots.
//!
//! Phrases a client may send back verbatim (suggested replies) are constants
//! so the bots can recognise them on the next turn.

use std::fmt::Write;

use tutor_corpus::{Level, ScriptFormat, WordRecord};

use crate::protocol::{ProtocolMessage, ProtocolRole};
use crate::verdict::VocabularyJudgeClassifier;

/// Suggested after a judged translation.
pub const SIMILAR_SENTENCES: &str = "What are other sentences with a similar structure?";

/// Switches the vocabulary bot to traditional characters.
pub const PREFER_TRADITIONAL: &str = "I prefer traditional characters.";

/// Switches the vocabulary bot to simplified characters.
pub const PREFER_SIMPLIFIED: &str = "I prefer simplified characters.";

/// A markdown table separator; its presence means the answer was tabulated.
pub const TABLE_RULE: &str = "-----";

/// Closing line the translation judge writes for a complete translation.
pub const TRANSLATION_PASS_LINE: &str =
    "Your translation has captured the full meaning of the sentence.";

/// Most suggestions taken from the suggestion model.
pub const MAX_MODEL_SUGGESTIONS: usize = 3;

/// Pattern delimiting one suggestion in the suggestion model's output.
pub const SUGGESTION_PATTERN: &str = r"(?s)<a>(.+?)</a>";

/// Confirms a level override that applies from the next problem on.
#[must_use]
pub fn level_set_reply(level: Level, item: &str) -> String {
    format!("Your level is now HSK {level}. The next {item} will be drawn from it.")
}

// ============================================================================
// Sentence bot
// ============================================================================

/// Presents a freshly sampled sentence.
#[must_use]
pub fn sentence_starting_reply(level: Level, sentence: &str) -> String {
    format!(
        "The statement sampled from HSK level {level} is\n\n# {sentence}\n\nPlease translate the sentence."
    )
}

/// Instructions for judging a translation of `sentence`.
#[must_use]
pub fn sentence_judge_prompt(sentence: &str) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "You are checking a learner's English translation of a Chinese sentence.");
    let _ = writeln!(prompt, "The sentence is: {sentence}");
    let _ = writeln!(prompt, "Point out anything the translation gets wrong or leaves out.");
    let _ = writeln!(prompt, "Only when nothing of substance is missing, finish with this exact line:");
    let _ = write!(prompt, "- {TRANSLATION_PASS_LINE}");
    prompt
}

/// Instructions for open follow-up about a sentence with these headers.
#[must_use]
pub fn sentence_freeform_prompt(context: &[String]) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "You are a patient teacher of Mandarin Chinese.");
    let _ = writeln!(prompt, "Steer the conversation towards what helps the learner most.");
    let _ = write!(prompt, "The sentence under discussion comes from this part of the grammar outline: ");
    if context.is_empty() {
        let _ = write!(prompt, "(no section recorded)");
    } else {
        let _ = write!(prompt, "{}", context.join(" > "));
    }
    prompt
}

// ============================================================================
// Vocabulary bot
// ============================================================================

/// Presents a freshly sampled word.
#[must_use]
pub fn word_starting_reply(level: Level, word: &str) -> String {
    format!(
        "The word sampled from HSK level {level} is\n\n# {word}\n\nPlease provide the **pinyin** and a **meaning** of the word."
    )
}

/// Instructions for putting the learner's answer next to the reference.
#[must_use]
pub fn word_tabulation_prompt(word: &WordRecord) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "You are quizzing a learner on a Chinese word.");
    let _ = writeln!(prompt, "They should answer with its pinyin, tones written as digits, and a meaning.");
    let _ = writeln!(prompt, "Word: {}", word.simplified);
    let _ = writeln!(prompt, "Reference pinyin: {}", word.pinyin);
    let _ = writeln!(prompt, "Reference meaning: {}", word.translation);
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Answer only with a markdown table comparing the two, for example:");
    let _ = writeln!(prompt, "|             | Pinyin     | Meaning              |");
    let _ = writeln!(prompt, "| ----------- | ---------- | -------------------- |");
    let _ = writeln!(prompt, "| Your answer | xue2 xi2   | to learn             |");
    let _ = writeln!(prompt, "| Reference   | xue2 xi2   | to study, to learn   |");
    let _ = writeln!(prompt);
    let _ = write!(prompt, "Always produce the table and write nothing after it.");
    prompt
}

/// Instructions for grading a tabulated answer for `word`.
///
/// The three verdict lines are what [`VocabularyJudgeClassifier`] scans for.
#[must_use]
pub fn word_judge_prompt(word: &str, tabulation: &str) -> String {
    let [pinyin, tone, meaning] = VocabularyJudgeClassifier::PASS_MARKERS;
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Grade the row labelled \"Your answer\" for the word {word}.");
    let _ = writeln!(prompt, "{}", tabulation.trim());
    let _ = writeln!(prompt);
    let _ = writeln!(prompt, "Reply with exactly three lines and nothing else.");
    let _ = writeln!(prompt, "Line 1, judging the letters only: The {pinyin}. / The pinyin is incorrect. / The pinyin is missing.");
    let _ = writeln!(prompt, "Line 2, judging the digits only: The numerical {tone}. / The numerical tone is incorrect. / The numerical tone is missing.");
    let _ = writeln!(prompt, "Line 3: The {meaning}. / The meaning is incorrect. / The meaning is missing.");
    let _ = write!(prompt, "Accept any valid meaning, even one absent from the reference.");
    prompt
}

/// One-line reminder of the script to use, written in that script.
#[must_use]
pub const fn script_reminder(format: ScriptFormat) -> &'static str {
    match format {
        ScriptFormat::Simplified => "请使用简体中文。",
        ScriptFormat::Traditional => "請使用繁體中文。",
    }
}

/// Instructions for open follow-up about a word.
#[must_use]
pub fn word_freeform_prompt(format: ScriptFormat) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "You are a patient teacher of Mandarin Chinese.");
    let _ = writeln!(prompt, "Steer the conversation towards what helps the learner most.");
    let _ = writeln!(prompt, "Write every Chinese character in {format} form.");
    let _ = writeln!(prompt, "Vary your examples as much as you can.");
    let _ = write!(prompt, "Reminder: {format} characters only. {}", script_reminder(format));
    prompt
}

/// System instructions for the suggestion model.
pub const SUGGESTION_SYSTEM_PROMPT: &str =
    "Propose short replies the learner could send next in the conversation you are given.";

/// Request for follow-up suggestions about `word`.
#[must_use]
pub fn suggestion_prompt(word: &str) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "Given the conversation above, propose three short next messages for the learner.");
    let _ = writeln!(prompt, "Suitable shapes include:");
    let _ = writeln!(prompt, "- How do I use {word} in a sentence?");
    let _ = writeln!(prompt, "- Which words are related to {word}?");
    let _ = writeln!(prompt, "- How is {word} different from a word that looks like it?");
    let _ = writeln!(prompt, "- What does each character of {word} mean?");
    let _ = writeln!(prompt, "Wrap each suggestion in <a> and </a>.");
    let _ = write!(prompt, "No quotation marks and no numbering.");
    prompt
}

/// Suggested after a tabulated answer: using the word.
#[must_use]
pub fn word_usage_suggestion(word: &str) -> String {
    format!("What are some ways to use {word} in a sentence?")
}

/// Suggested after a tabulated answer: related words.
#[must_use]
pub fn related_words_suggestion(word: &str) -> String {
    format!("What are some words related to {word}?")
}

/// Returns the phrase that switches to `format`.
#[must_use]
pub const fn format_phrase(format: ScriptFormat) -> &'static str {
    match format {
        ScriptFormat::Simplified => PREFER_SIMPLIFIED,
        ScriptFormat::Traditional => PREFER_TRADITIONAL,
    }
}

/// Recognises a script preference message.
#[must_use]
pub fn parse_format_phrase(message: &str) -> Option<ScriptFormat> {
    match message.trim() {
        PREFER_SIMPLIFIED => Some(ScriptFormat::Simplified),
        PREFER_TRADITIONAL => Some(ScriptFormat::Traditional),
        _ => None,
    }
}

/// Flattens a conversation for the suggestion model, leaving out system
/// messages.
#[must_use]
pub fn transcript(messages: &[ProtocolMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        let speaker = match message.role {
            ProtocolRole::System => continue,
            ProtocolRole::User => "Student",
            ProtocolRole::Bot => "Tutor",
        };
        let _ = write!(out, "{speaker}: {}\n\n", message.content);
    }
    out
}
