//! Segment and training-example types for sftgen.
//!
//! These types are the data flowing through the pipeline: segments come in,
//! training examples go out.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One unit of source text submitted for example generation.
///
/// Segments are immutable once loaded; their order defines processing order
/// and the resume offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    /// Record identifier, or the ordinal position when the record has none
    pub id: u64,

    /// The source text
    pub text: String,
}

/// Shape of training example being produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Question/answer pairs
    #[default]
    Qa,
    /// Style imitation: new content written in the source's style
    Style,
    /// Multi-turn conversation
    Chat,
    /// Instruction/output pairs
    Instruct,
}

impl GenerationMode {
    pub const ALL: [GenerationMode; 4] = [Self::Qa, Self::Style, Self::Chat, Self::Instruct];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Qa => "qa",
            Self::Style => "style",
            Self::Chat => "chat",
            Self::Instruct => "instruct",
        }
    }

    /// Keys the key/value fallback extractor looks for, if this mode has any.
    pub fn pair_keys(&self) -> Option<(&'static str, &'static str)> {
        match self {
            Self::Qa => Some(("question", "answer")),
            Self::Style | Self::Instruct => Some(("instruction", "output")),
            Self::Chat => None,
        }
    }
}

impl fmt::Display for GenerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GenerationMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "qa" => Ok(Self::Qa),
            "style" => Ok(Self::Style),
            "chat" => Ok(Self::Chat),
            "instruct" => Ok(Self::Instruct),
            other => Err(format!(
                "unknown mode '{other}' (expected qa, style, chat or instruct)"
            )),
        }
    }
}

/// Speaker of a training message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of a training example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Canonical training example, one line of `train.jsonl` / `valid.jsonl`.
///
/// Always holds at least two messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingExample {
    pub messages: Vec<Message>,
}

impl TrainingExample {
    /// Build a `[user, assistant]` example.
    pub fn pair(user: impl Into<String>, assistant: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::user(user), Message::assistant(assistant)],
        }
    }

    /// Build an example from model-supplied turns.
    ///
    /// Returns `None` when fewer than two turns are given.
    pub fn from_turns(messages: Vec<Message>) -> Option<Self> {
        (messages.len() >= 2).then_some(Self { messages })
    }

    /// Content of the first assistant turn.
    pub fn assistant_content(&self) -> Option<&str> {
        self.messages
            .iter()
            .find(|m| m.role == Role::Assistant)
            .map(|m| m.content.as_str())
    }

    /// Content of the first turn, used for log previews.
    pub fn first_content(&self) -> &str {
        self.messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// Statistics for a generation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunStats {
    /// Segments in the input (after the sample cap)
    pub total_segments: usize,

    /// Segments skipped because a previous run already covered them
    pub resumed_from: usize,

    /// Examples in the durable output, including resumed ones
    pub total_accepted: usize,

    /// Segments that produced no example (excluding similarity rejections)
    pub total_failed: usize,

    /// Style-mode examples rejected for copying the source
    pub similarity_rejected: usize,

    /// Lines written to train.jsonl
    pub train_count: usize,

    /// Lines written to valid.jsonl
    pub valid_count: usize,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Accepted examples per hour, this run only
    pub throughput_per_hour: f64,
}

impl RunStats {
    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.runtime_secs > 0.0 {
            let produced = self.total_accepted.saturating_sub(self.resumed_from);
            self.throughput_per_hour = produced as f64 / self.runtime_secs * 3600.0;
        }
    }
}

/// Truncate to at most `max_chars` Unicode scalar values.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
