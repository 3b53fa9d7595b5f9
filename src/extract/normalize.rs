//! Map an untyped parsed object onto the canonical training-example shape.
//!
//! This is the only place that pokes at the recovered JSON by key. Everything
//! downstream works with [`ParsedRecord`] or [`TrainingExample`].

use crate::extract::ParsedObject;
use crate::models::{GenerationMode, Message, Role, TrainingExample};
use serde_json::Value;

/// A recovered object that passed the mode's schema check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedRecord {
    /// QA mode
    Qa { question: String, answer: String },
    /// Style and Instruct modes
    Pair { instruction: String, output: String },
    /// Chat mode, turns in model order
    Conversation(TrainingExample),
}

impl ParsedRecord {
    pub fn into_example(self) -> TrainingExample {
        match self {
            Self::Qa { question, answer } => TrainingExample::pair(question, answer),
            Self::Pair {
                instruction,
                output,
            } => TrainingExample::pair(instruction, output),
            Self::Conversation(example) => example,
        }
    }
}

/// Read a field as text. Blank strings, `null`, `false`, arrays and objects
/// all count as missing.
fn text_field(object: &ParsedObject, key: &str) -> Option<String> {
    match object.get(key)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(true) => Some("true".to_string()),
        _ => None,
    }
}

fn parse_role(value: &Value) -> Option<Role> {
    match value.as_str()?.trim().to_ascii_lowercase().as_str() {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        _ => None,
    }
}

fn parse_turn(value: &Value) -> Option<Message> {
    let turn = value.as_object()?;
    let role = parse_role(turn.get("role")?)?;
    let content = text_field(turn, "content")?;
    Some(Message { role, content })
}

fn conversation(object: &ParsedObject) -> Option<TrainingExample> {
    let turns = object.get("conversations")?.as_array()?;
    let messages = turns.iter().map(parse_turn).collect::<Option<Vec<Message>>>()?;
    TrainingExample::from_turns(messages)
}

/// Check `object` against the schema for `mode`.
///
/// `None` means the object is syntactically fine but semantically incomplete.
pub fn normalize(object: &ParsedObject, mode: GenerationMode) -> Option<ParsedRecord> {
    match mode {
        GenerationMode::Qa => Some(ParsedRecord::Qa {
            question: text_field(object, "question")?,
            answer: text_field(object, "answer")?,
        }),
        GenerationMode::Style | GenerationMode::Instruct => Some(ParsedRecord::Pair {
            instruction: text_field(object, "instruction")?,
            output: text_field(object, "output")?,
        }),
        GenerationMode::Chat => conversation(object).map(ParsedRecord::Conversation),
    }
}
