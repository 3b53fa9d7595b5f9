//! Fallback chain that digs a JSON object out of arbitrary model text.
//!
//! Strategies run in a fixed order and the first success wins. Later
//! strategies are more permissive and more likely to produce a false
//! positive, so the order must not change.

use crate::extract::repair_json;
use crate::models::GenerationMode;
use regex::Regex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::LazyLock;

/// Untyped JSON object recovered from a reply.
pub type ParsedObject = Map<String, Value>;

/// Which strategy produced the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Whole text (fence stripped) parsed as-is
    Direct,
    /// Whole text parsed after repair
    Repaired,
    /// A balanced `{...}` span, parsed as-is or after repair
    BalancedSpan,
    /// Key/value regex extraction for pair modes
    KeyValue,
    /// A flat `{...}` substring
    FlatObject,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Direct => "direct",
            Self::Repaired => "repaired",
            Self::BalancedSpan => "balanced_span",
            Self::KeyValue => "key_value",
            Self::FlatObject => "flat_object",
        };
        f.write_str(name)
    }
}

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*\n?(.*?)\n?\s*```").expect("static pattern"));

static FLAT_OBJECT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{[^{}]*\}").expect("static pattern"));

/// Regexes for one pair of required keys.
struct PairPatterns {
    first: &'static str,
    second: &'static str,
    strict_first: Regex,
    strict_second: Regex,
    lax_first: Regex,
    lax_second: Regex,
}

impl PairPatterns {
    fn new(first: &'static str, second: &'static str) -> Self {
        let strict = |key: &str| {
            Regex::new(&format!(r#"(?s)"{key}"\s*:\s*"((?:[^"\\]|\\.)*)""#))
                .expect("static pattern")
        };
        Self {
            first,
            second,
            strict_first: strict(first),
            strict_second: strict(second),
            // Lax patterns tolerate unescaped quotes by anchoring on what follows.
            lax_first: Regex::new(&format!(r#"(?s)"{first}"\s*:\s*"(.+?)"\s*,\s*"{second}""#))
                .expect("static pattern"),
            lax_second: Regex::new(&format!(r#"(?s)"{second}"\s*:\s*"(.+?)"\s*\}}"#))
                .expect("static pattern"),
        }
    }

    fn extract(&self, text: &str) -> Option<ParsedObject> {
        let capture = |re: &Regex| re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str());

        let (first, second) = match (capture(&self.strict_first), capture(&self.strict_second)) {
            (Some(a), Some(b)) => (a, b),
            _ => (capture(&self.lax_first)?, capture(&self.lax_second)?),
        };

        let mut object = Map::new();
        object.insert(self.first.to_string(), Value::String(decode_captured(first)));
        object.insert(self.second.to_string(), Value::String(decode_captured(second)));
        Some(object)
    }
}

static QA_PATTERNS: LazyLock<PairPatterns> =
    LazyLock::new(|| PairPatterns::new("question", "answer"));

static INSTRUCTION_PATTERNS: LazyLock<PairPatterns> =
    LazyLock::new(|| PairPatterns::new("instruction", "output"));

fn pair_patterns(mode: GenerationMode) -> Option<&'static PairPatterns> {
    match mode.pair_keys()? {
        ("question", _) => Some(&*QA_PATTERNS),
        _ => Some(&*INSTRUCTION_PATTERNS),
    }
}

/// Turn a captured string body into its value, resolving JSON escapes.
///
/// Falls back to the raw capture when it is not a valid string literal.
fn decode_captured(raw: &str) -> String {
    let quoted = format!("\"{raw}\"");
    serde_json::from_str::<String>(&quoted)
        .or_else(|_| serde_json::from_str::<String>(&repair_json(&quoted)))
        .unwrap_or_else(|_| raw.to_string())
}

/// Strict parse, accepting only objects.
fn parse_strict(text: &str) -> Option<ParsedObject> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(object)) => Some(object),
        _ => None,
    }
}

/// Keep only the interior of the first fenced code block, if any.
fn strip_code_fence(text: &str) -> &str {
    CODE_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map_or(text, |m| m.as_str().trim())
}

/// Walk top-level `{...}` spans by raw brace depth and parse the first that works.
///
/// Braces inside strings are counted too; a span that is cut wrong simply
/// fails to parse and the scan moves on.
fn balanced_span(text: &str) -> Option<ParsedObject> {
    let mut depth = 0usize;
    let mut start = None;

    for (idx, ch) in text.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    start = Some(idx);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0
                    && let Some(begin) = start.take()
                {
                    let candidate = &text[begin..=idx];
                    if let Some(object) =
                        parse_strict(candidate).or_else(|| parse_strict(&repair_json(candidate)))
                    {
                        return Some(object);
                    }
                }
            }
            _ => {}
        }
    }

    None
}

/// Run the full strategy chain, reporting which strategy succeeded.
pub fn recover(text: &str, mode: GenerationMode) -> Option<(ParsedObject, Strategy)> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let cleaned = strip_code_fence(trimmed);

    if let Some(object) = parse_strict(cleaned) {
        return Some((object, Strategy::Direct));
    }

    if let Some(object) = parse_strict(&repair_json(cleaned)) {
        return Some((object, Strategy::Repaired));
    }

    if let Some(object) = balanced_span(cleaned) {
        return Some((object, Strategy::BalancedSpan));
    }

    // The last two strategies look at the original text, fences included.
    if let Some(object) = pair_patterns(mode).and_then(|patterns| patterns.extract(text)) {
        return Some((object, Strategy::KeyValue));
    }

    FLAT_OBJECT
        .find_iter(text)
        .find_map(|m| parse_strict(m.as_str()))
        .map(|object| (object, Strategy::FlatObject))
}

/// Extract a JSON object from model text, or `None` if every strategy fails.
pub fn parse_object(text: &str, mode: GenerationMode) -> Option<ParsedObject> {
    recover(text, mode).map(|(object, _)| object)
}
