//! Prompt templates per generation mode.
//!
//! Built-in templates cover every mode; any of them can be replaced by a
//! file named in the `[prompts]` config section. User templates take one
//! placeholder, `{text}`, with `{{` and `}}` for literal braces.

use crate::models::{GenerationMode, PromptPaths, Result, SftgenError};
use std::path::Path;
use tracing::{debug, warn};

const QA_SYSTEM: &str = "You are an expert at producing training data. Given a passage, write one high-quality question and answer pair.
Requirements:
1. The question should test understanding and analysis, not simple fact lookup.
2. Vary the question type: comprehension, analysis, reasoning or application.
3. The answer must be complete and well organized, with enough detail and explanation.
4. Ground the answer in the passage but phrase it in your own words; do not copy the text.
5. Output JSON only, in the form {\"question\": \"...\", \"answer\": \"...\"}";

const STYLE_SYSTEM: &str = "You are an expert in analysing and imitating writing style. Your task:
1. Study the style of the given sample closely: word choice, sentence structure, rhetorical devices, point of view, emotional tone and rhythm.
2. Using that style, create a writing instruction and a stylised response:
   - instruction: a creative writing prompt asking for entirely new content (new scene, new characters, new events) in the same style as the sample
   - output: new text written for that instruction that embodies the sample's style
Critical rules:
- output must be newly written; never copy, paraphrase or summarise the sample
- the scene, characters and events of output must differ completely from the sample
- the voice of output (vocabulary, syntax, devices, tone) must closely match the sample
- instruction must not quote the sample; it only describes the writing task
Output JSON only, in the form {\"instruction\": \"...\", \"output\": \"...\"}";

const CHAT_SYSTEM: &str = "You are an expert at producing dialogue training data. Turn the given passage into a natural, substantive multi-turn conversation of at least three exchanges.
Requirements:
1. The conversation should flow naturally, like a tutor and student or two friends talking.
2. The user's questions should build from basic to deeper ones.
3. The assistant's replies should be knowledgeable and detailed and should move the discussion forward.
4. Include follow-up questions, clarifications and examples.
5. Do not just split the passage into lines; discuss the topic it raises.
Output JSON only, in the form {\"conversations\": [{\"role\": \"user\", \"content\": \"...\"}, {\"role\": \"assistant\", \"content\": \"...\"}]}";

const INSTRUCT_SYSTEM: &str = "You are an expert at producing instruction-tuning data. Given a passage, write one high-quality instruction and output pair.
Requirements:
1. Vary the instruction type: summarise, analyse, compare, reason, explain, rewrite, expand or evaluate.
2. The instruction must be clear and specific about what is asked.
3. The output must be well organized and show real understanding.
4. Do not copy the passage into the output; restate it in your own words.
Output JSON only, in the form {\"instruction\": \"...\", \"output\": \"...\"}";

const QA_USER: &str = "Write one in-depth question and answer pair about the passage below. The question should test understanding and analysis; the answer should be complete and well organized. Output JSON only.

[Passage]
{text}";

const STYLE_USER: &str = "Study the writing style of the sample below (word choice, syntax, devices, tone, rhythm), then write a new writing instruction and a stylised response.
Note: output must be newly written, with a scene and content completely different from the sample, in a closely matching style. Output JSON only.

[Writing sample]
{text}";

const CHAT_USER: &str = "Turn the content of the passage below into a natural multi-turn conversation of at least three exchanges. It should deepen step by step and include follow-up questions. Output JSON only.

[Passage]
{text}";

const INSTRUCT_USER: &str = "Write one high-quality instruction and output pair from the passage below. Pick the instruction type from: summarise key points, in-depth analysis, comparison, causal reasoning, concept explanation, critical evaluation. Output JSON only.

[Passage]
{text}";

/// Template rendering failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unknown placeholder {{{0}}}")]
    UnknownPlaceholder(String),

    #[error("unbalanced brace at byte {0}")]
    UnbalancedBrace(usize),
}

/// Substitute `{text}` in `template`.
pub fn render(template: &str, text: &str) -> std::result::Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len() + text.len());
    let mut rest = template;
    let mut offset = 0;

    while let Some(idx) = rest.find(['{', '}']) {
        out.push_str(&rest[..idx]);
        let tail = &rest[idx..];

        let consumed = if tail.starts_with("{{") {
            out.push('{');
            2
        } else if tail.starts_with("}}") {
            out.push('}');
            2
        } else if tail.starts_with('}') {
            return Err(TemplateError::UnbalancedBrace(offset + idx));
        } else {
            let close = tail
                .find('}')
                .ok_or(TemplateError::UnbalancedBrace(offset + idx))?;
            let name = &tail[1..close];
            if name != "text" {
                return Err(TemplateError::UnknownPlaceholder(name.to_string()));
            }
            out.push_str(text);
            close + 1
        };

        offset += idx + consumed;
        rest = &tail[consumed..];
    }

    out.push_str(rest);
    Ok(out)
}

/// System prompt and user template for one mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    pub system: String,
    pub user_template: String,
}

impl PromptSet {
    /// Built-in templates for `mode`.
    pub fn builtin(mode: GenerationMode) -> Self {
        let (system, user) = match mode {
            GenerationMode::Qa => (QA_SYSTEM, QA_USER),
            GenerationMode::Style => (STYLE_SYSTEM, STYLE_USER),
            GenerationMode::Chat => (CHAT_SYSTEM, CHAT_USER),
            GenerationMode::Instruct => (INSTRUCT_SYSTEM, INSTRUCT_USER),
        };
        Self {
            system: system.to_string(),
            user_template: user.to_string(),
        }
    }

    /// Built-in templates for `mode`, with any configured files swapped in.
    pub fn load(mode: GenerationMode, paths: &PromptPaths) -> Result<Self> {
        let mut prompts = Self::builtin(mode);
        if let Some(path) = &paths.system {
            prompts.system = read_template(path)?;
        }
        if let Some(path) = &paths.user {
            prompts.user_template = read_template(path)?;
        }
        Ok(prompts)
    }

    /// Render the user message for a segment.
    ///
    /// A template that fails to render is sent as-is rather than aborting.
    pub fn user_message(&self, text: &str) -> String {
        render(&self.user_template, text).unwrap_or_else(|e| {
            warn!(error = %e, "User template failed to render, sending it unformatted");
            self.user_template.clone()
        })
    }
}

fn read_template(path: &Path) -> Result<String> {
    debug!(path = %path.display(), "Loading prompt template");
    std::fs::read_to_string(path)
        .map_err(|e| SftgenError::io(format!("reading prompt template {}", path.display()), e))
}
