//! Request/response boundary to a language model.
//!
//! The pipeline only ever sees `GenerationRequest` going out and `ModelReply`
//! coming back. Transport, retries and wire formats belong to implementors.

use crate::models::{GenerationMode, Result};
use async_trait::async_trait;

/// One prompt sent to the model.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub mode: GenerationMode,
    pub system_prompt: String,
    pub user_message: String,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

/// What the model sent back.
///
/// Either text may be empty. Some models route structured output into the
/// reasoning channel when thinking is suppressed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    /// Visible answer
    pub answer_text: String,
    /// Reasoning / thinking channel
    pub reasoning_text: String,
    /// Why generation stopped ("stop", "length", ...), empty if unknown
    pub termination_reason: String,
}

impl ModelReply {
    /// Reply carrying only visible answer text.
    pub fn answer(text: impl Into<String>) -> Self {
        Self {
            answer_text: text.into(),
            termination_reason: "stop".to_string(),
            ..Default::default()
        }
    }
}

/// A language model reachable through a synchronous, timeout-bounded call.
///
/// Implementations must resolve every call within their configured timeout,
/// reporting expiry as `SftgenError::Timeout`.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Human-readable model identifier for logs.
    fn model_name(&self) -> &str;

    /// Complete one request.
    async fn complete(&self, request: &GenerationRequest) -> Result<ModelReply>;
}
