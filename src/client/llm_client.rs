//! HTTP model backend for local and OpenAI-compatible inference servers.
//!
//! Two wire flavors:
//! - Ollama native `/api/chat` (non-streaming, optional thinking suppression)
//! - OpenAI-compatible `/chat/completions` (vLLM, llama.cpp, TGI, aggregators)
//!
//! A failed request is reported once and never retried here: a segment that
//! fails is picked up by the next resumed run, not by a retry loop.

use crate::client::{GenerationRequest, ModelBackend, ModelReply};
use crate::models::{ApiFlavor, BackendConfig, BackendError, Result, SftgenError};
use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::debug;

/// Message in a chat request.
#[derive(Debug, Clone, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

impl ChatMessage {
    fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system",
            content: content.into(),
        }
    }

    fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user",
            content: content.into(),
        }
    }
}

/// Ollama `/api/chat` request payload.
#[derive(Debug, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    think: bool,
    options: OllamaOptions,
}

#[derive(Debug, Serialize)]
struct OllamaOptions {
    num_predict: u32,
    temperature: f64,
}

/// Ollama `/api/chat` response.
#[derive(Debug, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    done_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
}

impl From<OllamaChatResponse> for ModelReply {
    fn from(body: OllamaChatResponse) -> Self {
        let message = body.message.unwrap_or_default();
        Self {
            answer_text: message.content.unwrap_or_default(),
            reasoning_text: message.thinking.unwrap_or_default(),
            termination_reason: body.done_reason.unwrap_or_default(),
        }
    }
}

/// OpenAI-compatible chat completion request payload.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
    temperature: f64,
}

/// OpenAI-compatible chat completion response.
#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: CompletionMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
    // vLLM / DeepSeek name it reasoning_content, others reasoning; some send both
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
}

impl TryFrom<ChatCompletionResponse> for ModelReply {
    type Error = BackendError;

    fn try_from(body: ChatCompletionResponse) -> std::result::Result<Self, Self::Error> {
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| BackendError::InvalidResponse("No choices in response".to_string()))?;

        Ok(Self {
            answer_text: choice.message.content.unwrap_or_default(),
            reasoning_text: choice
                .message
                .reasoning_content
                .or(choice.message.reasoning)
                .unwrap_or_default(),
            termination_reason: choice.finish_reason.unwrap_or_default(),
        })
    }
}

/// Pull a human-readable message out of an error body.
///
/// OpenAI-style servers send `{"error": {"message": ...}}`, Ollama sends
/// `{"error": "..."}`; anything else is returned verbatim.
fn error_message(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return body.to_string();
    };
    match &value["error"] {
        serde_json::Value::String(message) => message.clone(),
        serde_json::Value::Object(detail) => detail
            .get("message")
            .and_then(|m| m.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| body.to_string()),
        _ => body.to_string(),
    }
}

/// HTTP client for a single model on a single inference server.
pub struct HttpBackend {
    client: reqwest::Client,
    flavor: ApiFlavor,
    /// Base URL for the API, without trailing slash
    base_url: String,
    model: String,
    /// API key (None for local endpoints without auth)
    api_key: Option<String>,
    /// Request timeout
    timeout: Duration,
    /// Ask Ollama to emit thinking (false suppresses it)
    think: bool,
}

impl HttpBackend {
    /// Create a backend from configuration and a resolved API key.
    pub fn new(config: &BackendConfig, api_key: Option<String>) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(SftgenError::Config(crate::models::ConfigError::Invalid(
                "backend.model is required".to_string(),
            )));
        }

        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SftgenError::Network)?;

        Ok(Self {
            client,
            flavor: config.flavor,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            timeout,
            think: config.think,
        })
    }

    fn endpoint(&self) -> String {
        match self.flavor {
            ApiFlavor::Ollama => format!("{}/api/chat", self.base_url),
            ApiFlavor::Openai => format!("{}/chat/completions", self.base_url),
        }
    }

    /// Build headers for a request.
    fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();

        if let Some(ref api_key) = self.api_key
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {api_key}"))
        {
            headers.insert(AUTHORIZATION, value);
        }

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers
    }

    fn body(&self, request: &GenerationRequest) -> serde_json::Result<serde_json::Value> {
        let messages = vec![
            ChatMessage::system(&request.system_prompt),
            ChatMessage::user(&request.user_message),
        ];

        match self.flavor {
            ApiFlavor::Ollama => serde_json::to_value(OllamaChatRequest {
                model: self.model.clone(),
                messages,
                stream: false,
                think: self.think,
                options: OllamaOptions {
                    num_predict: request.max_output_tokens,
                    temperature: request.temperature,
                },
            }),
            ApiFlavor::Openai => serde_json::to_value(ChatCompletionRequest {
                model: self.model.clone(),
                messages,
                max_tokens: request.max_output_tokens,
                temperature: request.temperature,
            }),
        }
    }

    fn map_send_error(&self, e: reqwest::Error) -> SftgenError {
        if e.is_timeout() {
            SftgenError::Timeout(self.timeout)
        } else {
            SftgenError::Network(e)
        }
    }
}

#[async_trait]
impl ModelBackend for HttpBackend {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<ModelReply> {
        let start = Instant::now();
        let body = self
            .body(request)
            .map_err(|e| SftgenError::Internal(format!("Serializing request: {e}")))?;

        let response = self
            .client
            .post(self.endpoint())
            .headers(self.headers())
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let error = match status {
                401 => BackendError::AuthenticationFailed,
                404 => BackendError::ModelNotFound(self.model.clone()),
                _ => BackendError::ApiError {
                    status,
                    message: error_message(&error_body),
                },
            };
            return Err(error.into());
        }

        let text = response.text().await.map_err(|e| self.map_send_error(e))?;
        let reply = match self.flavor {
            ApiFlavor::Ollama => serde_json::from_str::<OllamaChatResponse>(&text)
                .map(ModelReply::from)
                .map_err(|e| BackendError::InvalidResponse(e.to_string()))?,
            ApiFlavor::Openai => serde_json::from_str::<ChatCompletionResponse>(&text)
                .map_err(|e| BackendError::InvalidResponse(e.to_string()))
                .and_then(ModelReply::try_from)?,
        };

        debug!(
            model = %self.model,
            mode = %request.mode,
            elapsed_ms = start.elapsed().as_millis() as u64,
            answer_chars = reply.answer_text.chars().count(),
            reasoning_chars = reply.reasoning_text.chars().count(),
            termination = %reply.termination_reason,
            "Model replied"
        );

        Ok(reply)
    }
}
