//! Configuration models for sftgen.
//!
//! Every tunable the pipeline uses lives here. The empirically chosen
//! constants (similarity threshold, character cap, token budgets) are
//! defaults, not invariants.

use super::GenerationMode;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for sftgen.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Model backend settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Generation settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Prompt template overrides
    #[serde(default)]
    pub prompts: PromptsConfig,

    /// Output settings
    #[serde(default)]
    pub output: OutputConfig,
}

/// Wire protocol spoken by the model backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiFlavor {
    /// Ollama native `/api/chat`
    #[default]
    Ollama,
    /// OpenAI-compatible `/chat/completions` (vLLM, llama.cpp, aggregators)
    Openai,
}

/// Model backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Wire protocol
    #[serde(default)]
    pub flavor: ApiFlavor,

    /// Base URL (e.g., "http://localhost:11434" or "http://localhost:8000/v1")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model name as the backend knows it
    #[serde(default)]
    pub model: String,

    /// API key (supports ${ENV_VAR} expansion)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable consulted when `api_key` is unset
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Ask reasoning models to skip their thinking phase (Ollama only)
    #[serde(default)]
    pub think: bool,
}

fn default_base_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_timeout() -> u64 {
    300
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            flavor: ApiFlavor::default(),
            base_url: default_base_url(),
            model: String::new(),
            api_key: None,
            api_key_env: None,
            timeout_secs: default_timeout(),
            think: false,
        }
    }
}

/// Sampling settings for one mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModeSampling {
    pub temperature: f64,
    pub max_tokens: u32,
}

/// Generation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Segment text is truncated to this many characters before prompting
    #[serde(default = "default_segment_char_cap")]
    pub segment_char_cap: usize,

    /// Style-mode examples above this bigram similarity to the source are rejected
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,

    /// Fraction of examples that go to train.jsonl
    #[serde(default = "default_split_ratio")]
    pub split_ratio: f64,

    /// Output budget of the connectivity probe
    #[serde(default = "default_probe_max_tokens")]
    pub probe_max_tokens: u32,

    /// Process only the first N segments (0 = all)
    #[serde(default)]
    pub max_samples: usize,

    #[serde(default = "default_qa_sampling")]
    pub qa: ModeSampling,

    #[serde(default = "default_style_sampling")]
    pub style: ModeSampling,

    #[serde(default = "default_chat_sampling")]
    pub chat: ModeSampling,

    #[serde(default = "default_instruct_sampling")]
    pub instruct: ModeSampling,
}

fn default_segment_char_cap() -> usize {
    2000
}

fn default_similarity_threshold() -> f64 {
    0.6
}

fn default_split_ratio() -> f64 {
    0.9
}

fn default_probe_max_tokens() -> u32 {
    64
}

fn default_qa_sampling() -> ModeSampling {
    ModeSampling {
        temperature: 0.7,
        max_tokens: 2048,
    }
}

// Style needs room for creative output and a hotter sampler.
fn default_style_sampling() -> ModeSampling {
    ModeSampling {
        temperature: 0.9,
        max_tokens: 4096,
    }
}

fn default_chat_sampling() -> ModeSampling {
    default_qa_sampling()
}

fn default_instruct_sampling() -> ModeSampling {
    default_qa_sampling()
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            segment_char_cap: default_segment_char_cap(),
            similarity_threshold: default_similarity_threshold(),
            split_ratio: default_split_ratio(),
            probe_max_tokens: default_probe_max_tokens(),
            max_samples: 0,
            qa: default_qa_sampling(),
            style: default_style_sampling(),
            chat: default_chat_sampling(),
            instruct: default_instruct_sampling(),
        }
    }
}

impl GenerationConfig {
    /// Sampling settings for a mode.
    pub fn sampling(&self, mode: GenerationMode) -> ModeSampling {
        match mode {
            GenerationMode::Qa => self.qa,
            GenerationMode::Style => self.style,
            GenerationMode::Chat => self.chat,
            GenerationMode::Instruct => self.instruct,
        }
    }
}

/// Template file paths for one mode. Unset entries use the built-in prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptPaths {
    #[serde(default)]
    pub system: Option<PathBuf>,

    #[serde(default)]
    pub user: Option<PathBuf>,
}

/// Prompt template overrides per mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromptsConfig {
    #[serde(default)]
    pub qa: PromptPaths,

    #[serde(default)]
    pub style: PromptPaths,

    #[serde(default)]
    pub chat: PromptPaths,

    #[serde(default)]
    pub instruct: PromptPaths,
}

impl PromptsConfig {
    pub fn for_mode(&self, mode: GenerationMode) -> &PromptPaths {
        match mode {
            GenerationMode::Qa => &self.qa,
            GenerationMode::Style => &self.style,
            GenerationMode::Chat => &self.chat,
            GenerationMode::Instruct => &self.instruct,
        }
    }
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Directory receiving train.jsonl, valid.jsonl and the journal
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,

    /// Incremental output, one accepted example per line
    #[serde(default = "default_journal_file")]
    pub journal_file: String,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("dataset")
}

fn default_journal_file() -> String {
    "generated.jsonl".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            journal_file: default_journal_file(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Resolve the backend API key from config or environment.
    ///
    /// Local backends usually need none, so absence is not an error unless
    /// an environment variable was named explicitly.
    pub fn resolve_api_key(&self) -> Result<Option<String>, ConfigError> {
        if let Some(key) = &self.backend.api_key {
            return Ok(Some(expand_env_vars(key)));
        }

        match &self.backend.api_key_env {
            Some(env_var) => std::env::var(env_var)
                .map(Some)
                .map_err(|_| ConfigError::MissingApiKey {
                    env_var: env_var.clone(),
                }),
            None => Ok(None),
        }
    }

    /// Check value ranges before a run starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let generation = &self.generation;

        if !(generation.split_ratio > 0.0 && generation.split_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "generation.split_ratio must be in (0, 1], got {}",
                generation.split_ratio
            )));
        }
        if !(0.0..=1.0).contains(&generation.similarity_threshold) {
            return Err(ConfigError::Invalid(format!(
                "generation.similarity_threshold must be in [0, 1], got {}",
                generation.similarity_threshold
            )));
        }
        if generation.segment_char_cap == 0 {
            return Err(ConfigError::Invalid(
                "generation.segment_char_cap must be positive".to_string(),
            ));
        }
        if self.backend.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "backend.timeout_secs must be positive".to_string(),
            ));
        }
        if self.output.journal_file.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "output.journal_file must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports ${VAR_NAME} syntax.
/// If the variable is not set, the placeholder is left unchanged.
pub fn expand_env_vars(s: &str) -> String {
    let mut result = s.to_string();
    let re = regex::Regex::new(r"\$\{([^}]+)\}").expect("static pattern");

    for cap in re.captures_iter(s) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Missing API key: {env_var} is not set")]
    MissingApiKey { env_var: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
