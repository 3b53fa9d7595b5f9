//! Error types for sftgen.
//!
//! Taxonomy:
//! - Expected failures: bad config, missing or empty input, nothing generated
//! - Infrastructure failures: backend unreachable, network, timeout, IO
//! - Invariant violations: internal bugs
//!
//! Per-segment failures never surface here. The orchestrator absorbs them
//! into counters; only run-level conditions become an `SftgenError`.

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for sftgen.
#[derive(Debug, Error)]
pub enum SftgenError {
    // ═══════════════════════════════════════════════════════════════════
    // EXPECTED: the caller handed us something unusable
    // ═══════════════════════════════════════════════════════════════════
    #[error("Configuration error: {0}")]
    Config(#[from] super::ConfigError),

    #[error("Input file not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("No usable segments in {}", .0.display())]
    EmptyInput(PathBuf),

    #[error("No examples generated ({total} segments, all failed)")]
    NoExamplesGenerated { total: usize },

    #[error("Parse error: {0}")]
    ParseError(String),

    // ═══════════════════════════════════════════════════════════════════
    // INFRASTRUCTURE: the world did not cooperate
    // ═══════════════════════════════════════════════════════════════════
    #[error("Model backend unreachable: {0}")]
    BackendUnreachable(String),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // ═══════════════════════════════════════════════════════════════════
    // INVARIANT VIOLATED: bug, should not happen
    // ═══════════════════════════════════════════════════════════════════
    #[error("Internal error: {0}")]
    Internal(String),
}

/// HTTP-level failures reported by a model backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Authentication failed: invalid API key")]
    AuthenticationFailed,

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("API error (status {status}): {message}")]
    ApiError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl SftgenError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type alias for sftgen.
pub type Result<T> = std::result::Result<T, SftgenError>;
