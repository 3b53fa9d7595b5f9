//! sftgen - resumable SFT dataset generation from text segments.
//!
//! ## Architecture
//!
//! One model reply becomes zero or one training example through a fixed chain:
//! - **Response Selector**: answer text, else reasoning text
//! - **Recovery Parser**: fence strip, strict parse, repair, balanced span,
//!   key/value regex, flat object
//! - **Schema Normalizer**: per-mode required fields into `[user, assistant, ...]`
//! - **Quality Gate**: Style mode rejects near-copies of the source
//!
//! ## Pipeline
//!
//! Segments → probe → per segment (model → chain → journal) → train/valid split.
//! The journal is fsync'd after every accepted example and is the resume
//! checkpoint: its line count is how many segments a resumed run skips.

pub mod checkpoint;
pub mod client;
pub mod extract;
pub mod gate;
pub mod models;
pub mod pipeline;
pub mod prompts;

// Re-exports for convenience
pub use client::{GenerationRequest, HttpBackend, ModelBackend, ModelReply};
pub use models::{Config, GenerationMode, Result, RunStats, Segment, SftgenError, TrainingExample};
pub use pipeline::{
    Event, EventSink, GenerationPipeline, JsonLinesSink, MemorySink, PipelineStage,
    ProgressBarSink, RunOptions,
};
