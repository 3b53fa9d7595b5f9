//! Durable output for resumable generation runs.
//!
//! Provides:
//! - `Journal`: fsync'd append-only JSONL of accepted examples, doubling as the resume checkpoint
//! - `finalize_split`: atomic train/validation split of the journal
//! - `RunManifest` and `list_datasets`: run metadata and dataset inventory

mod journal;
mod manifest;
mod split;

pub use journal::*;
pub use manifest::*;
pub use split::*;
