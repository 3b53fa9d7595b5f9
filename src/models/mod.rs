//! Core data models for sftgen.
//!
//! - Segments, modes and training examples (`sample`)
//! - Configuration (`config`)
//! - Errors (`error`)

mod config;
mod error;
mod sample;

pub use config::*;
pub use error::*;
pub use sample::*;
