//! Mode-specific acceptance checks for candidate examples.
//!
//! Only Style mode has a real gate today: an example whose new content is a
//! near-verbatim copy of the source defeats the point of style imitation.

mod similarity;

pub use similarity::*;

use crate::models::{GenerationMode, TrainingExample};

/// Gate outcome.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Approve,
    /// Rejected for copying the source; carries the measured similarity
    Reject { similarity: f64 },
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approve)
    }
}

/// Pure acceptance predicate over a candidate and its source text.
#[derive(Debug, Clone, Copy)]
pub struct QualityGate {
    /// Style examples strictly above this similarity are rejected
    pub similarity_threshold: f64,
}

impl Default for QualityGate {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
        }
    }
}

impl QualityGate {
    pub fn new(similarity_threshold: f64) -> Self {
        Self {
            similarity_threshold,
        }
    }

    pub fn evaluate(
        &self,
        mode: GenerationMode,
        candidate: &TrainingExample,
        source: &str,
    ) -> Verdict {
        if mode != GenerationMode::Style {
            return Verdict::Approve;
        }

        let output = candidate.assistant_content().unwrap_or_default();
        let similarity = bigram_similarity(output, source);
        if similarity > self.similarity_threshold {
            Verdict::Reject { similarity }
        } else {
            Verdict::Approve
        }
    }
}
