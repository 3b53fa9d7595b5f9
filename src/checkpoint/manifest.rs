//! Run manifest and dataset inventory.

use super::split::{TRAIN_FILE, VALID_FILE, write_atomic};
use super::journal::count_lines;
use crate::models::{GenerationMode, Result, RunStats, SftgenError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Summary of one generation run, stored next to the dataset files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Unique run ID
    pub run_id: String,
    pub mode: GenerationMode,
    pub model: String,
    /// Segment file the run read
    pub input: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_segments: usize,
    pub resumed_from: usize,
    pub accepted: usize,
    pub failed: usize,
    pub similarity_rejected: usize,
    pub train_count: usize,
    pub valid_count: usize,
}

impl RunManifest {
    pub fn new(
        mode: GenerationMode,
        model: &str,
        input: &Path,
        started_at: DateTime<Utc>,
        stats: &RunStats,
    ) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            mode,
            model: model.to_string(),
            input: input.to_path_buf(),
            started_at,
            finished_at: Utc::now(),
            total_segments: stats.total_segments,
            resumed_from: stats.resumed_from,
            accepted: stats.total_accepted,
            failed: stats.total_failed,
            similarity_rejected: stats.similarity_rejected,
            train_count: stats.train_count,
            valid_count: stats.valid_count,
        }
    }

    /// Write `manifest.json` into `dir`.
    pub fn save(&self, dir: &Path) -> Result<()> {
        let content = serde_json::to_vec_pretty(self)
            .map_err(|e| SftgenError::Internal(format!("serializing manifest: {e}")))?;
        write_atomic(&dir.join(MANIFEST_FILE), &content)?;
        debug!(run_id = %self.run_id, "Manifest saved");
        Ok(())
    }

    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let content = fs::read_to_string(&path)
            .map_err(|e| SftgenError::io(format!("reading {}", path.display()), e))?;
        serde_json::from_str(&content)
            .map_err(|e| SftgenError::ParseError(format!("invalid manifest {}: {e}", path.display())))
    }
}

/// One dataset directory found under an inspection root.
#[derive(Debug, Clone)]
pub struct DatasetSummary {
    pub dir: PathBuf,
    pub train_count: usize,
    pub valid_count: usize,
    pub train_bytes: u64,
    pub valid_bytes: u64,
    pub modified: DateTime<Utc>,
    pub manifest: Option<RunManifest>,
}

fn file_size(path: &Path) -> u64 {
    fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

fn summarize(dir: &Path) -> Result<DatasetSummary> {
    let train_path = dir.join(TRAIN_FILE);
    let valid_path = dir.join(VALID_FILE);

    let modified = fs::metadata(&train_path)
        .and_then(|m| m.modified())
        .map_err(|e| SftgenError::io(format!("stat {}", train_path.display()), e))?;

    let manifest = if dir.join(MANIFEST_FILE).exists() {
        RunManifest::load(dir)
            .inspect_err(|e| warn!(dir = %dir.display(), error = %e, "Ignoring unreadable manifest"))
            .ok()
    } else {
        None
    };

    Ok(DatasetSummary {
        dir: dir.to_path_buf(),
        train_count: count_lines(&train_path)?,
        valid_count: count_lines(&valid_path)?,
        train_bytes: file_size(&train_path),
        valid_bytes: file_size(&valid_path),
        modified: modified.into(),
        manifest,
    })
}

/// Every directory at or below `root` holding a `train.jsonl`, newest first.
pub fn list_datasets(root: &Path) -> Result<Vec<DatasetSummary>> {
    let pattern = Path::new(&glob::Pattern::escape(&root.to_string_lossy()))
        .join("**")
        .join(TRAIN_FILE);

    let mut datasets = Vec::new();
    let paths = glob::glob(&pattern.to_string_lossy())
        .map_err(|e| SftgenError::Internal(format!("invalid glob pattern: {e}")))?;

    for train_path in paths.filter_map(|r| r.ok()) {
        if let Some(dir) = train_path.parent() {
            datasets.push(summarize(dir)?);
        }
    }

    datasets.sort_by(|a, b| b.modified.cmp(&a.modified));
    Ok(datasets)
}
