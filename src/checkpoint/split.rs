//! Final train/validation split of the journal.

use crate::models::{Result, SftgenError};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

pub const TRAIN_FILE: &str = "train.jsonl";
pub const VALID_FILE: &str = "valid.jsonl";

/// Line counts written by [`finalize_split`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitCounts {
    pub train: usize,
    pub valid: usize,
}

/// Index of the first validation line for `n` examples.
///
/// At least one example goes to train, and validation is never empty when
/// there are two or more.
pub fn split_point(n: usize, ratio: f64) -> usize {
    let split = ((n as f64 * ratio).floor() as usize).max(1);
    if n > 1 { split.min(n - 1) } else { split }
}

/// Write `path` via a temp file and rename, so readers never see half a file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .ok_or_else(|| SftgenError::Internal(format!("no file name in {}", path.display())))?;
    let temp_path = path.with_file_name(format!(".{}.tmp", file_name.to_string_lossy()));

    {
        let file = File::create(&temp_path)
            .map_err(|e| SftgenError::io(format!("creating {}", temp_path.display()), e))?;
        let mut writer = BufWriter::new(file);
        writer
            .write_all(contents)
            .map_err(|e| SftgenError::io(format!("writing {}", temp_path.display()), e))?;
        let file = writer
            .into_inner()
            .map_err(|e| SftgenError::io("flushing temp file", e.into_error()))?;
        file.sync_all()
            .map_err(|e| SftgenError::io(format!("syncing {}", temp_path.display()), e))?;
    }

    fs::rename(&temp_path, path)
        .map_err(|e| SftgenError::io(format!("renaming into {}", path.display()), e))?;
    Ok(())
}

fn jsonl(lines: &[String]) -> String {
    let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out
}

/// Split `lines` into `train.jsonl` and `valid.jsonl` under `dir`.
///
/// A single example is written to both files. The output depends only on
/// `lines` and `ratio`, so re-running on an unchanged journal reproduces the
/// files byte for byte.
pub fn finalize_split(lines: &[String], dir: &Path, ratio: f64) -> Result<SplitCounts> {
    let (train, valid) = if lines.len() <= 1 {
        (lines, lines)
    } else {
        lines.split_at(split_point(lines.len(), ratio))
    };

    write_atomic(&dir.join(TRAIN_FILE), jsonl(train).as_bytes())?;
    write_atomic(&dir.join(VALID_FILE), jsonl(valid).as_bytes())?;

    let counts = SplitCounts {
        train: train.len(),
        valid: valid.len(),
    };
    debug!(train = counts.train, valid = counts.valid, "Split written");
    Ok(counts)
}
