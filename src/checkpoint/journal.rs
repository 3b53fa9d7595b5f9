//! Durable incremental output.
//!
//! Every accepted example is appended as one JSON line and synced to disk
//! before the next segment starts. On restart the count of complete
//! (newline-terminated) lines is the resume offset, so the file itself is
//! the checkpoint. A torn final line left by an interrupted write is never
//! counted and is cut off before anything new is appended.

use crate::models::{Result, SftgenError, TrainingExample};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use tracing::{debug, warn};

/// Append-only JSONL journal of accepted examples.
pub struct Journal {
    file: File,
}

impl Journal {
    /// Open the journal, appending when `resume` is set and truncating otherwise.
    pub fn open(path: &Path, resume: bool) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| SftgenError::io(format!("creating {}", parent.display()), e))?;
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if resume {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }

        let file = options
            .open(path)
            .map_err(|e| SftgenError::io(format!("opening journal {}", path.display()), e))?;

        if resume {
            drop_torn_tail(path, &file)?;
        }

        debug!(path = %path.display(), resume, "Journal opened");
        Ok(Self { file })
    }

    /// Append one example and make it durable.
    pub fn append(&mut self, example: &TrainingExample) -> Result<()> {
        let mut line = serde_json::to_string(example)
            .map_err(|e| SftgenError::Internal(format!("serializing example: {e}")))?;
        line.push('\n');

        self.file
            .write_all(line.as_bytes())
            .map_err(|e| SftgenError::io("appending to journal", e))?;
        self.file
            .flush()
            .map_err(|e| SftgenError::io("flushing journal", e))?;
        self.file
            .sync_data()
            .map_err(|e| SftgenError::io("syncing journal", e))?;
        Ok(())
    }
}

/// Truncate whatever follows the last newline of an already open journal.
fn drop_torn_tail(path: &Path, file: &File) -> Result<()> {
    let (complete, total) = scan(path, |_| {})?;
    if complete < total {
        warn!(
            path = %path.display(),
            dropped_bytes = total - complete,
            "Discarding incomplete final journal line"
        );
        file.set_len(complete)
            .map_err(|e| SftgenError::io(format!("truncating {}", path.display()), e))?;
    }
    Ok(())
}

/// Feed every complete, non-blank line (trimmed) to `visit`.
///
/// Returns the byte length covered by complete lines and the total length.
/// A missing file scans as empty.
fn scan(path: &Path, mut visit: impl FnMut(&str)) -> Result<(u64, u64)> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((0, 0)),
        Err(e) => return Err(SftgenError::io(format!("opening {}", path.display()), e)),
    };

    let mut reader = BufReader::new(file);
    let mut buf = Vec::new();
    let (mut complete, mut total) = (0u64, 0u64);
    loop {
        buf.clear();
        let read = reader
            .read_until(b'\n', &mut buf)
            .map_err(|e| SftgenError::io(format!("reading {}", path.display()), e))?;
        if read == 0 {
            break;
        }
        total += read as u64;
        if buf.last() != Some(&b'\n') {
            break;
        }
        complete = total;

        let line = String::from_utf8_lossy(&buf);
        let trimmed = line.trim();
        if !trimmed.is_empty() {
            visit(trimmed);
        }
    }
    Ok((complete, total))
}

/// Complete non-blank lines of a JSONL file, trimmed. A missing file has none.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    scan(path, |line| lines.push(line.to_string()))?;
    Ok(lines)
}

/// Number of complete non-blank lines in a JSONL file; 0 when it does not exist.
pub fn count_lines(path: &Path) -> Result<usize> {
    let mut count = 0;
    scan(path, |_| count += 1)?;
    Ok(count)
}
