//! Host-facing event stream.
//!
//! A host process (GUI, supervisor) reads one JSON object per line from
//! stdout. Diagnostics for humans go through `tracing` to stderr instead,
//! so the two never interleave.

use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::io::Write;
use tracing::warn;

/// One line of the event stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Progress {
        step: usize,
        total: usize,
        desc: String,
    },
    Log {
        message: String,
    },
    /// Fatal; the process exits non-zero right after
    Error {
        message: String,
    },
    Complete {
        train_count: usize,
        valid_count: usize,
        failed_count: usize,
        similarity_rejected: usize,
        total: usize,
    },
}

impl Event {
    pub fn log(message: impl Into<String>) -> Self {
        Self::Log {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn progress(step: usize, total: usize, desc: impl Into<String>) -> Self {
        Self::Progress {
            step,
            total,
            desc: desc.into(),
        }
    }
}

/// Destination for pipeline events.
///
/// Emitting never fails the run; sinks deal with their own IO errors.
pub trait EventSink: Send {
    fn emit(&mut self, event: &Event);
}

/// Writes each event as a JSON line and flushes immediately.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl JsonLinesSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn emit(&mut self, event: &Event) {
        let result = serde_json::to_string(event)
            .map_err(std::io::Error::other)
            .and_then(|line| writeln!(self.writer, "{line}"))
            .and_then(|()| self.writer.flush());

        if let Err(e) = result {
            warn!(error = %e, "Failed to write event");
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub events: Vec<Event>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages of all `log` events, in order.
    pub fn logs(&self) -> impl Iterator<Item = &str> {
        self.events.iter().filter_map(|e| match e {
            Event::Log { message } => Some(message.as_str()),
            _ => None,
        })
    }

    pub fn last(&self) -> Option<&Event> {
        self.events.last()
    }
}

impl EventSink for MemorySink {
    fn emit(&mut self, event: &Event) {
        self.events.push(event.clone());
    }
}

/// Terminal progress bar for interactive runs.
pub struct ProgressBarSink {
    bar: ProgressBar,
    verbose: bool,
}

impl ProgressBarSink {
    /// With `verbose` set, `log` events are printed above the bar.
    pub fn new(verbose: bool) -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
                .expect("static template")
                .progress_chars("##-"),
        );
        Self { bar, verbose }
    }
}

impl EventSink for ProgressBarSink {
    fn emit(&mut self, event: &Event) {
        match event {
            Event::Progress { step, total, desc } => {
                self.bar.set_length(*total as u64);
                self.bar.set_position(*step as u64);
                self.bar.set_message(desc.clone());
            }
            Event::Log { message } => {
                if self.verbose {
                    self.bar.println(message);
                }
            }
            Event::Error { message } => {
                self.bar.abandon_with_message(format!("Failed: {message}"));
            }
            Event::Complete {
                train_count,
                valid_count,
                failed_count,
                similarity_rejected,
                ..
            } => {
                self.bar.finish_with_message(format!(
                    "Done! train {train_count}, valid {valid_count}, failed {failed_count}, too similar {similarity_rejected}"
                ));
            }
        }
    }
}
