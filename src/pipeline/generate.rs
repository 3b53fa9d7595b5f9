//! Sequential, resumable generation run.
//!
//! Pipeline flow:
//! Segments → model → select → recover → normalize → gate → journal → split
//!
//! Segments are processed strictly one at a time. Every per-segment failure
//! is counted and logged; only run-level conditions end the run early.

use super::events::{Event, EventSink};
use crate::checkpoint::{Journal, RunManifest, count_lines, finalize_split, read_lines};
use crate::client::{GenerationRequest, ModelBackend, ModelReply};
use crate::extract::{normalize, recover, select_response};
use crate::gate::{QualityGate, Verdict};
use crate::models::{
    Config, GenerationMode, ModeSampling, Result, RunStats, Segment, SftgenError,
    TrainingExample, truncate_chars,
};
use crate::prompts::PromptSet;
use chrono::Utc;
use serde_json::Value;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const PROBE_SYSTEM: &str = "Hello";
const PROBE_USER: &str = "Reply OK";

/// Lifecycle of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PipelineStage {
    #[default]
    Idle,
    Connecting,
    Running,
    Finalizing,
    Done,
    Failed,
}

/// Counters for the current run.
///
/// `successes` is seeded with the resume offset, so it always equals the
/// number of lines in the journal.
#[derive(Debug, Clone, Default)]
pub struct PipelineState {
    pub stage: PipelineStage,
    pub total: usize,
    pub resume_offset: usize,
    pub successes: usize,
    /// Every segment that produced nothing, except similarity rejections
    pub failures: usize,
    pub similarity_rejected: usize,
    pub empty_replies: usize,
    pub parse_failures: usize,
    pub schema_mismatches: usize,
    pub backend_errors: usize,
}

impl PipelineState {
    fn progress_desc(&self) -> String {
        if self.similarity_rejected > 0 {
            format!(
                "Generated {} examples ({} failed, {} too similar)",
                self.successes, self.failures, self.similarity_rejected
            )
        } else {
            format!(
                "Generated {} examples ({} failed)",
                self.successes, self.failures
            )
        }
    }
}

/// Per-invocation settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// NDJSON segment file
    pub input: PathBuf,
    /// Receives the journal, train.jsonl, valid.jsonl and manifest.json
    pub output_dir: PathBuf,
    pub mode: GenerationMode,
    /// Continue after the examples already in the journal
    pub resume: bool,
    /// Overrides `generation.max_samples` when set (0 = all)
    pub max_samples: Option<usize>,
}

/// What became of one segment.
#[derive(Debug)]
enum SegmentOutcome {
    Accepted(TrainingExample),
    EmptyReply,
    ParseFailure,
    SchemaMismatch,
    TooSimilar,
    BackendFailure,
}

/// Load segments from an NDJSON file.
///
/// Blank, malformed and non-object lines are skipped, as are records without
/// a non-empty `text`. A record's integer `id` is kept; otherwise the segment
/// is numbered by its position.
pub fn load_segments(path: &Path) -> Result<Vec<Segment>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(SftgenError::InputNotFound(path.to_path_buf()));
        }
        Err(e) => return Err(SftgenError::io(format!("opening {}", path.display()), e)),
    };

    let mut segments = Vec::new();
    let mut skipped = 0usize;

    for (line_num, line) in BufReader::new(file).lines().enumerate() {
        let line = match line {
            Ok(line) => line,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                skipped += 1;
                continue;
            }
            Err(e) => return Err(SftgenError::io(format!("reading {}", path.display()), e)),
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let record = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(record)) => record,
            _ => {
                debug!(line = line_num + 1, "Skipping malformed segment line");
                skipped += 1;
                continue;
            }
        };

        let Some(text) = record
            .get("text")
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
        else {
            skipped += 1;
            continue;
        };

        let id = record
            .get("id")
            .and_then(Value::as_u64)
            .unwrap_or(segments.len() as u64);
        segments.push(Segment {
            id,
            text: text.to_string(),
        });
    }

    if segments.is_empty() {
        return Err(SftgenError::EmptyInput(path.to_path_buf()));
    }

    info!(count = segments.len(), skipped, "Loaded segments");
    Ok(segments)
}

fn one_line(text: &str, max_chars: usize) -> String {
    truncate_chars(text, max_chars).replace('\n', " ")
}

/// Drives one generation run against a model backend.
pub struct GenerationPipeline<B: ModelBackend> {
    backend: B,
    config: Config,
    gate: QualityGate,
    request_timeout: Duration,
    state: PipelineState,
}

impl<B: ModelBackend> GenerationPipeline<B> {
    pub fn new(backend: B, config: Config) -> Self {
        let gate = QualityGate::new(config.generation.similarity_threshold);
        let request_timeout = Duration::from_secs(config.backend.timeout_secs);
        Self {
            backend,
            config,
            gate,
            request_timeout,
            state: PipelineState::default(),
        }
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn stage(&self) -> PipelineStage {
        self.state.stage
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Path of the incremental output inside `output_dir`.
    pub fn journal_path(&self, output_dir: &Path) -> PathBuf {
        output_dir.join(&self.config.output.journal_file)
    }

    /// Mark the run failed and announce `err` as the single fatal event.
    fn fail(&mut self, sink: &mut dyn EventSink, err: SftgenError) -> SftgenError {
        error!(error = %err, stage = ?self.state.stage, "Run failed");
        self.state.stage = PipelineStage::Failed;
        sink.emit(&Event::error(err.to_string()));
        err
    }

    async fn call(&self, request: &GenerationRequest) -> Result<ModelReply> {
        tokio::time::timeout(self.request_timeout, self.backend.complete(request))
            .await
            .map_err(|_| SftgenError::Timeout(self.request_timeout))?
    }

    /// Execute the whole run: load, probe, generate, split.
    ///
    /// Fatal conditions emit exactly one `error` event and return `Err`.
    pub async fn run(&mut self, options: &RunOptions, sink: &mut dyn EventSink) -> Result<RunStats> {
        let start = Instant::now();
        let started_at = Utc::now();
        self.state = PipelineState::default();
        let mode = options.mode;

        let prompts = match PromptSet::load(mode, self.config.prompts.for_mode(mode)) {
            Ok(prompts) => prompts,
            Err(e) => return Err(self.fail(sink, e)),
        };

        let mut segments = match load_segments(&options.input) {
            Ok(segments) => segments,
            Err(e) => return Err(self.fail(sink, e)),
        };
        let max_samples = options
            .max_samples
            .unwrap_or(self.config.generation.max_samples);
        if max_samples > 0 && segments.len() > max_samples {
            segments.truncate(max_samples);
        }
        let total = segments.len();
        self.state.total = total;

        if let Err(e) = fs::create_dir_all(&options.output_dir) {
            let err = SftgenError::io(format!("creating {}", options.output_dir.display()), e);
            return Err(self.fail(sink, err));
        }
        let journal_path = self.journal_path(&options.output_dir);

        let mut offset = 0;
        if options.resume {
            offset = match count_lines(&journal_path) {
                Ok(count) => count,
                Err(e) => return Err(self.fail(sink, e)),
            };
            if offset > 0 {
                sink.emit(&Event::log(format!(
                    "Found {offset} existing examples, continuing from segment {}...",
                    offset + 1
                )));
            }
            if offset > total {
                warn!(offset, total, "Journal has more examples than segments; nothing left to process");
            }
        }
        self.state.resume_offset = offset;
        self.state.successes = offset;

        let model = self.backend.model_name().to_string();
        info!(total, resume_offset = offset, %mode, %model, "Starting generation run");

        sink.emit(&Event::progress(
            offset.min(total),
            total,
            format!("Generating dataset with [{model}]..."),
        ));
        sink.emit(&Event::log(format!(
            "Connecting to model backend...\n   model: {model}\n   mode: {mode}\n   segments: {total}\n   already done: {offset}"
        )));

        // Connecting
        self.state.stage = PipelineStage::Connecting;
        let sampling = self.config.generation.sampling(mode);
        let probe = GenerationRequest {
            mode,
            system_prompt: PROBE_SYSTEM.to_string(),
            user_message: PROBE_USER.to_string(),
            temperature: sampling.temperature,
            max_output_tokens: self.config.generation.probe_max_tokens,
        };
        match self.call(&probe).await {
            Ok(reply) => {
                let preview = select_response(&reply);
                sink.emit(&Event::log(format!(
                    "Model backend connected\n   reply: {}\n   termination: {}",
                    truncate_chars(&preview, 80),
                    reply.termination_reason
                )));
            }
            Err(e) => {
                sink.emit(&Event::log(format!("Model backend connection failed: {e}")));
                let err = SftgenError::BackendUnreachable(e.to_string());
                return Err(self.fail(sink, err));
            }
        }

        // Running
        self.state.stage = PipelineStage::Running;
        let mut journal = match Journal::open(&journal_path, options.resume && offset > 0) {
            Ok(journal) => journal,
            Err(e) => return Err(self.fail(sink, e)),
        };

        for (index, segment) in segments.iter().enumerate().skip(offset) {
            sink.emit(&Event::log(format!(
                "\n-- Segment {}/{total} --\nText: {}...",
                index + 1,
                one_line(&segment.text, 80)
            )));

            let outcome = self
                .process_segment(segment, mode, &prompts, sampling, sink)
                .await;

            match outcome {
                SegmentOutcome::Accepted(example) => {
                    if let Err(e) = journal.append(&example) {
                        return Err(self.fail(sink, e));
                    }
                    self.state.successes += 1;
                    sink.emit(&Event::log(format!(
                        "Accepted, {} examples so far\n   Q: {}...",
                        self.state.successes,
                        truncate_chars(example.first_content(), 60)
                    )));
                }
                SegmentOutcome::TooSimilar => self.state.similarity_rejected += 1,
                SegmentOutcome::EmptyReply => {
                    self.state.failures += 1;
                    self.state.empty_replies += 1;
                }
                SegmentOutcome::ParseFailure => {
                    self.state.failures += 1;
                    self.state.parse_failures += 1;
                }
                SegmentOutcome::SchemaMismatch => {
                    self.state.failures += 1;
                    self.state.schema_mismatches += 1;
                }
                SegmentOutcome::BackendFailure => {
                    self.state.failures += 1;
                    self.state.backend_errors += 1;
                }
            }

            sink.emit(&Event::progress(index + 1, total, self.state.progress_desc()));
        }
        drop(journal);

        sink.emit(&Event::log(format!(
            "\n== Generation finished ==\n   accepted: {}\n   failed: {}\n   too similar: {}\n   total: {total}",
            self.state.successes, self.state.failures, self.state.similarity_rejected
        )));
        debug!(
            empty = self.state.empty_replies,
            parse = self.state.parse_failures,
            schema = self.state.schema_mismatches,
            backend = self.state.backend_errors,
            "Failure breakdown"
        );

        if self.state.successes == 0 {
            return Err(self.fail(sink, SftgenError::NoExamplesGenerated { total }));
        }

        // Finalizing
        self.state.stage = PipelineStage::Finalizing;
        let counts = match read_lines(&journal_path).and_then(|lines| {
            finalize_split(&lines, &options.output_dir, self.config.generation.split_ratio)
        }) {
            Ok(counts) => counts,
            Err(e) => return Err(self.fail(sink, e)),
        };
        sink.emit(&Event::log(format!(
            "Saved train.jsonl ({} examples), valid.jsonl ({} examples)",
            counts.train, counts.valid
        )));

        let mut stats = RunStats {
            total_segments: total,
            resumed_from: offset,
            total_accepted: self.state.successes,
            total_failed: self.state.failures,
            similarity_rejected: self.state.similarity_rejected,
            train_count: counts.train,
            valid_count: counts.valid,
            runtime_secs: start.elapsed().as_secs_f64(),
            ..Default::default()
        };
        stats.finalize();

        let manifest = RunManifest::new(mode, &model, &options.input, started_at, &stats);
        if let Err(e) = manifest.save(&options.output_dir) {
            warn!(error = %e, "Could not write run manifest");
        }

        self.state.stage = PipelineStage::Done;
        sink.emit(&Event::Complete {
            train_count: counts.train,
            valid_count: counts.valid,
            failed_count: self.state.failures,
            similarity_rejected: self.state.similarity_rejected,
            total,
        });

        info!(
            accepted = stats.total_accepted,
            failed = stats.total_failed,
            similarity_rejected = stats.similarity_rejected,
            throughput = format!("{:.0}/hr", stats.throughput_per_hour),
            "Generation run complete"
        );
        Ok(stats)
    }

    /// Run one segment through the extraction chain.
    async fn process_segment(
        &self,
        segment: &Segment,
        mode: GenerationMode,
        prompts: &PromptSet,
        sampling: ModeSampling,
        sink: &mut dyn EventSink,
    ) -> SegmentOutcome {
        let text = truncate_chars(&segment.text, self.config.generation.segment_char_cap);
        let request = GenerationRequest {
            mode,
            system_prompt: prompts.system.clone(),
            user_message: prompts.user_message(text),
            temperature: sampling.temperature,
            max_output_tokens: sampling.max_tokens,
        };

        let reply = match self.call(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!(segment = segment.id, error = %e, "Model call failed");
                sink.emit(&Event::log(format!("Model call failed: {e}")));
                return SegmentOutcome::BackendFailure;
            }
        };

        let response = select_response(&reply);
        if response.is_empty() {
            sink.emit(&Event::log(format!(
                "Model returned empty content\n   termination: {}",
                if reply.termination_reason.is_empty() {
                    "?"
                } else {
                    reply.termination_reason.as_str()
                }
            )));
            return SegmentOutcome::EmptyReply;
        }

        sink.emit(&Event::log(format!(
            "Model reply ({} chars): {}",
            response.chars().count(),
            one_line(&response, 300)
        )));

        let Some((object, strategy)) = recover(&response, mode) else {
            sink.emit(&Event::log(format!(
                "JSON parse failed\n   raw: {}",
                truncate_chars(&response, 400)
            )));
            return SegmentOutcome::ParseFailure;
        };
        debug!(segment = segment.id, %strategy, "Recovered object");

        let Some(record) = normalize(&object, mode) else {
            let keys: Vec<&str> = object.keys().map(String::as_str).collect();
            sink.emit(&Event::log(format!("JSON fields do not match: {keys:?}")));
            return SegmentOutcome::SchemaMismatch;
        };

        let example = record.into_example();
        match self.gate.evaluate(mode, &example, &segment.text) {
            Verdict::Approve => SegmentOutcome::Accepted(example),
            Verdict::Reject { similarity } => {
                sink.emit(&Event::log(format!(
                    "Style check: output too similar to the source ({:.0}%), skipped",
                    similarity * 100.0
                )));
                SegmentOutcome::TooSimilar
            }
        }
    }
}
