//! End-to-end runs of the generation pipeline against a scripted backend.

use async_trait::async_trait;
use serde_json::json;
use sftgen::checkpoint::{MANIFEST_FILE, RunManifest, TRAIN_FILE, VALID_FILE};
use sftgen::{
    Config, Event, GenerationMode, GenerationPipeline, GenerationRequest, MemorySink,
    ModelBackend, ModelReply, PipelineStage, Result, RunOptions, SftgenError,
};
use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tempfile::TempDir;

/// Answers the probe, then hands out scripted replies in order.
///
/// A `None` entry, or running out of script, behaves like a timed-out call.
struct ScriptedBackend {
    probe_ok: bool,
    replies: Mutex<VecDeque<Option<ModelReply>>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedBackend {
    fn new(replies: Vec<Option<ModelReply>>) -> Self {
        Self {
            probe_ok: true,
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    fn answering(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| Some(ModelReply::answer(*t))).collect())
    }

    fn unreachable() -> Self {
        Self {
            probe_ok: false,
            ..Self::new(Vec::new())
        }
    }

    fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelBackend for ScriptedBackend {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &GenerationRequest) -> Result<ModelReply> {
        let is_probe = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request.clone());
            requests.len() == 1
        };

        if is_probe {
            return if self.probe_ok {
                Ok(ModelReply::answer("OK"))
            } else {
                Err(SftgenError::BackendUnreachable("connection refused".into()))
            };
        }

        match self.replies.lock().unwrap().pop_front().flatten() {
            Some(reply) => Ok(reply),
            None => Err(SftgenError::Timeout(Duration::from_secs(300))),
        }
    }
}

struct Workspace {
    _temp_dir: TempDir,
    input: PathBuf,
    output_dir: PathBuf,
}

impl Workspace {
    fn new(texts: &[&str]) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let input = temp_dir.path().join("segments.jsonl");
        let lines: Vec<String> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| json!({"id": i, "text": text}).to_string())
            .collect();
        fs::write(&input, lines.join("\n") + "\n").unwrap();

        Self {
            output_dir: temp_dir.path().join("dataset"),
            input,
            _temp_dir: temp_dir,
        }
    }

    fn options(&self, mode: GenerationMode, resume: bool) -> RunOptions {
        RunOptions {
            input: self.input.clone(),
            output_dir: self.output_dir.clone(),
            mode,
            resume,
            max_samples: None,
        }
    }

    fn read(&self, name: &str) -> String {
        fs::read_to_string(self.output_dir.join(name)).unwrap()
    }

    fn journal(&self) -> PathBuf {
        self.output_dir.join("generated.jsonl")
    }
}

async fn run(
    backend: ScriptedBackend,
    options: &RunOptions,
) -> (GenerationPipeline<ScriptedBackend>, MemorySink, Result<sftgen::RunStats>) {
    let mut pipeline = GenerationPipeline::new(backend, Config::default());
    let mut sink = MemorySink::new();
    let result = pipeline.run(options, &mut sink).await;
    (pipeline, sink, result)
}

fn error_events(sink: &MemorySink) -> usize {
    sink.events
        .iter()
        .filter(|e| matches!(e, Event::Error { .. }))
        .count()
}

const SEGMENT: &str = "X is a placeholder name used throughout this passage for Y.";

#[tokio::test]
async fn test_qa_reply_wrapped_in_prose() {
    let ws = Workspace::new(&[SEGMENT]);
    let backend = ScriptedBackend::answering(&[
        r#"Here: {"question": "What is X?", "answer": "X is Y."}"#,
    ]);

    let (pipeline, sink, result) = run(backend, &ws.options(GenerationMode::Qa, false)).await;
    let stats = result.unwrap();

    let expected = r#"{"messages":[{"role":"user","content":"What is X?"},{"role":"assistant","content":"X is Y."}]}"#;
    assert_eq!(ws.read(TRAIN_FILE), format!("{expected}\n"));
    assert_eq!(ws.read(VALID_FILE), format!("{expected}\n"));
    assert_eq!((stats.train_count, stats.valid_count), (1, 1));
    assert_eq!(pipeline.stage(), PipelineStage::Done);
    assert_eq!(
        sink.last(),
        Some(&Event::Complete {
            train_count: 1,
            valid_count: 1,
            failed_count: 0,
            similarity_rejected: 0,
            total: 1,
        })
    );
}

#[tokio::test]
async fn test_fenced_reply_matches_unwrapped() {
    let object = r#"{"instruction": "Summarize the passage.", "output": "X stands in for Y."}"#;
    let fenced = format!("```json\n{object}\n```");

    let plain_ws = Workspace::new(&[SEGMENT]);
    let fenced_ws = Workspace::new(&[SEGMENT]);
    run(
        ScriptedBackend::answering(&[object]),
        &plain_ws.options(GenerationMode::Instruct, false),
    )
    .await
    .2
    .unwrap();
    run(
        ScriptedBackend::answering(&[fenced.as_str()]),
        &fenced_ws.options(GenerationMode::Instruct, false),
    )
    .await
    .2
    .unwrap();

    assert_eq!(plain_ws.read(TRAIN_FILE), fenced_ws.read(TRAIN_FILE));
}

#[tokio::test]
async fn test_style_copy_counts_as_similarity_rejection() {
    let source: String = "Waves folded against the old pier while lanterns swayed overhead. "
        .repeat(4)
        .chars()
        .take(200)
        .collect();
    let copy = json!({"instruction": "Write a harbor scene.", "output": source.as_str()}).to_string();
    let novel =
        json!({"instruction": "Write a desert scene.", "output": "Dunes hummed; quick jackals zigzagged by."})
            .to_string();

    let ws = Workspace::new(&[source.as_str(), "A second passage about deserts and their silence at noon."]);
    let backend = ScriptedBackend::answering(&[copy.as_str(), novel.as_str()]);
    let (_, sink, result) = run(backend, &ws.options(GenerationMode::Style, false)).await;
    let stats = result.unwrap();

    assert_eq!(stats.similarity_rejected, 1);
    assert_eq!(stats.total_failed, 0);
    assert_eq!(stats.total_accepted, 1);
    assert!(sink.logs().any(|m| m.contains("too similar to the source (100%)")));
    assert!(matches!(
        sink.last(),
        Some(Event::Complete {
            failed_count: 0,
            similarity_rejected: 1,
            ..
        })
    ));
}

#[tokio::test]
async fn test_empty_reply_is_a_failure_without_parsing() {
    let ws = Workspace::new(&[SEGMENT, SEGMENT]);
    let backend = ScriptedBackend::new(vec![
        Some(ModelReply::default()),
        Some(ModelReply::answer(r#"{"question": "Q?", "answer": "A."}"#)),
    ]);

    let (pipeline, sink, result) = run(backend, &ws.options(GenerationMode::Qa, false)).await;
    let stats = result.unwrap();

    assert_eq!(stats.total_failed, 1);
    assert_eq!(pipeline.state().empty_replies, 1);
    assert_eq!(pipeline.state().parse_failures, 0);
    assert!(sink.logs().any(|m| m.contains("empty content")));
    assert!(!sink.logs().any(|m| m.starts_with("JSON parse failed")));
}

#[tokio::test]
async fn test_reasoning_channel_fallback() {
    let ws = Workspace::new(&[SEGMENT]);
    let backend = ScriptedBackend::new(vec![Some(ModelReply {
        answer_text: "  ".to_string(),
        reasoning_text: r#"{"question": "Q?", "answer": "A."}"#.to_string(),
        termination_reason: "stop".to_string(),
    })]);

    let (_, _, result) = run(backend, &ws.options(GenerationMode::Qa, false)).await;
    assert_eq!(result.unwrap().total_accepted, 1);
}

#[tokio::test]
async fn test_per_segment_failures_are_absorbed() {
    let ws = Workspace::new(&[SEGMENT, SEGMENT, SEGMENT, SEGMENT]);
    let backend = ScriptedBackend::new(vec![
        Some(ModelReply::answer("no json at all")),
        Some(ModelReply::answer(r#"{"question": "Q?", "answer": ""}"#)),
        None,
        Some(ModelReply::answer(r#"{"question": "Q?", "answer": "A."}"#)),
    ]);

    let (pipeline, sink, result) = run(backend, &ws.options(GenerationMode::Qa, false)).await;
    let stats = result.unwrap();

    let state = pipeline.state();
    assert_eq!(stats.total_failed, 3);
    assert_eq!(
        (state.parse_failures, state.schema_mismatches, state.backend_errors),
        (1, 1, 1)
    );
    assert_eq!(error_events(&sink), 0);
    assert!(sink.logs().any(|m| m.contains("JSON fields do not match")));
}

#[tokio::test]
async fn test_event_order() {
    let ws = Workspace::new(&[SEGMENT, SEGMENT]);
    let backend = ScriptedBackend::answering(&[
        r#"{"question": "Q1?", "answer": "A1."}"#,
        r#"{"question": "Q2?", "answer": "A2."}"#,
    ]);
    let (_, sink, result) = run(backend, &ws.options(GenerationMode::Qa, false)).await;
    result.unwrap();

    assert_eq!(
        sink.events.first(),
        Some(&Event::progress(0, 2, "Generating dataset with [scripted]..."))
    );
    let steps: Vec<usize> = sink
        .events
        .iter()
        .filter_map(|e| match e {
            Event::Progress { step, .. } => Some(*step),
            _ => None,
        })
        .collect();
    assert_eq!(steps, vec![0, 1, 2]);
    assert!(matches!(sink.last(), Some(Event::Complete { train_count: 1, valid_count: 1, .. })));
}

#[tokio::test]
async fn test_resume_with_nothing_left_is_byte_identical() {
    let ws = Workspace::new(&[SEGMENT, SEGMENT, SEGMENT]);
    let replies = [
        r#"{"question": "Q1?", "answer": "A1."}"#,
        r#"{"question": "Q2?", "answer": "A2."}"#,
        r#"{"question": "Q3?", "answer": "A3."}"#,
    ];
    run(ScriptedBackend::answering(&replies), &ws.options(GenerationMode::Qa, false))
        .await
        .2
        .unwrap();
    let train = ws.read(TRAIN_FILE);
    let valid = ws.read(VALID_FILE);

    let (pipeline, _, result) =
        run(ScriptedBackend::answering(&[]), &ws.options(GenerationMode::Qa, true)).await;
    let stats = result.unwrap();

    assert_eq!(stats.resumed_from, 3);
    assert_eq!(stats.total_accepted, 3);
    assert_eq!(pipeline.backend().requests().len(), 1, "only the probe");
    assert_eq!(ws.read(TRAIN_FILE), train);
    assert_eq!(ws.read(VALID_FILE), valid);
}

#[tokio::test]
async fn test_resume_skips_journaled_segments() {
    let ws = Workspace::new(&["first segment text", "second segment text", "third segment text"]);
    fs::create_dir_all(&ws.output_dir).unwrap();
    fs::write(
        ws.journal(),
        r#"{"messages":[{"role":"user","content":"Q0?"},{"role":"assistant","content":"A0."}]}"#.to_string() + "\n",
    )
    .unwrap();

    let backend = ScriptedBackend::answering(&[
        r#"{"question": "Q1?", "answer": "A1."}"#,
        r#"{"question": "Q2?", "answer": "A2."}"#,
    ]);
    let (pipeline, sink, result) = run(backend, &ws.options(GenerationMode::Qa, true)).await;
    let stats = result.unwrap();

    let requests = pipeline.backend().requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].user_message.contains("second segment text"));
    assert_eq!(stats.total_accepted, 3);
    assert_eq!(fs::read_to_string(ws.journal()).unwrap().lines().count(), 3);
    assert!(sink.logs().any(|m| m.contains("continuing from segment 2")));
}

#[tokio::test]
async fn test_resume_discards_torn_journal_tail() {
    let ws = Workspace::new(&["first segment text", "second segment text"]);
    fs::create_dir_all(&ws.output_dir).unwrap();
    let committed =
        r#"{"messages":[{"role":"user","content":"Q0?"},{"role":"assistant","content":"A0."}]}"#;
    fs::write(ws.journal(), format!("{committed}\n{{\"messages\":[{{\"role\":\"us")).unwrap();

    let backend = ScriptedBackend::answering(&[r#"{"question": "Q1?", "answer": "A1."}"#]);
    let (pipeline, _, result) = run(backend, &ws.options(GenerationMode::Qa, true)).await;
    let stats = result.unwrap();

    assert_eq!(stats.resumed_from, 1);
    assert_eq!(stats.total_accepted, 2);
    assert!(pipeline.backend().requests()[1].user_message.contains("second segment text"));

    let journal = fs::read_to_string(ws.journal()).unwrap();
    assert!(journal.starts_with(&format!("{committed}\n")));
    for name in [TRAIN_FILE, VALID_FILE] {
        for line in ws.read(name).lines() {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
    }
    assert_eq!(journal.lines().count(), 2);
}

/// Answers the probe at once, stalls on the first segment, then answers.
struct StallingBackend {
    calls: Mutex<usize>,
    stall: Duration,
}

#[async_trait]
impl ModelBackend for StallingBackend {
    fn model_name(&self) -> &str {
        "stalling"
    }

    async fn complete(&self, _request: &GenerationRequest) -> Result<ModelReply> {
        let call = {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            *calls
        };
        match call {
            1 => Ok(ModelReply::answer("OK")),
            2 => {
                tokio::time::sleep(self.stall).await;
                Ok(ModelReply::answer(r#"{"question": "Late?", "answer": "Too late."}"#))
            }
            _ => Ok(ModelReply::answer(r#"{"question": "Q?", "answer": "A."}"#)),
        }
    }
}

#[tokio::test]
async fn test_stalled_call_times_out_and_run_continues() {
    let ws = Workspace::new(&[SEGMENT, SEGMENT]);
    let mut config = Config::default();
    config.backend.timeout_secs = 1;
    let backend = StallingBackend {
        calls: Mutex::new(0),
        stall: Duration::from_secs(3),
    };

    let mut pipeline = GenerationPipeline::new(backend, config);
    let mut sink = MemorySink::new();
    let stats = pipeline
        .run(&ws.options(GenerationMode::Qa, false), &mut sink)
        .await
        .unwrap();

    assert_eq!(pipeline.state().backend_errors, 1);
    assert_eq!((stats.total_accepted, stats.total_failed), (1, 1));
    assert_eq!(error_events(&sink), 0);
    assert!(ws.read(TRAIN_FILE).contains("\"Q?\""));
    assert!(!ws.read(TRAIN_FILE).contains("Late?"));
}

#[tokio::test]
async fn test_fresh_run_truncates_journal() {
    let ws = Workspace::new(&[SEGMENT]);
    fs::create_dir_all(&ws.output_dir).unwrap();
    fs::write(ws.journal(), "{\"stale\":true}\n{\"stale\":true}\n").unwrap();

    let backend = ScriptedBackend::answering(&[r#"{"question": "Q?", "answer": "A."}"#]);
    run(backend, &ws.options(GenerationMode::Qa, false))
        .await
        .2
        .unwrap();

    let journal = fs::read_to_string(ws.journal()).unwrap();
    assert_eq!(journal.lines().count(), 1);
    assert!(!journal.contains("stale"));
}

#[tokio::test]
async fn test_probe_failure_is_fatal_and_leaves_journal_alone() {
    let ws = Workspace::new(&[SEGMENT]);
    fs::create_dir_all(&ws.output_dir).unwrap();
    fs::write(ws.journal(), "{\"kept\":true}\n").unwrap();

    let (pipeline, sink, result) =
        run(ScriptedBackend::unreachable(), &ws.options(GenerationMode::Qa, false)).await;

    assert!(matches!(result, Err(SftgenError::BackendUnreachable(_))));
    assert_eq!(pipeline.stage(), PipelineStage::Failed);
    assert_eq!(error_events(&sink), 1);
    assert!(matches!(sink.last(), Some(Event::Error { .. })));
    assert_eq!(fs::read_to_string(ws.journal()).unwrap(), "{\"kept\":true}\n");
}

#[tokio::test]
async fn test_input_without_usable_segments() {
    let temp_dir = TempDir::new().unwrap();
    let input = temp_dir.path().join("segments.jsonl");
    fs::write(&input, "\nnot json\n[1, 2]\n{\"text\": \"\"}\n{\"id\": 3}\n").unwrap();
    let options = RunOptions {
        input: input.clone(),
        output_dir: temp_dir.path().join("dataset"),
        mode: GenerationMode::Qa,
        resume: false,
        max_samples: None,
    };

    let (pipeline, sink, result) = run(ScriptedBackend::answering(&[]), &options).await;

    assert!(matches!(result, Err(SftgenError::EmptyInput(p)) if p == input));
    assert_eq!(sink.events.len(), 1);
    assert_eq!(error_events(&sink), 1);
    assert!(pipeline.backend().requests().is_empty());
}

#[tokio::test]
async fn test_missing_input() {
    let temp_dir = TempDir::new().unwrap();
    let options = RunOptions {
        input: temp_dir.path().join("absent.jsonl"),
        output_dir: temp_dir.path().join("dataset"),
        mode: GenerationMode::Qa,
        resume: false,
        max_samples: None,
    };

    let (_, sink, result) = run(ScriptedBackend::answering(&[]), &options).await;
    assert!(matches!(result, Err(SftgenError::InputNotFound(_))));
    assert_eq!(error_events(&sink), 1);
}

#[tokio::test]
async fn test_zero_successes_is_fatal() {
    let ws = Workspace::new(&[SEGMENT, SEGMENT]);
    let backend = ScriptedBackend::answering(&["nothing", "still nothing"]);

    let (pipeline, sink, result) = run(backend, &ws.options(GenerationMode::Qa, false)).await;

    assert!(matches!(result, Err(SftgenError::NoExamplesGenerated { total: 2 })));
    assert_eq!(pipeline.stage(), PipelineStage::Failed);
    assert!(matches!(sink.last(), Some(Event::Error { .. })));
    assert!(!ws.output_dir.join(TRAIN_FILE).exists());
}

#[tokio::test]
async fn test_segment_text_truncated_in_prompt() {
    let long: String = "é".repeat(2500);
    let ws = Workspace::new(&[long.as_str()]);
    let backend = ScriptedBackend::answering(&[r#"{"question": "Q?", "answer": "A."}"#]);

    let (pipeline, _, result) = run(backend, &ws.options(GenerationMode::Qa, false)).await;
    result.unwrap();

    let requests = pipeline.backend().requests();
    let user_message = &requests[1].user_message;
    assert_eq!(user_message.chars().filter(|c| *c == 'é').count(), 2000);
    assert_eq!(requests[1].max_output_tokens, 2048);
}

#[tokio::test]
async fn test_max_samples_caps_segments() {
    let ws = Workspace::new(&[SEGMENT, SEGMENT, SEGMENT, SEGMENT, SEGMENT]);
    let backend = ScriptedBackend::answering(&[
        r#"{"question": "Q1?", "answer": "A1."}"#,
        r#"{"question": "Q2?", "answer": "A2."}"#,
    ]);
    let mut options = ws.options(GenerationMode::Qa, false);
    options.max_samples = Some(2);

    let (pipeline, _, result) = run(backend, &options).await;
    let stats = result.unwrap();

    assert_eq!(stats.total_segments, 2);
    assert_eq!(pipeline.backend().requests().len(), 3);
}

#[tokio::test]
async fn test_chat_turns_pass_through_and_manifest_written() {
    let ws = Workspace::new(&[SEGMENT]);
    let reply = json!({"conversations": [
        {"role": "user", "content": "What is X?"},
        {"role": "assistant", "content": "A placeholder."},
        {"role": "user", "content": "For what?"},
        {"role": "assistant", "content": "For Y."}
    ]})
    .to_string();
    let backend = ScriptedBackend::answering(&[reply.as_str()]);

    let (_, _, result) = run(backend, &ws.options(GenerationMode::Chat, false)).await;
    result.unwrap();

    let line = ws.read(TRAIN_FILE);
    let example: sftgen::TrainingExample = serde_json::from_str(line.trim()).unwrap();
    assert_eq!(example.messages.len(), 4);
    assert_eq!(example.messages[3].content, "For Y.");

    assert!(ws.output_dir.join(MANIFEST_FILE).exists());
    let manifest = RunManifest::load(&ws.output_dir).unwrap();
    assert_eq!(manifest.mode, GenerationMode::Chat);
    assert_eq!(manifest.model, "scripted");
    assert_eq!(manifest.accepted, 1);
}

#[tokio::test]
async fn test_ten_examples_split_nine_one() {
    let texts = [SEGMENT; 10];
    let ws = Workspace::new(&texts);
    let replies: Vec<String> = (0..10)
        .map(|i| json!({"question": format!("Q{i}?"), "answer": format!("A{i}.")}).to_string())
        .collect();
    let reply_refs: Vec<&str> = replies.iter().map(String::as_str).collect();

    let (_, _, result) = run(
        ScriptedBackend::answering(&reply_refs),
        &ws.options(GenerationMode::Qa, false),
    )
    .await;
    let stats = result.unwrap();

    assert_eq!((stats.train_count, stats.valid_count), (9, 1));
    assert!(ws.read(VALID_FILE).contains("Q9?"));
}
