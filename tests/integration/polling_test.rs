// tests/integration/polling_test.rs

use super::test_helpers::{MemoryConnector, init_tracing};
use anyhow::bail;
use serde_json::json;
use spinelq::core::Command;
use spinelq::core::SpinelQError;
use spinelq::core::job::{JobPayload, JobQueue, ReservedJob};
use spinelq::core::queue::queue_key;
use spinelq::worker::{JobHandler, PollingWorker, ScriptHandler, ShutdownToken, WorkerLoop};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every job it sees. Fails jobs of class `Boom`, and trips `stop_after`
/// once that many jobs have been seen.
#[derive(Clone, Default)]
struct Recorder {
    seen: Arc<Mutex<Vec<(String, String)>>>,
    stop_after: Option<(usize, ShutdownToken)>,
}

impl JobHandler for Recorder {
    fn perform(&mut self, job: &ReservedJob) -> anyhow::Result<()> {
        let mut seen = self.seen.lock().unwrap();
        seen.push((job.queue.clone(), job.payload.class.clone()));
        if let Some((limit, token)) = &self.stop_after
            && seen.len() >= *limit
        {
            token.trigger();
        }
        if job.payload.class == "Boom" {
            bail!("boom");
        }
        Ok(())
    }
}

fn worker(memory: &MemoryConnector, queues: &[&str], handler: Recorder) -> PollingWorker {
    PollingWorker::new(
        queues.iter().map(|q| q.to_string()).collect(),
        JobQueue::new(memory.store()),
        Box::new(handler),
        Duration::ZERO,
    )
}

fn seed(memory: &MemoryConnector, queue: &str, class: &str) {
    JobQueue::new(memory.store())
        .enqueue(queue, class, vec![json!(1)], false)
        .unwrap();
}

#[test]
fn test_queues_are_polled_in_priority_order() {
    init_tracing();
    let memory = MemoryConnector::new();
    seed(&memory, "low", "Later");
    seed(&memory, "high", "First");
    seed(&memory, "high", "Second");

    let recorder = Recorder::default();
    let mut worker = worker(&memory, &["high", "low"], recorder.clone());

    while worker.work_once().unwrap() {}

    assert_eq!(
        *recorder.seen.lock().unwrap(),
        vec![
            ("high".to_string(), "First".to_string()),
            ("high".to_string(), "Second".to_string()),
            ("low".to_string(), "Later".to_string()),
        ]
    );
    assert_eq!(worker.processed(), 3);
    assert_eq!(worker.failed(), 0);
}

#[test]
fn test_wildcard_expands_to_sorted_known_queues() {
    let memory = MemoryConnector::new();
    seed(&memory, "beta", "B");
    seed(&memory, "alpha", "A");

    let mut worker = worker(&memory, &["*"], Recorder::default());
    assert_eq!(
        worker.resolve_queues().unwrap(),
        vec!["alpha".to_string(), "beta".to_string()]
    );

    let job = worker.reserve_next().unwrap().expect("job");
    assert_eq!(job.queue, "alpha");
}

#[test]
fn test_wildcard_with_no_known_queues_finds_nothing() {
    let memory = MemoryConnector::new();
    let mut worker = worker(&memory, &["*"], Recorder::default());

    assert!(worker.resolve_queues().unwrap().is_empty());
    assert!(!worker.work_once().unwrap());
}

#[test]
fn test_failed_jobs_are_counted_and_polling_continues() {
    let memory = MemoryConnector::new();
    seed(&memory, "q", "Boom");
    seed(&memory, "q", "Fine");

    let recorder = Recorder::default();
    let mut worker = worker(&memory, &["q"], recorder.clone());

    assert!(worker.work_once().unwrap());
    assert!(worker.work_once().unwrap());
    assert!(!worker.work_once().unwrap());
    assert_eq!(worker.processed(), 1);
    assert_eq!(worker.failed(), 1);
}

#[test]
fn test_work_stops_once_token_trips() {
    let memory = MemoryConnector::new();
    for class in ["One", "Two", "Three"] {
        seed(&memory, "q", class);
    }

    let token = ShutdownToken::new();
    let recorder = Recorder {
        stop_after: Some((2, token.clone())),
        ..Recorder::default()
    };
    let mut worker = worker(&memory, &["q"], recorder.clone());

    worker.work(&token).unwrap();

    assert_eq!(worker.processed(), 2);
    assert_eq!(memory.store().size("q").unwrap(), 1);
}

#[test]
fn test_work_returns_immediately_when_already_stopped() {
    let memory = MemoryConnector::new();
    seed(&memory, "q", "Untouched");

    let token = ShutdownToken::new();
    token.trigger();
    let mut worker = worker(&memory, &["q"], Recorder::default());
    worker.work(&token).unwrap();

    assert_eq!(worker.processed(), 0);
    assert_eq!(memory.store().size("q").unwrap(), 1);
}

#[test]
fn test_backend_errors_surface_from_a_single_poll() {
    let memory = MemoryConnector::new();
    memory
        .backend()
        .client()
        .unwrap()
        .call(Command::new("set").arg(queue_key("q")).arg("not a list"))
        .unwrap();

    let mut worker = worker(&memory, &["q"], Recorder::default());
    let err = worker.work_once().unwrap_err();
    assert!(err.is_wrong_type());
    assert!(matches!(err, SpinelQError::Remote(_)));
}

#[test]
fn test_describe_names_host_pid_and_queues() {
    let memory = MemoryConnector::new();
    let worker = worker(&memory, &["high", "low"], Recorder::default());

    let description = worker.describe();
    let pid = std::process::id().to_string();
    assert!(description.ends_with(&format!(":{pid}:high,low")));
}

fn reserved(class: &str) -> ReservedJob {
    ReservedJob {
        queue: "scripts".to_string(),
        payload: JobPayload::new(class, vec![json!("arg")]).with_id("id-1"),
    }
}

#[test]
fn test_script_handler_without_script_accepts_jobs() {
    let mut handler = ScriptHandler::new(None);
    handler.perform(&reserved("Anything")).unwrap();
}

#[test]
fn test_script_handler_succeeds_when_script_exits_zero() {
    let mut handler = ScriptHandler::new(Some(PathBuf::from("/bin/true")));
    handler.perform(&reserved("Ok")).unwrap();
}

#[test]
fn test_script_handler_fails_when_script_exits_nonzero() {
    let mut handler = ScriptHandler::new(Some(PathBuf::from("/bin/false")));
    let err = handler.perform(&reserved("Nope")).unwrap_err();
    assert!(err.to_string().contains("Nope"));
}

#[test]
fn test_script_handler_reports_missing_script() {
    let mut handler = ScriptHandler::new(Some(PathBuf::from("/nonexistent/handler")));
    let err = handler.perform(&reserved("Lost")).unwrap_err();
    assert!(err.to_string().contains("failed to start"));
}
