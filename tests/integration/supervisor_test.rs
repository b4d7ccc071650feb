// tests/integration/supervisor_test.rs

use super::test_helpers::{FakeProcess, MemoryConnector, init_tracing};
use spinelq::core::SpinelQError;
use spinelq::core::queue::Backend;
use spinelq::worker::{
    ChildExit, ExitStatus, PidFiles, PoolOptions, PoolOutcome, ShutdownToken, Supervisor,
    WorkerLoop, WorkerProcess,
};
use std::fs;
use std::sync::{Arc, Mutex};

/// A worker loop that records that it ran and returns immediately.
struct OneShot {
    runs: Arc<Mutex<Vec<Vec<String>>>>,
    queues: Vec<String>,
}

impl WorkerLoop for OneShot {
    fn work(&mut self, _shutdown: &ShutdownToken) -> Result<(), SpinelQError> {
        self.runs.lock().unwrap().push(self.queues.clone());
        Ok(())
    }

    fn describe(&self) -> String {
        format!("test:0:{}", self.queues.join(","))
    }
}

fn options(count: usize, pid_files: Option<PidFiles>) -> PoolOptions {
    PoolOptions {
        count,
        queues: vec!["high".to_string(), "low".to_string()],
        pid_files,
    }
}

fn supervisor(
    process: FakeProcess,
    options: PoolOptions,
    backend: Backend,
) -> Supervisor<FakeProcess> {
    Supervisor::new(process, options, backend).without_signal_handlers()
}

#[test]
fn test_count_of_one_runs_in_process_without_forking() {
    init_tracing();
    let memory = MemoryConnector::new();
    let runs = Arc::new(Mutex::new(Vec::new()));
    let mut sup = supervisor(FakeProcess::default(), options(1, None), memory.backend());

    let outcome = sup
        .run(|_backend, queues| {
            Ok(Box::new(OneShot {
                runs: Arc::clone(&runs),
                queues: queues.to_vec(),
            }) as Box<dyn WorkerLoop>)
        })
        .unwrap();

    assert_eq!(outcome, PoolOutcome::Single);
    assert_eq!(sup.process().forks, 0);
    assert_eq!(*runs.lock().unwrap(), vec![vec!["high", "low"]]);
}

#[test]
fn test_count_of_zero_behaves_like_one() {
    let memory = MemoryConnector::new();
    let runs = Arc::new(Mutex::new(Vec::new()));
    let mut sup = supervisor(FakeProcess::default(), options(0, None), memory.backend());

    let outcome = sup
        .run(|_backend, queues| {
            Ok(Box::new(OneShot {
                runs: Arc::clone(&runs),
                queues: queues.to_vec(),
            }) as Box<dyn WorkerLoop>)
        })
        .unwrap();

    assert_eq!(outcome, PoolOutcome::Single);
    assert_eq!(sup.process().forks, 0);
    assert_eq!(runs.lock().unwrap().len(), 1);
}

#[test]
fn test_factory_error_in_single_mode_is_returned() {
    let memory = MemoryConnector::new();
    let mut sup = supervisor(FakeProcess::default(), options(1, None), memory.backend());

    let err = sup
        .run(|_, _| Err(SpinelQError::Configuration("no handler".to_string())))
        .unwrap_err();
    assert_eq!(err, SpinelQError::Configuration("no handler".to_string()));
}

#[test]
fn test_pool_forks_count_children_and_reaps_them_all() {
    let memory = MemoryConnector::new();
    let mut sup = supervisor(FakeProcess::default(), options(3, None), memory.backend());

    let outcome = sup
        .run(|_, _| panic!("the factory only runs in a child"))
        .unwrap();

    let queues = vec!["high".to_string(), "low".to_string()];
    assert_eq!(
        outcome,
        PoolOutcome::Pool {
            workers: (0..3)
                .map(|index| WorkerProcess {
                    index,
                    pid: 5000 + index as i32,
                    queues: queues.clone(),
                })
                .collect(),
            exits: (0..3)
                .map(|index| ChildExit {
                    pid: 5000 + index as i32,
                    status: ExitStatus::Code(index as i32),
                })
                .collect(),
        }
    );
    assert_eq!(sup.process().forks, 3);
    // Three exits plus the final "no children left".
    assert_eq!(sup.process().waits, 4);
    assert!(sup.process().terminated.is_empty());
}

#[test]
fn test_fork_failure_stops_already_started_children() {
    let memory = MemoryConnector::new();
    let process = FakeProcess {
        fail_at: Some(1),
        ..FakeProcess::default()
    };
    let mut sup = supervisor(process, options(3, None), memory.backend());

    let err = sup.run(|_, _| panic!("never in the parent")).unwrap_err();

    assert!(matches!(err, SpinelQError::Fork { index: 1, .. }));
    assert_eq!(sup.process().terminated, vec![5000]);
    assert_eq!(sup.process().forks, 2);
}

#[test]
fn test_backend_is_disconnected_before_each_fork() {
    let memory = MemoryConnector::new();
    let mut backend = memory.backend();
    backend.client().unwrap().ping().unwrap();
    assert!(backend.is_connected());

    let mut sup = supervisor(FakeProcess::default(), options(2, None), backend);
    sup.run(|_, _| panic!("never in the parent")).unwrap();

    assert!(!sup.backend().is_connected());
}

#[test]
fn test_pool_writes_group_and_pid_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("spinelq.pid");
    let memory = MemoryConnector::new();
    let mut sup = supervisor(
        FakeProcess::default(),
        options(2, Some(PidFiles::new(&path))),
        memory.backend(),
    );

    sup.run(|_, _| panic!("never in the parent")).unwrap();

    assert_eq!(fs::read_to_string(&path).unwrap(), "4242");
    assert_eq!(
        fs::read_to_string(dir.path().join("spinelq.pidg")).unwrap(),
        "4200"
    );
}

#[test]
fn test_single_mode_writes_pid_files_before_working() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("worker.pid");
    let memory = MemoryConnector::new();
    let mut sup = supervisor(
        FakeProcess::default(),
        options(1, Some(PidFiles::new(&path))),
        memory.backend(),
    );

    let seen = Arc::new(Mutex::new(None));
    let seen_in_worker = Arc::clone(&seen);
    let pid_path = path.clone();

    struct ReadsPidFile {
        path: std::path::PathBuf,
        seen: Arc<Mutex<Option<String>>>,
    }
    impl WorkerLoop for ReadsPidFile {
        fn work(&mut self, _shutdown: &ShutdownToken) -> Result<(), SpinelQError> {
            *self.seen.lock().unwrap() = fs::read_to_string(&self.path).ok();
            Ok(())
        }
        fn describe(&self) -> String {
            "reads-pid-file".to_string()
        }
    }

    sup.run(move |_, _| {
        Ok(Box::new(ReadsPidFile {
            path: pid_path.clone(),
            seen: Arc::clone(&seen_in_worker),
        }) as Box<dyn WorkerLoop>)
    })
    .unwrap();

    assert_eq!(seen.lock().unwrap().as_deref(), Some("4242"));
}

#[test]
fn test_unwritable_pid_file_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing-dir").join("worker.pid");
    let memory = MemoryConnector::new();
    let mut sup = supervisor(
        FakeProcess::default(),
        options(2, Some(PidFiles::new(&path))),
        memory.backend(),
    );

    let err = sup.run(|_, _| panic!("never in the parent")).unwrap_err();
    match err {
        SpinelQError::PidFile { path: failed, .. } => {
            assert_eq!(failed, dir.path().join("missing-dir").join("worker.pidg"));
        }
        other => panic!("expected pid file error, got {other:?}"),
    }
    // The forked workers do not outlive the failed start.
    assert_eq!(sup.process().terminated, vec![5000, 5001]);
    assert_eq!(sup.process().waits, 0);
}

#[test]
fn test_reap_with_no_children_returns_immediately() {
    let memory = MemoryConnector::new();
    let mut sup = supervisor(FakeProcess::default(), options(2, None), memory.backend());

    assert_eq!(sup.reap().unwrap(), Vec::<ChildExit>::new());
    assert_eq!(sup.process().waits, 1);
}

#[test]
fn test_shutdown_token_reaches_in_process_worker() {
    struct UntilStopped {
        polls: Arc<Mutex<u32>>,
    }
    impl WorkerLoop for UntilStopped {
        fn work(&mut self, shutdown: &ShutdownToken) -> Result<(), SpinelQError> {
            while !shutdown.is_triggered() {
                *self.polls.lock().unwrap() += 1;
            }
            Ok(())
        }
        fn describe(&self) -> String {
            "until-stopped".to_string()
        }
    }

    let memory = MemoryConnector::new();
    let mut sup = supervisor(FakeProcess::default(), options(1, None), memory.backend());
    let token = sup.shutdown_token();
    token.trigger();

    let polls = Arc::new(Mutex::new(0));
    let polls_in_worker = Arc::clone(&polls);
    sup.run(move |_, _| {
        Ok(Box::new(UntilStopped {
            polls: Arc::clone(&polls_in_worker),
        }) as Box<dyn WorkerLoop>)
    })
    .unwrap();

    assert_eq!(*polls.lock().unwrap(), 0);
}
