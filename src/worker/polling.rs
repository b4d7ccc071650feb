// src/worker/polling.rs

//! The default worker loop: poll queues in order, perform one job at a time.

use super::process::hostname;
use super::signals::ShutdownToken;
use crate::core::SpinelQError;
use crate::core::job::{JobQueue, ReservedJob};
use anyhow::{Context, anyhow};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::process::{Command as ProcessCommand, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Sleep granularity while idle, so a tripped token is noticed promptly.
const IDLE_SLICE: Duration = Duration::from_millis(100);

/// Queue name that stands for every known queue.
pub const ALL_QUEUES: &str = "*";

/// A worker loop as run by the supervisor, in-process or in a forked child.
pub trait WorkerLoop {
    /// Runs until `shutdown` trips or the loop gives up.
    fn work(&mut self, shutdown: &ShutdownToken) -> Result<(), SpinelQError>;

    /// `host:pid:queue,queue` identifier used in logs.
    fn describe(&self) -> String;
}

/// Performs a single reserved job.
pub trait JobHandler: Send {
    fn perform(&mut self, job: &ReservedJob) -> anyhow::Result<()>;
}

/// Runs the configured script for each job, feeding it the payload as JSON on
/// stdin. Without a script, jobs are only logged.
#[derive(Debug, Clone, Default)]
pub struct ScriptHandler {
    script: Option<PathBuf>,
}

impl ScriptHandler {
    pub fn new(script: Option<PathBuf>) -> Self {
        Self { script }
    }
}

impl JobHandler for ScriptHandler {
    fn perform(&mut self, job: &ReservedJob) -> anyhow::Result<()> {
        let Some(script) = &self.script else {
            info!(
                queue = %job.queue,
                class = %job.payload.class,
                "Received job; no handler script configured."
            );
            return Ok(());
        };

        let input = serde_json::to_vec(&job.payload)?;
        let mut child = ProcessCommand::new(script)
            .env("SPINELQ_QUEUE", &job.queue)
            .env("SPINELQ_JOB_CLASS", &job.payload.class)
            .stdin(Stdio::piped())
            .spawn()
            .with_context(|| format!("failed to start {}", script.display()))?;

        // A script may exit without reading its input.
        if let Some(mut stdin) = child.stdin.take()
            && let Err(e) = stdin.write_all(&input)
            && e.kind() != ErrorKind::BrokenPipe
        {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e).context("failed to write job payload to handler stdin");
        }

        let status = child.wait().context("failed to wait for job handler")?;
        if status.success() {
            Ok(())
        } else {
            Err(anyhow!("handler for {} exited with {}", job.payload.class, status))
        }
    }
}

/// Reserves jobs from `queues` in priority order and hands each to the handler.
/// Sleeps `interval` whenever a full pass finds nothing.
pub struct PollingWorker {
    queues: Vec<String>,
    jobs: JobQueue,
    handler: Box<dyn JobHandler>,
    interval: Duration,
    processed: u64,
    failed: u64,
}

impl PollingWorker {
    pub fn new(
        queues: Vec<String>,
        jobs: JobQueue,
        handler: Box<dyn JobHandler>,
        interval: Duration,
    ) -> Self {
        Self {
            queues,
            jobs,
            handler,
            interval,
            processed: 0,
            failed: 0,
        }
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn failed(&self) -> u64 {
        self.failed
    }

    /// The queues to poll this pass. `*` expands to every known queue, sorted.
    pub fn resolve_queues(&mut self) -> Result<Vec<String>, SpinelQError> {
        if !self.queues.iter().any(|q| q == ALL_QUEUES) {
            return Ok(self.queues.clone());
        }
        let mut all: Vec<String> = self.jobs.store().queues()?.into_iter().collect();
        all.sort();
        Ok(all)
    }

    /// Reserves the first available job across the queues, if any.
    pub fn reserve_next(&mut self) -> Result<Option<ReservedJob>, SpinelQError> {
        for queue in self.resolve_queues()? {
            if let Some(job) = self.jobs.reserve(&queue)? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// One poll: reserve and perform at most one job. Returns whether a job ran.
    pub fn work_once(&mut self) -> Result<bool, SpinelQError> {
        let Some(job) = self.reserve_next()? else {
            return Ok(false);
        };

        debug!(queue = %job.queue, class = %job.payload.class, "Got job");
        match self.handler.perform(&job) {
            Ok(()) => {
                self.processed += 1;
                info!(queue = %job.queue, class = %job.payload.class, "Job done");
            }
            Err(e) => {
                self.failed += 1;
                error!(queue = %job.queue, class = %job.payload.class, "Job failed: {:#}", e);
            }
        }
        Ok(true)
    }

    fn idle(&self, shutdown: &ShutdownToken) {
        let deadline = Instant::now() + self.interval;
        while !shutdown.is_triggered() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(IDLE_SLICE.min(deadline - now));
        }
    }
}

impl WorkerLoop for PollingWorker {
    fn work(&mut self, shutdown: &ShutdownToken) -> Result<(), SpinelQError> {
        info!("Worker {} polling every {:?}", self.describe(), self.interval);
        while !shutdown.is_triggered() {
            match self.work_once() {
                Ok(true) => continue,
                Ok(false) => debug!("Sleeping for {:?}", self.interval),
                Err(e) => {
                    // The next poll reconnects from scratch.
                    warn!("Polling failed: {}", e);
                    self.jobs.store().backend().reset();
                }
            }
            self.idle(shutdown);
        }
        info!(
            "Worker {} exiting: {} processed, {} failed",
            self.describe(),
            self.processed,
            self.failed
        );
        Ok(())
    }

    fn describe(&self) -> String {
        format!("{}:{}:{}", hostname(), std::process::id(), self.queues.join(","))
    }
}
