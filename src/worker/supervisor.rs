// src/worker/supervisor.rs

//! The worker pool supervisor.
//!
//! With a pool size of one or less the worker loop runs in the current process
//! and `run` blocks until it stops. Otherwise the supervisor forks one child per
//! worker, writes the pid files, and then does nothing but reap children until
//! none remain. Each child opens its own backend connection lazily; the parent's
//! handle is reset before every fork so no socket is ever shared.

use super::pidfile::PidFiles;
use super::polling::WorkerLoop;
use super::process::{ChildExit, ExitStatus, Fork, ProcessControl};
use super::signals::{self, ShutdownToken};
use crate::core::SpinelQError;
use crate::core::queue::Backend;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    pub count: usize,
    pub queues: Vec<String>,
    pub pid_files: Option<PidFiles>,
}

/// A forked worker, remembered only until it is reaped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerProcess {
    pub index: usize,
    pub pid: i32,
    pub queues: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolOutcome {
    /// The in-process worker loop returned.
    Single,
    /// Every forked child has been reaped.
    Pool {
        workers: Vec<WorkerProcess>,
        exits: Vec<ChildExit>,
    },
}

pub struct Supervisor<P: ProcessControl> {
    process: P,
    options: PoolOptions,
    backend: Backend,
    shutdown: ShutdownToken,
    install_signals: bool,
}

impl<P: ProcessControl> Supervisor<P> {
    pub fn new(process: P, options: PoolOptions, backend: Backend) -> Self {
        Self {
            process,
            options,
            backend,
            shutdown: ShutdownToken::new(),
            install_signals: true,
        }
    }

    /// Leaves the process signal dispositions alone. The in-process worker then
    /// stops only through the token returned by `shutdown_token`.
    pub fn without_signal_handlers(mut self) -> Self {
        self.install_signals = false;
        self
    }

    pub fn shutdown_token(&self) -> ShutdownToken {
        self.shutdown.clone()
    }

    pub fn process(&self) -> &P {
        &self.process
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Starts the pool. `factory` builds a worker loop from a fresh, unconnected
    /// backend handle and the queue list; in pool mode it only ever runs inside
    /// the child.
    pub fn run<F>(&mut self, mut factory: F) -> Result<PoolOutcome, SpinelQError>
    where
        F: FnMut(Backend, &[String]) -> Result<Box<dyn WorkerLoop>, SpinelQError>,
    {
        if self.options.count <= 1 {
            self.run_single(&mut factory)?;
            return Ok(PoolOutcome::Single);
        }

        let workers = self.spawn_pool(&mut factory)?;
        if let Err(e) = self.write_pid_files() {
            error!("Could not record the pool's pid files: {}", e);
            self.stop_workers(&workers);
            return Err(e);
        }
        let exits = self.reap()?;
        Ok(PoolOutcome::Pool { workers, exits })
    }

    fn run_single<F>(&mut self, factory: &mut F) -> Result<(), SpinelQError>
    where
        F: FnMut(Backend, &[String]) -> Result<Box<dyn WorkerLoop>, SpinelQError>,
    {
        let mut worker = factory(self.backend.detached(), &self.options.queues)?;
        self.write_pid_files()?;

        if self.install_signals {
            self.shutdown = signals::install_shutdown_token(self.shutdown.clone())?;
        }

        info!("*** Starting worker {}", worker.describe());
        worker.work(&self.shutdown)
    }

    fn spawn_pool<F>(&mut self, factory: &mut F) -> Result<Vec<WorkerProcess>, SpinelQError>
    where
        F: FnMut(Backend, &[String]) -> Result<Box<dyn WorkerLoop>, SpinelQError>,
    {
        let mut workers = Vec::with_capacity(self.options.count);
        for index in 0..self.options.count {
            // The child must open its own connection; never inherit ours.
            self.backend.reset();

            match self.process.fork() {
                Ok(Fork::Child) => {
                    let code = self.run_child(index, factory);
                    self.process.exit(code);
                }
                Ok(Fork::Parent { child }) => {
                    info!(pid = child, index, "Forked worker");
                    workers.push(WorkerProcess {
                        index,
                        pid: child,
                        queues: self.options.queues.clone(),
                    });
                }
                Err(e) => {
                    error!("Could not fork worker {}: {}", index, e);
                    // A short pool silently changes capacity; stop the ones we have.
                    self.stop_workers(&workers);
                    return Err(SpinelQError::Fork {
                        index,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(workers)
    }

    fn stop_workers(&mut self, workers: &[WorkerProcess]) {
        for worker in workers {
            self.process.terminate(worker.pid);
        }
    }

    /// Body of a forked child. Returns the exit code, which is the spawn index
    /// and only serves to correlate log lines.
    fn run_child<F>(&mut self, index: usize, factory: &mut F) -> i32
    where
        F: FnMut(Backend, &[String]) -> Result<Box<dyn WorkerLoop>, SpinelQError>,
    {
        let code = index as i32;

        if self.install_signals
            && let Err(e) = signals::install_self_kill()
        {
            error!("Worker {} could not install its signal handlers: {}", index, e);
            return code;
        }

        let mut worker = match factory(self.backend.detached(), &self.options.queues) {
            Ok(worker) => worker,
            Err(e) => {
                error!("Worker {} could not start: {}", index, e);
                return code;
            }
        };

        info!("*** Starting worker {}", worker.describe());
        if let Err(e) = worker.work(&self.shutdown) {
            error!("Worker {} stopped with an error: {}", index, e);
        }
        code
    }

    fn write_pid_files(&self) -> Result<(), SpinelQError> {
        if let Some(pid_files) = &self.options.pid_files {
            pid_files.write(self.process.process_group(), self.process.pid())?;
        }
        Ok(())
    }

    /// Waits for children until none remain, logging each exit.
    pub fn reap(&mut self) -> Result<Vec<ChildExit>, SpinelQError> {
        let mut exits = Vec::new();
        while let Some(exit) = self.process.wait_any()? {
            match exit.status {
                ExitStatus::Code(_) => {
                    info!(pid = exit.pid, "*** Worker {} terminated", exit.status)
                }
                ExitStatus::Signaled(_) => {
                    warn!(pid = exit.pid, "*** Worker killed by {}", exit.status)
                }
            }
            exits.push(exit);
        }
        info!("All {} workers have exited.", exits.len());
        Ok(exits)
    }
}
