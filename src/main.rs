// src/main.rs

//! The main entry point for the SpinelQ worker daemon.

use anyhow::Result;
use spinelq::config::WorkerConfig;
use spinelq::core::job::JobQueue;
use spinelq::core::queue::{Backend, QueueStore};
use spinelq::worker::{
    OsProcess, PollingWorker, PoolOutcome, ScriptHandler, Supervisor, WorkerLoop,
};
use std::env;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, prelude::*};

fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    if env::args().any(|arg| arg == "--version") {
        println!("SpinelQ version {VERSION}");
        return Ok(());
    }

    // Configuration problems are fatal before anything else happens.
    let config = match WorkerConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    };

    // RUST_LOG wins over the verbosity flags.
    let log_level =
        env::var("RUST_LOG").unwrap_or_else(|_| config.verbosity.filter().to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::new(log_level))
        .with(
            tracing_subscriber::fmt::layer()
                .compact() // Use the compact, single-line format.
                .with_ansi(true), // Enable ANSI color codes for log levels.
        )
        .init();

    info!(
        "SpinelQ {} starting {} worker(s) on {} (db {}) for queues [{}]",
        VERSION,
        config.count,
        config.backend,
        config.database,
        config.queues.join(",")
    );

    let backend = Backend::new(config.backend_config());
    let mut supervisor = Supervisor::new(OsProcess, config.pool_options(), backend);

    let interval = config.interval;
    let script = config.app_include.clone();
    let outcome = supervisor.run(|backend, queues| {
        let worker = PollingWorker::new(
            queues.to_vec(),
            JobQueue::new(QueueStore::new(backend)),
            Box::new(ScriptHandler::new(script.clone())),
            interval,
        );
        Ok(Box::new(worker) as Box<dyn WorkerLoop>)
    });

    match outcome {
        Ok(PoolOutcome::Single) => Ok(()),
        Ok(PoolOutcome::Pool { workers, exits }) => {
            info!("Pool of {} finished; reaped {}.", workers.len(), exits.len());
            Ok(())
        }
        Err(e) => {
            error!("{}", e);
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}
