// src/worker/mod.rs

//! Worker processes: the pool supervisor, the default polling loop, and the
//! process, signal and pid-file plumbing they need.

pub mod pidfile;
pub mod polling;
pub mod process;
pub mod signals;
pub mod supervisor;

pub use pidfile::PidFiles;
pub use polling::{JobHandler, PollingWorker, ScriptHandler, WorkerLoop};
pub use process::{ChildExit, ExitStatus, Fork, OsProcess, ProcessControl};
pub use signals::ShutdownToken;
pub use supervisor::{PoolOptions, PoolOutcome, Supervisor, WorkerProcess};
