// src/worker/signals.rs

//! Shutdown signalling for worker processes.
//!
//! Pool children are stopped abruptly: the termination signals are turned into
//! a `SIGKILL` the child sends to itself, so nothing in flight is allowed to
//! finish and any job reserved at that moment is lost to this process. A lone
//! in-process worker instead gets its `ShutdownToken` tripped and stops before
//! reserving its next job.

use crate::core::SpinelQError;
use std::io;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};

const TERMINATION_SIGNALS: [libc::c_int; 3] = [libc::SIGTERM, libc::SIGINT, libc::SIGQUIT];

/// Read by the signal handler; set once per process.
static SIGNAL_TOKEN: OnceLock<ShutdownToken> = OnceLock::new();

/// A shared stop flag checked by worker loops between jobs.
#[derive(Debug, Clone, Default)]
pub struct ShutdownToken {
    flag: Arc<AtomicBool>,
}

impl ShutdownToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

extern "C" fn kill_self(_signal: libc::c_int) {
    // SAFETY: getpid and kill are async-signal-safe.
    unsafe {
        libc::kill(libc::getpid(), libc::SIGKILL);
    }
}

extern "C" fn trip_token(_signal: libc::c_int) {
    if let Some(token) = SIGNAL_TOKEN.get() {
        token.flag.store(true, Ordering::SeqCst);
    }
}

fn install(handler: extern "C" fn(libc::c_int)) -> Result<(), SpinelQError> {
    for signal in TERMINATION_SIGNALS {
        // SAFETY: `handler` only performs async-signal-safe operations.
        let previous = unsafe { libc::signal(signal, handler as libc::sighandler_t) };
        if previous == libc::SIG_ERR {
            return Err(SpinelQError::Io(Arc::new(io::Error::last_os_error())));
        }
    }
    Ok(())
}

/// Makes SIGTERM, SIGINT and SIGQUIT kill this process outright.
pub fn install_self_kill() -> Result<(), SpinelQError> {
    install(kill_self)
}

/// Makes SIGTERM, SIGINT and SIGQUIT trip `token`. Only the first token
/// installed in a process is wired to the handler; later calls return it.
pub fn install_shutdown_token(token: ShutdownToken) -> Result<ShutdownToken, SpinelQError> {
    let installed = SIGNAL_TOKEN.get_or_init(|| token).clone();
    install(trip_token)?;
    Ok(installed)
}
