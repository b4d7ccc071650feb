// src/worker/process.rs

//! OS process primitives used by the supervisor, behind a trait so the pool
//! logic can be driven without really forking.

use crate::core::SpinelQError;
use std::io;
use std::sync::Arc;

/// Which side of a successful fork the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fork {
    Child,
    Parent { child: i32 },
}

/// How a reaped child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Code(i32),
    Signaled(i32),
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "{code}"),
            ExitStatus::Signaled(signal) => write!(f, "signal {signal}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildExit {
    pub pid: i32,
    pub status: ExitStatus,
}

pub trait ProcessControl {
    /// Splits the process. Errors when forking is unavailable or refused.
    fn fork(&mut self) -> Result<Fork, SpinelQError>;

    /// Blocks until some child in the process group exits. `None` once no
    /// children remain.
    fn wait_any(&mut self) -> Result<Option<ChildExit>, SpinelQError>;

    fn pid(&self) -> i32;

    fn process_group(&self) -> i32;

    /// Asks a child to stop (SIGTERM).
    fn terminate(&mut self, pid: i32);

    fn exit(&self, code: i32) -> !;
}

/// `ProcessControl` backed by the real OS calls.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcess;

impl ProcessControl for OsProcess {
    fn fork(&mut self) -> Result<Fork, SpinelQError> {
        // SAFETY: the supervisor forks from a single-threaded process before any
        // backend connection is opened.
        match unsafe { libc::fork() } {
            -1 => Err(SpinelQError::Io(Arc::new(io::Error::last_os_error()))),
            0 => Ok(Fork::Child),
            child => Ok(Fork::Parent { child }),
        }
    }

    fn wait_any(&mut self) -> Result<Option<ChildExit>, SpinelQError> {
        loop {
            let mut status: libc::c_int = 0;
            // SAFETY: `status` is a valid out-pointer for the duration of the call.
            let pid = unsafe { libc::waitpid(0, &mut status, 0) };
            if pid == -1 {
                let err = io::Error::last_os_error();
                match err.raw_os_error() {
                    Some(libc::EINTR) => continue,
                    Some(libc::ECHILD) => return Ok(None),
                    _ => return Err(SpinelQError::Io(Arc::new(err))),
                }
            }

            let status = if libc::WIFEXITED(status) {
                ExitStatus::Code(libc::WEXITSTATUS(status))
            } else if libc::WIFSIGNALED(status) {
                ExitStatus::Signaled(libc::WTERMSIG(status))
            } else {
                continue;
            };
            return Ok(Some(ChildExit { pid, status }));
        }
    }

    fn pid(&self) -> i32 {
        std::process::id() as i32
    }

    fn process_group(&self) -> i32 {
        // SAFETY: getpgrp has no preconditions and cannot fail.
        unsafe { libc::getpgrp() }
    }

    fn terminate(&mut self, pid: i32) {
        // SAFETY: plain signal delivery to a pid we forked.
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }
    }

    fn exit(&self, code: i32) -> ! {
        std::process::exit(code)
    }
}

/// This machine's hostname, for worker identifiers.
pub fn hostname() -> String {
    let mut buf = [0u8; 256];
    // SAFETY: the buffer length passed matches the buffer.
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr() as *mut libc::c_char, buf.len()) };
    if rc != 0 {
        return "localhost".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
