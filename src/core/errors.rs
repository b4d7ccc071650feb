// src/core/errors.rs

//! Defines the primary error type for the entire crate.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, covering the wire client, the queue layer and the
/// worker supervisor. Queue operations pass client errors through untouched.
#[derive(Error, Debug)]
pub enum SpinelQError {
    /// The stream to the backing store could not be opened or re-opened.
    #[error("Connection error ({code}): {message}")]
    Connection { code: i32, message: String },

    /// Malformed or unexpected bytes on the wire. The connection is no longer framed.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The backing store rejected a command. Carries the server message verbatim.
    #[error("{0}")]
    Remote(String),

    #[error("Could not fork worker {index}: {reason}")]
    Fork { index: usize, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Could not write PID information to {}: {source}", path.display())]
    PidFile {
        path: PathBuf,
        source: Arc<std::io::Error>,
    },

    #[error("JSON payload error: {0}")]
    Json(String),

    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    /// Internal codec signal: the read buffer does not yet hold a whole frame.
    #[error("Incomplete data in stream")]
    IncompleteData,
}

impl SpinelQError {
    /// Builds a `Connection` error from an OS-level failure, keeping its errno.
    pub fn connection(e: &std::io::Error) -> Self {
        SpinelQError::Connection {
            code: e.raw_os_error().unwrap_or(0),
            message: e.to_string(),
        }
    }

    /// True when the store answered with a `WRONGTYPE` rejection.
    pub fn is_wrong_type(&self) -> bool {
        matches!(self, SpinelQError::Remote(msg) if msg.starts_with("WRONGTYPE"))
    }
}

// Manual implementation of Clone because `std::io::Error` is not cloneable.
impl Clone for SpinelQError {
    fn clone(&self) -> Self {
        match self {
            SpinelQError::Connection { code, message } => SpinelQError::Connection {
                code: *code,
                message: message.clone(),
            },
            SpinelQError::Protocol(s) => SpinelQError::Protocol(s.clone()),
            SpinelQError::Remote(s) => SpinelQError::Remote(s.clone()),
            SpinelQError::Fork { index, reason } => SpinelQError::Fork {
                index: *index,
                reason: reason.clone(),
            },
            SpinelQError::Configuration(s) => SpinelQError::Configuration(s.clone()),
            SpinelQError::PidFile { path, source } => SpinelQError::PidFile {
                path: path.clone(),
                source: Arc::clone(source),
            },
            SpinelQError::Json(s) => SpinelQError::Json(s.clone()),
            SpinelQError::Io(e) => SpinelQError::Io(Arc::clone(e)),
            SpinelQError::IncompleteData => SpinelQError::IncompleteData,
        }
    }
}

impl PartialEq for SpinelQError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                SpinelQError::Connection { code: c1, message: m1 },
                SpinelQError::Connection { code: c2, message: m2 },
            ) => c1 == c2 && m1 == m2,
            (SpinelQError::Protocol(s1), SpinelQError::Protocol(s2)) => s1 == s2,
            (SpinelQError::Remote(s1), SpinelQError::Remote(s2)) => s1 == s2,
            (
                SpinelQError::Fork { index: i1, reason: r1 },
                SpinelQError::Fork { index: i2, reason: r2 },
            ) => i1 == i2 && r1 == r2,
            (SpinelQError::Configuration(s1), SpinelQError::Configuration(s2)) => s1 == s2,
            (SpinelQError::PidFile { path: p1, .. }, SpinelQError::PidFile { path: p2, .. }) => {
                p1 == p2
            }
            (SpinelQError::Json(s1), SpinelQError::Json(s2)) => s1 == s2,
            (SpinelQError::Io(e1), SpinelQError::Io(e2)) => e1.to_string() == e2.to_string(),
            _ => core::mem::discriminant(self) == core::mem::discriminant(other),
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for SpinelQError {
    fn from(e: std::io::Error) -> Self {
        SpinelQError::Io(Arc::new(e))
    }
}

impl From<serde_json::Error> for SpinelQError {
    fn from(e: serde_json::Error) -> Self {
        SpinelQError::Json(e.to_string())
    }
}
