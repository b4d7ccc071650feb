// src/worker/pidfile.rs

use crate::core::SpinelQError;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// The two pid files read by external supervisors: `<path>` holds the process
/// id and `<path>g` the process-group id. Both are overwritten on each start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PidFiles {
    path: PathBuf,
}

impl PidFiles {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn pid_path(&self) -> &Path {
        &self.path
    }

    pub fn group_path(&self) -> PathBuf {
        let mut name = OsString::from(self.path.as_os_str());
        name.push("g");
        PathBuf::from(name)
    }

    /// Writes the group file first, then the pid file. Either failure is fatal.
    pub fn write(&self, process_group: i32, pid: i32) -> Result<(), SpinelQError> {
        let group_path = self.group_path();
        write_int(&group_path, process_group)?;
        write_int(&self.path, pid)?;
        debug!(
            "Wrote pid {} to {} and process group {} to {}",
            pid,
            self.path.display(),
            process_group,
            group_path.display()
        );
        Ok(())
    }
}

fn write_int(path: &Path, value: i32) -> Result<(), SpinelQError> {
    fs::write(path, value.to_string()).map_err(|e| SpinelQError::PidFile {
        path: path.to_path_buf(),
        source: Arc::new(e),
    })
}
