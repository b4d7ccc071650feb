// src/config.rs

//! Worker bootstrap configuration: read from the environment, resolved, validated.

use crate::core::SpinelQError;
use crate::core::client::BackendAddress;
use crate::core::queue::BackendConfig;
use crate::worker::{PidFiles, PoolOptions};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Verbosity selected by the `LOGGING`/`VERBOSE`/`VVERBOSE` flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    #[default]
    Quiet,
    Normal,
    Verbose,
}

impl Verbosity {
    /// The default `EnvFilter` directive for this verbosity when `RUST_LOG` is unset.
    pub fn filter(self) -> &'static str {
        match self {
            Verbosity::Quiet => "warn",
            Verbosity::Normal => "info",
            Verbosity::Verbose => "debug",
        }
    }
}

/// A raw representation of the environment before validation and resolution.
/// Keys arrive lowercased from the `config` environment source.
#[derive(Deserialize, Debug, Default)]
struct RawConfig {
    queue: Option<String>,
    redis_backend: Option<String>,
    redis_backend_db: Option<String>,
    interval: Option<String>,
    count: Option<String>,
    pidfile: Option<String>,
    app_include: Option<String>,
    logging: Option<String>,
    verbose: Option<String>,
    vverbose: Option<String>,
}

/// Only these variables reach the `config` source; anything else in the
/// environment is ignored.
const RECOGNIZED_VARS: [&str; 10] = [
    "QUEUE",
    "REDIS_BACKEND",
    "REDIS_BACKEND_DB",
    "INTERVAL",
    "COUNT",
    "PIDFILE",
    "APP_INCLUDE",
    "LOGGING",
    "VERBOSE",
    "VVERBOSE",
];

fn default_interval() -> Duration {
    Duration::from_secs(5)
}

/// Represents the final, validated worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub queues: Vec<String>,
    pub backend: BackendAddress,
    pub database: i64,
    pub interval: Duration,
    pub count: usize,
    pub pid_file: Option<PathBuf>,
    pub app_include: Option<PathBuf>,
    pub verbosity: Verbosity,
}

/// Unset and empty variables are treated alike.
fn present(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn invalid(name: &str, value: &str, expected: &str) -> SpinelQError {
    SpinelQError::Configuration(format!("{name} ({value}) must be {expected}"))
}

impl WorkerConfig {
    /// Reads the configuration from the process environment.
    pub fn from_env() -> Result<Self, SpinelQError> {
        Self::from_vars(std::env::vars())
    }

    /// Reads the configuration from an explicit set of variables.
    pub fn from_vars<I>(vars: I) -> Result<Self, SpinelQError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let source: config::Map<String, String> = vars
            .into_iter()
            .filter(|(name, _)| RECOGNIZED_VARS.contains(&name.as_str()))
            .collect();
        let raw: RawConfig = config::Config::builder()
            .add_source(config::Environment::default().source(Some(source)))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| SpinelQError::Configuration(e.to_string()))?;

        let config = Self::resolve(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn resolve(raw: RawConfig) -> Result<Self, SpinelQError> {
        let queues: Vec<String> = present(raw.queue)
            .map(|q| {
                q.split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        if queues.is_empty() {
            return Err(SpinelQError::Configuration(
                "Set QUEUE env var containing the list of queues to work.".to_string(),
            ));
        }

        let backend = match present(raw.redis_backend) {
            Some(address) => address.parse()?,
            None => BackendAddress::default(),
        };

        let database = match present(raw.redis_backend_db) {
            Some(db) => db
                .parse::<i64>()
                .ok()
                .filter(|db| *db >= 0)
                .ok_or_else(|| invalid("REDIS_BACKEND_DB", &db, "a non-negative integer"))?,
            None => 0,
        };

        let interval = match present(raw.interval) {
            Some(secs) => secs
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .ok_or_else(|| invalid("INTERVAL", &secs, "a positive number of seconds"))?,
            None => default_interval(),
        };

        let count = match present(raw.count) {
            Some(count) => {
                let parsed = count
                    .parse::<i64>()
                    .map_err(|_| invalid("COUNT", &count, "an integer"))?;
                parsed.max(1) as usize
            }
            None => 1,
        };

        let verbosity = if present(raw.vverbose).is_some() {
            Verbosity::Verbose
        } else if present(raw.logging).is_some() || present(raw.verbose).is_some() {
            Verbosity::Normal
        } else {
            Verbosity::Quiet
        };

        Ok(WorkerConfig {
            queues,
            backend,
            database,
            interval,
            count,
            pid_file: present(raw.pidfile).map(PathBuf::from),
            app_include: present(raw.app_include).map(PathBuf::from),
            verbosity,
        })
    }

    /// Validates the resolved configuration against the filesystem.
    fn validate(&self) -> Result<(), SpinelQError> {
        if let Some(include) = &self.app_include
            && !include.exists()
        {
            return Err(SpinelQError::Configuration(format!(
                "APP_INCLUDE ({}) does not exist.",
                include.display()
            )));
        }
        Ok(())
    }

    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(self.backend.clone(), self.database)
    }

    pub fn pool_options(&self) -> PoolOptions {
        PoolOptions {
            count: self.count,
            queues: self.queues.clone(),
            pid_files: self.pid_file.clone().map(PidFiles::new),
        }
    }
}
