// src/core/queue.rs

//! Queue primitives on top of the wire client.
//!
//! A queue named `q` is a list stored at `queue:q`, and every queue ever pushed
//! to is recorded in the `queues` set. Queues spring into existence on first
//! push and are never deleted here.

use crate::core::SpinelQError;
use crate::core::client::{BackendAddress, Client, Connector};
use crate::core::protocol::{Command, RespValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Key of the set holding every known queue name.
pub const QUEUES_KEY: &str = "queues";
const QUEUE_KEY_PREFIX: &str = "queue:";

pub fn queue_key(queue: &str) -> String {
    format!("{QUEUE_KEY_PREFIX}{queue}")
}

/// Everything needed to (re)open a connection to the backing store.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub connector: Arc<dyn Connector>,
    pub database: i64,
}

impl BackendConfig {
    pub fn new(address: BackendAddress, database: i64) -> Self {
        Self {
            connector: Arc::new(address),
            database,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self::new(BackendAddress::default(), 0)
    }
}

/// A lazily connected handle to the backing store.
///
/// No connection exists until the first command. `reset` drops the current one,
/// which is what a process must do before forking so that parent and child never
/// share a socket.
#[derive(Debug)]
pub struct Backend {
    config: BackendConfig,
    client: Option<Client>,
}

impl Backend {
    pub fn new(config: BackendConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    /// Returns the connected client, connecting first if needed.
    pub fn client(&mut self) -> Result<&mut Client, SpinelQError> {
        if self.client.is_none() {
            debug!("Opening backend connection (db {}).", self.config.database);
            let client = Client::connect(Arc::clone(&self.config.connector), self.config.database)?;
            self.client = Some(client);
        }
        self.client.as_mut().ok_or_else(|| SpinelQError::Connection {
            code: 0,
            message: "backend connection unavailable".to_string(),
        })
    }

    pub fn reset(&mut self) {
        self.client = None;
    }

    /// A new handle to the same backend that does not share this connection.
    pub fn detached(&self) -> Backend {
        Backend::new(self.config.clone())
    }
}

/// Push, pop, size and list operations over named queues. Errors from the
/// client propagate unchanged and nothing is retried here.
#[derive(Debug)]
pub struct QueueStore {
    backend: Backend,
}

impl QueueStore {
    pub fn new(backend: Backend) -> Self {
        Self { backend }
    }

    pub fn backend(&mut self) -> &mut Backend {
        &mut self.backend
    }

    /// Registers `queue` and appends the JSON encoding of `payload` to its tail.
    /// Returns the list length after the push.
    pub fn push<T: Serialize>(&mut self, queue: &str, payload: &T) -> Result<i64, SpinelQError> {
        let encoded = serde_json::to_vec(payload)?;
        let client = self.backend.client()?;
        client.call(Command::new("sadd").arg(QUEUES_KEY).arg(queue))?;
        let reply = client.call(Command::new("rpush").arg(queue_key(queue)).arg(encoded))?;
        expect_integer("RPUSH", reply)
    }

    /// Pops the head of `queue` and decodes it. `None` when the queue is empty
    /// or has never existed.
    pub fn pop<T: DeserializeOwned>(&mut self, queue: &str) -> Result<Option<T>, SpinelQError> {
        let reply = self
            .backend
            .client()?
            .call(Command::new("lpop").arg(queue_key(queue)))?;
        match reply {
            RespValue::Null | RespValue::NullArray => Ok(None),
            other => match other.as_bytes() {
                Some(bytes) if !bytes.is_empty() => Ok(Some(serde_json::from_slice(bytes)?)),
                Some(_) => Ok(None),
                None => Err(SpinelQError::Protocol(format!(
                    "unexpected LPOP reply: {other:?}"
                ))),
            },
        }
    }

    /// Number of pending items in `queue`; 0 when it does not exist.
    pub fn size(&mut self, queue: &str) -> Result<i64, SpinelQError> {
        let reply = self
            .backend
            .client()?
            .call(Command::new("llen").arg(queue_key(queue)))?;
        expect_integer("LLEN", reply)
    }

    /// All known queue names. Empty when the set is missing or the key holds
    /// something other than a set.
    pub fn queues(&mut self) -> Result<HashSet<String>, SpinelQError> {
        let reply = match self
            .backend
            .client()?
            .call(Command::new("smembers").arg(QUEUES_KEY))
        {
            Ok(reply) => reply,
            Err(e) if e.is_wrong_type() => return Ok(HashSet::new()),
            Err(e) => return Err(e),
        };

        Ok(match reply {
            RespValue::Array(items) => items
                .into_iter()
                .filter_map(RespValue::into_bytes)
                .map(|b| String::from_utf8_lossy(&b).into_owned())
                .collect(),
            _ => HashSet::new(),
        })
    }
}

fn expect_integer(command: &str, reply: RespValue) -> Result<i64, SpinelQError> {
    reply.as_integer().ok_or_else(|| {
        SpinelQError::Protocol(format!("unexpected {command} reply: {reply:?}"))
    })
}
