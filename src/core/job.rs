// src/core/job.rs

//! Job payloads and the collaborator seams around the queue primitives.
//!
//! Job persistence, reservation and event hooks are pluggable. The defaults
//! store the bare payload in the queue list and log events.

use crate::core::SpinelQError;
use crate::core::queue::QueueStore;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info};

/// The JSON document stored in a queue list for each job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub class: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl JobPayload {
    pub fn new(class: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            class: class.into(),
            args,
            id: None,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// A job reserved from a queue, ready to be performed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReservedJob {
    pub queue: String,
    pub payload: JobPayload,
}

/// Persists a new job. Returns its id, or `None` if the job was not created.
pub trait JobCreator: Send {
    fn create(
        &self,
        store: &mut QueueStore,
        queue: &str,
        class: &str,
        args: Vec<Value>,
        track_status: bool,
    ) -> Result<Option<String>, SpinelQError>;
}

/// Atomically takes the next job off a queue, if any.
pub trait JobReserver: Send {
    fn reserve(
        &self,
        store: &mut QueueStore,
        queue: &str,
    ) -> Result<Option<ReservedJob>, SpinelQError>;
}

/// Receives named lifecycle events such as `afterEnqueue`.
pub trait EventDispatcher: Send {
    fn trigger(&self, name: &str, payload: &Value);
}

/// Stores payloads directly in the queue list, identified by a fresh UUID.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectJobs;

impl JobCreator for DirectJobs {
    fn create(
        &self,
        store: &mut QueueStore,
        queue: &str,
        class: &str,
        args: Vec<Value>,
        track_status: bool,
    ) -> Result<Option<String>, SpinelQError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        if track_status {
            debug!("Status tracking requested for job {}; not supported by DirectJobs.", id);
        }
        store.push(queue, &JobPayload::new(class, args).with_id(id.clone()))?;
        Ok(Some(id))
    }
}

impl JobReserver for DirectJobs {
    fn reserve(
        &self,
        store: &mut QueueStore,
        queue: &str,
    ) -> Result<Option<ReservedJob>, SpinelQError> {
        Ok(store
            .pop::<JobPayload>(queue)?
            .map(|payload| ReservedJob {
                queue: queue.to_string(),
                payload,
            }))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogEvents;

impl EventDispatcher for LogEvents {
    fn trigger(&self, name: &str, payload: &Value) {
        info!(event = name, %payload, "event triggered");
    }
}

/// The producer/consumer facade: queue primitives plus the job collaborators.
pub struct JobQueue {
    store: QueueStore,
    creator: Box<dyn JobCreator>,
    reserver: Box<dyn JobReserver>,
    events: Box<dyn EventDispatcher>,
}

impl JobQueue {
    /// A facade using `DirectJobs` and `LogEvents`.
    pub fn new(store: QueueStore) -> Self {
        Self::with_collaborators(
            store,
            Box::new(DirectJobs),
            Box::new(DirectJobs),
            Box::new(LogEvents),
        )
    }

    pub fn with_collaborators(
        store: QueueStore,
        creator: Box<dyn JobCreator>,
        reserver: Box<dyn JobReserver>,
        events: Box<dyn EventDispatcher>,
    ) -> Self {
        Self {
            store,
            creator,
            reserver,
            events,
        }
    }

    pub fn store(&mut self) -> &mut QueueStore {
        &mut self.store
    }

    /// Creates a job of `class` on `queue` and fires `afterEnqueue` once it exists.
    pub fn enqueue(
        &mut self,
        queue: &str,
        class: &str,
        args: Vec<Value>,
        track_status: bool,
    ) -> Result<Option<String>, SpinelQError> {
        let id = self
            .creator
            .create(&mut self.store, queue, class, args.clone(), track_status)?;
        if id.is_some() {
            self.events.trigger(
                "afterEnqueue",
                &json!({ "class": class, "args": args, "queue": queue }),
            );
        }
        Ok(id)
    }

    pub fn reserve(&mut self, queue: &str) -> Result<Option<ReservedJob>, SpinelQError> {
        self.reserver.reserve(&mut self.store, queue)
    }
}
