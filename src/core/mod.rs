// src/core/mod.rs

//! The wire client, the reply model and the queue primitives built on them.

pub mod client;
pub mod errors;
pub mod job;
pub mod protocol;
pub mod queue;

pub use errors::SpinelQError;
pub use protocol::{Command, RespValue};
