// src/lib.rs

pub mod config;
pub mod core;
pub mod worker;

// Re-export
pub use crate::core::client::Client;
pub use crate::core::queue::{Backend, BackendConfig, QueueStore};
pub use crate::core::{Command, RespValue, SpinelQError};
