// src/core/protocol/mod.rs

pub mod command;
pub mod normalize;
pub mod resp_frame;
pub mod resp_value;

pub use command::Command;
pub use normalize::{Normalization, normalize};
pub use resp_frame::{CRLF, FrameScanner, RespFrame, RespFrameCodec};
pub use resp_value::RespValue;
