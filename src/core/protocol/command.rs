// src/core/protocol/command.rs

use super::{RespFrame, RespFrameCodec};
use bytes::{Bytes, BytesMut};
use tokio_util::codec::Encoder;

/// A single request to the backing store: an uppercased command name followed
/// by its arguments, all sent as bulk strings.
///
/// A `Command` is built with chained `arg` calls and cannot be changed once it
/// has been handed to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_ascii_uppercase(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<[u8]>) -> Self {
        self.args.push(Bytes::copy_from_slice(arg.as_ref()));
        self
    }

    pub fn args<I, A>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.args
            .extend(args.into_iter().map(|a| Bytes::copy_from_slice(a.as_ref())));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arguments(&self) -> &[Bytes] {
        &self.args
    }

    /// Serializes the command as `*<argc>\r\n($<len>\r\n<bytes>\r\n)+`.
    pub fn encode(&self) -> Bytes {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(RespFrame::BulkString(Bytes::copy_from_slice(
            self.name.as_bytes(),
        )));
        parts.extend(self.args.iter().cloned().map(RespFrame::BulkString));

        let mut buf = BytesMut::new();
        // Encoding bulk strings into memory cannot fail.
        let _ = RespFrameCodec.encode(RespFrame::Array(parts), &mut buf);
        buf.freeze()
    }
}

impl From<Command> for RespFrame {
    fn from(cmd: Command) -> Self {
        let mut parts = vec![RespFrame::BulkString(Bytes::from(cmd.name))];
        parts.extend(cmd.args.into_iter().map(RespFrame::BulkString));
        RespFrame::Array(parts)
    }
}
