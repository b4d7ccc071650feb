// src/core/client/mod.rs

//! A blocking RESP client with explicit pipelining.
//!
//! Every command goes through the pipeline queue. Outside of pipelining the
//! queue is flushed immediately, so a call returns its reply before the next
//! call is made. With pipelining active, commands accumulate until `flush`,
//! which writes them all and then reads exactly one reply per command.
//!
//! # Connection loss
//!
//! `flush` may reopen the stream at most once. A stream found closed before
//! writing is reopened (re-selecting its database) and the batch goes out on
//! the new one. A stream that closes after the batch was written is reopened
//! too, but the batch fails with `SpinelQError::Connection`: the store may
//! already have applied those commands, so they are never written twice. A
//! second closure within the same flush fails without further connects.
//!
//! Any failure other than a rejection by the store drops the stream, so a
//! stale reply can never be read as the answer to a later command.

pub mod transport;

pub use transport::{AnyStream, BackendAddress, Connector, Transport};

use crate::core::SpinelQError;
use crate::core::protocol::{
    Command, FrameScanner, RespFrame, RespFrameCodec, RespValue, normalize,
};
use bytes::{Bytes, BytesMut};
use std::io::{ErrorKind, Write};
use std::sync::Arc;
use tokio_util::codec::Decoder;
use tracing::{debug, warn};

const READ_CHUNK: usize = 4096;

/// The result of `Client::invoke`.
#[derive(Debug, Clone, PartialEq)]
pub enum Invoked {
    /// Pipelining was off: the decoded and normalized reply.
    Reply(RespValue),
    /// Pipelining was on: the position this command's reply will take in the
    /// vector returned by the next `flush`.
    Deferred(usize),
}

#[derive(Debug)]
struct QueuedCommand {
    name: String,
    bytes: Bytes,
}

enum ReadOutcome {
    Frame(RespFrame),
    /// The peer closed the stream before any byte of the reply arrived.
    Closed,
}

/// Why a batch stopped short.
enum Interrupted {
    Failed(SpinelQError),
    /// The stream closed after the batch was written.
    StreamLost { unanswered: usize },
}

impl From<SpinelQError> for Interrupted {
    fn from(e: SpinelQError) -> Self {
        Interrupted::Failed(e)
    }
}

/// One persistent connection to the backing store. Not meant to be shared
/// between threads, and never across a `fork`.
pub struct Client {
    connector: Arc<dyn Connector>,
    database: i64,
    stream: Option<Box<dyn Transport>>,
    codec: RespFrameCodec,
    scanner: FrameScanner,
    read_buf: BytesMut,
    queue: Vec<QueuedCommand>,
    pipelined: bool,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("connector", &self.connector)
            .field("database", &self.database)
            .field("connected", &self.stream.is_some())
            .field("queued", &self.queue.len())
            .field("pipelined", &self.pipelined)
            .finish()
    }
}

impl Client {
    /// Opens the stream and, when `database` is non-zero, selects it. The
    /// `SELECT` reply is discarded.
    pub fn connect(connector: Arc<dyn Connector>, database: i64) -> Result<Self, SpinelQError> {
        let mut client = Self {
            connector,
            database,
            stream: None,
            codec: RespFrameCodec,
            scanner: FrameScanner::new(),
            read_buf: BytesMut::with_capacity(READ_CHUNK),
            queue: Vec::new(),
            pipelined: false,
        };
        client.open()?;
        Ok(client)
    }

    pub fn database(&self) -> i64 {
        self.database
    }

    pub fn is_pipelined(&self) -> bool {
        self.pipelined
    }

    /// Number of commands waiting for the next `flush`.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Turns pipelining on. Subsequent `invoke` calls queue without flushing.
    pub fn begin_pipeline(&mut self) -> &mut Self {
        self.pipelined = true;
        self
    }

    /// Queues `command` and, unless pipelining, flushes it right away.
    pub fn invoke(&mut self, command: Command) -> Result<Invoked, SpinelQError> {
        self.queue.push(QueuedCommand {
            name: command.name().to_string(),
            bytes: command.encode(),
        });

        if self.pipelined {
            return Ok(Invoked::Deferred(self.queue.len() - 1));
        }

        let reply = self.flush()?.into_iter().next().ok_or_else(|| {
            SpinelQError::Protocol("no reply read for a flushed command".to_string())
        })?;
        Ok(Invoked::Reply(reply))
    }

    /// Sends `command` and waits for its reply. Not available while pipelining.
    pub fn call(&mut self, command: Command) -> Result<RespValue, SpinelQError> {
        if self.pipelined {
            return Err(SpinelQError::Protocol(format!(
                "cannot wait for a reply to {} while pipelining; use invoke and flush",
                command.name()
            )));
        }
        match self.invoke(command)? {
            Invoked::Reply(value) => Ok(value),
            Invoked::Deferred(index) => Err(SpinelQError::Protocol(format!(
                "reply {index} was deferred unexpectedly"
            ))),
        }
    }

    /// Writes every queued command, reads one reply per command, and clears the
    /// queue and the pipelining flag.
    ///
    /// The queue is cleared whatever the outcome, so a failed batch never leaks
    /// into the next call. When a command is rejected by the store, the remaining
    /// replies are still read to keep the stream framed, and the first rejection
    /// is returned for the batch. On any other error the stream is dropped and
    /// the next call connects afresh.
    pub fn flush(&mut self) -> Result<Vec<RespValue>, SpinelQError> {
        let queued = std::mem::take(&mut self.queue);
        self.pipelined = false;

        if queued.is_empty() {
            return Ok(Vec::new());
        }

        let mut reconnects_left = 1u8;
        match self.transmit(&queued, &mut reconnects_left) {
            Ok(replies) => Ok(replies),
            Err(Interrupted::Failed(e @ SpinelQError::Remote(_))) => Err(e),
            Err(Interrupted::Failed(e)) => {
                warn!("Backend connection failed: {}; dropping it.", e);
                self.disconnect();
                Err(e)
            }
            Err(Interrupted::StreamLost { unanswered }) => {
                self.reconnect(&mut reconnects_left)?;
                Err(SpinelQError::Connection {
                    code: 0,
                    message: format!(
                        "connection closed with {unanswered} of {} replies outstanding; \
                         the commands were not resent",
                        queued.len()
                    ),
                })
            }
        }
    }

    /// `SELECT <index>`; the new index is also used for later reconnects.
    pub fn select(&mut self, database: i64) -> Result<RespValue, SpinelQError> {
        let reply = self.call(Command::new("select").arg(database.to_string()))?;
        self.database = database;
        Ok(reply)
    }

    pub fn ping(&mut self) -> Result<RespValue, SpinelQError> {
        self.call(Command::new("ping"))
    }

    /// Drops the stream without sending anything. The next flush reconnects.
    pub fn disconnect(&mut self) {
        self.stream = None;
        self.read_buf.clear();
        self.scanner.reset();
    }

    fn transmit(
        &mut self,
        queued: &[QueuedCommand],
        reconnects_left: &mut u8,
    ) -> Result<Vec<RespValue>, Interrupted> {
        // 1. Make sure there is a live stream before writing.
        if self.stream.is_none() {
            self.open()?;
        } else if self.stream_closed() {
            self.reconnect(reconnects_left)?;
        }

        // 2. Write the whole batch. From here on nothing is written again.
        self.write_commands(queued)?;

        // 3. Read exactly one reply per command, in order.
        let mut replies = Vec::with_capacity(queued.len());
        let mut first_rejection = None;
        while replies.len() < queued.len() {
            let index = replies.len();
            let frame = match self.read_frame()? {
                ReadOutcome::Frame(frame) => frame,
                ReadOutcome::Closed => {
                    return Err(Interrupted::StreamLost {
                        unanswered: queued.len() - index,
                    });
                }
            };

            let name = &queued[index].name;
            match RespValue::try_from(frame) {
                Ok(value) => replies.push(normalize(name, value)),
                Err(e) => {
                    debug!("{} rejected by backend: {}", name, e);
                    first_rejection.get_or_insert(e);
                    replies.push(RespValue::Null);
                }
            }
        }

        match first_rejection {
            Some(e) => Err(Interrupted::Failed(e)),
            None => Ok(replies),
        }
    }

    fn open(&mut self) -> Result<(), SpinelQError> {
        self.read_buf.clear();
        self.scanner.reset();
        let mut stream = self.connector.connect()?;
        if self.database != 0 {
            select_on(&mut stream, &mut self.scanner, &mut self.read_buf, self.database)?;
        }
        self.stream = Some(stream);
        Ok(())
    }

    fn reconnect(&mut self, reconnects_left: &mut u8) -> Result<(), SpinelQError> {
        self.disconnect();
        if *reconnects_left == 0 {
            return Err(SpinelQError::Connection {
                code: 0,
                message: "connection closed by peer again after reconnecting".to_string(),
            });
        }
        *reconnects_left -= 1;
        debug!("Backend closed the connection; reconnecting.");
        self.open()
    }

    fn stream_closed(&mut self) -> bool {
        self.stream.as_mut().is_none_or(|s| s.is_closed())
    }

    fn write_commands(&mut self, commands: &[QueuedCommand]) -> Result<(), SpinelQError> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        for command in commands {
            write_fully(stream.as_mut(), &command.bytes)?;
        }
        stream
            .flush()
            .map_err(|e| SpinelQError::Protocol(format!("failed to flush commands: {e}")))
    }

    fn read_frame(&mut self) -> Result<ReadOutcome, SpinelQError> {
        let stream = self.stream.as_mut().ok_or_else(not_connected)?;
        read_frame_from(
            stream.as_mut(),
            &mut self.codec,
            &mut self.scanner,
            &mut self.read_buf,
        )
    }
}

fn not_connected() -> SpinelQError {
    SpinelQError::Connection {
        code: 0,
        message: "not connected".to_string(),
    }
}

/// Writes `bytes` completely, tolerating short writes.
fn write_fully(stream: &mut dyn Transport, bytes: &[u8]) -> Result<(), SpinelQError> {
    let mut written = 0;
    while written < bytes.len() {
        match stream.write(&bytes[written..]) {
            Ok(0) => {
                return Err(SpinelQError::Protocol(
                    "Failed to write entire command to stream".to_string(),
                ));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => {
                return Err(SpinelQError::Protocol(format!(
                    "Failed to write entire command to stream: {e}"
                )));
            }
        }
    }
    Ok(())
}

/// Reads until one whole frame can be decoded from `buf`. The scanner keeps its
/// place between reads; the frame is decoded once, when it is complete.
fn read_frame_from(
    stream: &mut dyn Transport,
    codec: &mut RespFrameCodec,
    scanner: &mut FrameScanner,
    buf: &mut BytesMut,
) -> Result<ReadOutcome, SpinelQError> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if scanner.advance(buf)
            && let Some(frame) = codec.decode(buf)?
        {
            scanner.reset();
            return Ok(ReadOutcome::Frame(frame));
        }

        match stream.read(&mut chunk) {
            Ok(0) if buf.is_empty() => return Ok(ReadOutcome::Closed),
            Ok(0) => {
                return Err(SpinelQError::Protocol(
                    "Error reading reply: stream ended in the middle of a reply".to_string(),
                ));
            }
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e)
                if buf.is_empty()
                    && matches!(
                        e.kind(),
                        ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::UnexpectedEof
                    ) =>
            {
                return Ok(ReadOutcome::Closed);
            }
            Err(e) if buf.is_empty() => return Err(SpinelQError::connection(&e)),
            Err(e) => {
                return Err(SpinelQError::Protocol(format!("Error reading reply: {e}")));
            }
        }
    }
}

/// Issues `SELECT` directly on a freshly opened stream, bypassing the queue.
fn select_on(
    stream: &mut Box<dyn Transport>,
    scanner: &mut FrameScanner,
    buf: &mut BytesMut,
    database: i64,
) -> Result<(), SpinelQError> {
    let select = Command::new("select").arg(database.to_string());
    write_fully(stream.as_mut(), &select.encode())?;
    stream
        .flush()
        .map_err(|e| SpinelQError::Protocol(format!("failed to flush SELECT: {e}")))?;

    match read_frame_from(stream.as_mut(), &mut RespFrameCodec, scanner, buf)? {
        ReadOutcome::Frame(RespFrame::Error(msg)) => {
            warn!("SELECT {} rejected by backend: {}", database, msg);
            Ok(())
        }
        ReadOutcome::Frame(_) => Ok(()),
        ReadOutcome::Closed => Err(SpinelQError::Connection {
            code: 0,
            message: format!("connection closed while selecting database {database}"),
        }),
    }
}
