// src/core/protocol/resp_frame.rs

//! Implements the RESP (REdis Serialization Protocol) frame structure and the
//! corresponding `Encoder` and `Decoder` used by the wire client.

use crate::core::SpinelQError;
use bytes::{Buf, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// The CRLF (Carriage Return, Line Feed) sequence used to terminate lines in RESP.
pub const CRLF: &[u8] = b"\r\n";
const CRLF_LEN: usize = 2;

// Protocol-level limits so a corrupt length header cannot exhaust memory.
const MAX_FRAME_ELEMENTS: usize = 1_024 * 1_024; // Max elements in an array.
const MAX_BULK_STRING_SIZE: usize = 512 * 1024 * 1024; // 512MB max bulk string size.
const MAX_RECURSION_DEPTH: usize = 256;
const PREALLOCATED_ELEMENTS: usize = 1_024;

/// A single frame in the RESP protocol, exactly as it travelled on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum RespFrame {
    SimpleString(String),
    Error(String),
    Integer(i64),
    BulkString(Bytes),
    /// `$-1`: the value is absent.
    Null,
    /// `*-1`: the array itself is absent.
    NullArray,
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// A convenience method to encode a frame into a standalone buffer.
    pub fn encode_to_bytes(&self) -> Result<Bytes, SpinelQError> {
        let mut buf = BytesMut::new();
        RespFrameCodec.encode(self.clone(), &mut buf)?;
        Ok(buf.freeze())
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `RespFrame`s.
/// The traits are used synchronously over blocking streams.
#[derive(Debug, Default, Clone, Copy)]
pub struct RespFrameCodec;

fn put_len(dst: &mut BytesMut, prefix: u8, len: usize) {
    let mut fmt = itoa::Buffer::new();
    dst.extend_from_slice(&[prefix]);
    dst.extend_from_slice(fmt.format(len).as_bytes());
    dst.extend_from_slice(CRLF);
}

impl Encoder<RespFrame> for RespFrameCodec {
    type Error = SpinelQError;

    fn encode(&mut self, item: RespFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            RespFrame::SimpleString(s) => {
                dst.extend_from_slice(b"+");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Error(s) => {
                dst.extend_from_slice(b"-");
                dst.extend_from_slice(s.as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Integer(i) => {
                let mut fmt = itoa::Buffer::new();
                dst.extend_from_slice(b":");
                dst.extend_from_slice(fmt.format(i).as_bytes());
                dst.extend_from_slice(CRLF);
            }
            RespFrame::BulkString(b) => {
                put_len(dst, b'$', b.len());
                dst.extend_from_slice(&b);
                dst.extend_from_slice(CRLF);
            }
            RespFrame::Null => {
                dst.extend_from_slice(b"$-1\r\n");
            }
            RespFrame::NullArray => {
                dst.extend_from_slice(b"*-1\r\n");
            }
            RespFrame::Array(arr) => {
                put_len(dst, b'*', arr.len());
                for frame in arr {
                    self.encode(frame, dst)?;
                }
            }
        }
        Ok(())
    }
}

impl Decoder for RespFrameCodec {
    type Item = RespFrame;
    type Error = SpinelQError;

    /// Decodes one whole `RespFrame` from the front of `src`, consuming its bytes.
    /// Returns `Ok(None)` while the buffer holds only part of a frame.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let mut bytes = &src[..];
        match self.decode_recursive(&mut bytes, 0) {
            Ok(frame) => {
                let len = src.len() - bytes.len();
                src.advance(len);
                Ok(Some(frame))
            }
            Err(SpinelQError::IncompleteData) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Tracks how much of a buffered reply has been seen, across reads.
///
/// `advance` walks frame headers without copying anything and remembers where
/// it stopped, so feeding a large reply in small chunks stays linear. It answers
/// `true` once the buffer holds a whole frame, or holds something malformed that
/// `RespFrameCodec::decode` will reject; only then is it worth decoding. Call
/// `reset` after each decoded frame and whenever the buffer is discarded.
#[derive(Debug, Default, Clone)]
pub struct FrameScanner {
    pos: usize,
    /// Elements still expected by each array opened so far, innermost last.
    pending: Vec<usize>,
    ready: bool,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.pos = 0;
        self.pending.clear();
        self.ready = false;
    }

    pub fn advance(&mut self, buf: &[u8]) -> bool {
        while !self.ready {
            let rest = &buf[self.pos.min(buf.len())..];
            let Some(&tag) = rest.first() else {
                return false;
            };
            let Some(line_end) = find_crlf(&rest[1..]) else {
                return !matches!(tag, b'+' | b'-' | b':' | b'$' | b'*');
            };
            let header = 1 + line_end + CRLF_LEN;
            let line = &rest[1..1 + line_end];

            match tag {
                b'+' | b'-' | b':' => {
                    self.pos += header;
                    self.element_done();
                }
                b'$' => match header_len(line) {
                    Some(-1) => {
                        self.pos += header;
                        self.element_done();
                    }
                    Some(len) if len >= 0 && len as usize <= MAX_BULK_STRING_SIZE => {
                        let total = header + len as usize + CRLF_LEN;
                        if rest.len() < total {
                            return false;
                        }
                        self.pos += total;
                        self.element_done();
                    }
                    _ => self.ready = true,
                },
                b'*' => match header_len(line) {
                    Some(-1) | Some(0) => {
                        self.pos += header;
                        self.element_done();
                    }
                    Some(len) if len > 0 && len as usize <= MAX_FRAME_ELEMENTS => {
                        self.pos += header;
                        self.pending.push(len as usize);
                        if self.pending.len() > MAX_RECURSION_DEPTH {
                            self.ready = true;
                        }
                    }
                    _ => self.ready = true,
                },
                _ => self.ready = true,
            }
        }
        true
    }

    fn element_done(&mut self) {
        loop {
            match self.pending.last_mut() {
                None => {
                    self.ready = true;
                    return;
                }
                Some(left) => {
                    *left -= 1;
                    if *left > 0 {
                        return;
                    }
                    self.pending.pop();
                }
            }
        }
    }
}

fn header_len(line: &[u8]) -> Option<isize> {
    std::str::from_utf8(line).ok()?.trim().parse().ok()
}

impl RespFrameCodec {
    fn decode_recursive(&self, bytes: &mut &[u8], depth: usize) -> Result<RespFrame, SpinelQError> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(SpinelQError::Protocol(
                "reply nesting depth limit exceeded".to_string(),
            ));
        }

        if bytes.is_empty() {
            return Err(SpinelQError::IncompleteData);
        }

        match bytes[0] {
            b'+' => self.parse_simple_string(bytes),
            b'-' => self.parse_error(bytes),
            b':' => self.parse_integer(bytes),
            b'$' => self.parse_bulk_string(bytes),
            b'*' => self.parse_array(bytes, depth),
            _ => {
                // Report the offending line when it is complete, for diagnostics.
                let shown = match find_crlf(bytes) {
                    Some(pos) => String::from_utf8_lossy(&bytes[..pos]).to_string(),
                    None => String::from_utf8_lossy(&bytes[..1]).to_string(),
                };
                Err(SpinelQError::Protocol(format!("Unknown response: {shown}")))
            }
        }
    }

    /// Splits off the next CRLF-terminated line, advancing past the terminator.
    fn parse_line<'a>(&self, bytes: &mut &'a [u8]) -> Result<&'a [u8], SpinelQError> {
        if let Some(pos) = find_crlf(bytes) {
            let line = &bytes[..pos];
            *bytes = &bytes[pos + CRLF_LEN..];
            Ok(line)
        } else {
            Err(SpinelQError::IncompleteData)
        }
    }

    fn parse_header_len(&self, line: &[u8], kind: &str) -> Result<isize, SpinelQError> {
        let s = String::from_utf8_lossy(line);
        s.trim()
            .parse::<isize>()
            .map_err(|_| SpinelQError::Protocol(format!("invalid {kind} length header '{s}'")))
    }

    /// Parses a Simple String (e.g., `+OK\r\n`).
    fn parse_simple_string(&self, bytes: &mut &[u8]) -> Result<RespFrame, SpinelQError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        Ok(RespFrame::SimpleString(
            String::from_utf8_lossy(line).to_string(),
        ))
    }

    /// Parses an Error (e.g., `-ERR message\r\n`). The message is kept verbatim.
    fn parse_error(&self, bytes: &mut &[u8]) -> Result<RespFrame, SpinelQError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        Ok(RespFrame::Error(String::from_utf8_lossy(line).to_string()))
    }

    /// Parses an Integer (e.g., `:1000\r\n`).
    fn parse_integer(&self, bytes: &mut &[u8]) -> Result<RespFrame, SpinelQError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        let s = String::from_utf8_lossy(line);
        let i = s
            .trim()
            .parse::<i64>()
            .map_err(|_| SpinelQError::Protocol(format!("invalid integer reply '{s}'")))?;
        Ok(RespFrame::Integer(i))
    }

    /// Parses a Bulk String (e.g., `$5\r\nhello\r\n`).
    fn parse_bulk_string(&self, bytes: &mut &[u8]) -> Result<RespFrame, SpinelQError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        let str_len = self.parse_header_len(line, "bulk")?;

        if str_len == -1 {
            return Ok(RespFrame::Null);
        }
        if str_len < 0 {
            return Err(SpinelQError::Protocol(format!(
                "negative bulk length {str_len}"
            )));
        }

        let str_len = str_len as usize;
        if str_len > MAX_BULK_STRING_SIZE {
            return Err(SpinelQError::Protocol(format!(
                "bulk length {str_len} exceeds limit"
            )));
        }

        if bytes.len() < str_len + CRLF_LEN {
            return Err(SpinelQError::IncompleteData);
        }

        if &bytes[str_len..str_len + CRLF_LEN] != CRLF {
            return Err(SpinelQError::Protocol(
                "bulk reply is not terminated by CRLF".to_string(),
            ));
        }

        let data = Bytes::copy_from_slice(&bytes[..str_len]);
        *bytes = &bytes[str_len + CRLF_LEN..];
        Ok(RespFrame::BulkString(data))
    }

    /// Parses an Array (e.g., `*2\r\n$3\r\nfoo\r\n$3\r\nbar\r\n`).
    fn parse_array(&self, bytes: &mut &[u8], depth: usize) -> Result<RespFrame, SpinelQError> {
        *bytes = &bytes[1..];
        let line = self.parse_line(bytes)?;
        let arr_len = self.parse_header_len(line, "array")?;

        if arr_len == -1 {
            return Ok(RespFrame::NullArray);
        }
        if arr_len < 0 {
            return Err(SpinelQError::Protocol(format!(
                "negative array length {arr_len}"
            )));
        }

        let arr_len = arr_len as usize;
        if arr_len > MAX_FRAME_ELEMENTS {
            return Err(SpinelQError::Protocol(format!(
                "array length {arr_len} exceeds limit"
            )));
        }

        // The header is untrusted until the elements actually arrive.
        let mut frames = Vec::with_capacity(arr_len.min(PREALLOCATED_ELEMENTS));
        for _ in 0..arr_len {
            frames.push(self.decode_recursive(bytes, depth + 1)?);
        }
        Ok(RespFrame::Array(frames))
    }
}

fn find_crlf(src: &[u8]) -> Option<usize> {
    src.windows(CRLF_LEN).position(|window| window == CRLF)
}
