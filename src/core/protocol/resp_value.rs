// src/core/protocol/resp_value.rs

//! Defines the decoded reply type handed back to callers of the wire client.

use super::RespFrame;
use crate::core::SpinelQError;
use bytes::Bytes;
use indexmap::IndexMap;

/// `RespValue` is what a command invocation returns once its `RespFrame` has been
/// decoded and normalized.
///
/// It differs from the raw frame in three ways: error frames never appear (they
/// become `SpinelQError::Remote`), the `+OK` and `+QUEUED` statuses collapse into
/// `RespValue::Ok`, and some commands have their array or text replies reshaped
/// into `RespValue::Map` (see `normalize`).
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Boolean success: the status replies `OK` and `QUEUED`.
    Ok,
    SimpleString(String),
    Integer(i64),
    BulkString(Bytes),
    /// No value: a `$-1` bulk reply, or a normalized sentinel such as a missing TTL.
    Null,
    /// No array: a `*-1` reply, distinct from an empty `Array`.
    NullArray,
    Array(Vec<RespValue>),
    Map(IndexMap<Bytes, RespValue>),
}

impl RespValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RespValue::Null | RespValue::NullArray)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the raw bytes of a string-like reply.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespValue::BulkString(b) => Some(b),
            RespValue::SimpleString(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    /// Consumes the value and returns its bytes when it is string-like or an integer.
    pub fn into_bytes(self) -> Option<Bytes> {
        match self {
            RespValue::BulkString(b) => Some(b),
            RespValue::SimpleString(s) => Some(Bytes::from(s)),
            RespValue::Integer(i) => Some(Bytes::from(i.to_string())),
            _ => None,
        }
    }
}

/// Converts a wire frame into a reply value. Any error frame, including one
/// nested inside an array, turns the whole reply into `SpinelQError::Remote`.
impl TryFrom<RespFrame> for RespValue {
    type Error = SpinelQError;

    fn try_from(frame: RespFrame) -> Result<Self, Self::Error> {
        Ok(match frame {
            RespFrame::SimpleString(s) if s == "OK" || s == "QUEUED" => RespValue::Ok,
            RespFrame::SimpleString(s) => RespValue::SimpleString(s),
            RespFrame::Error(msg) => return Err(SpinelQError::Remote(msg)),
            RespFrame::Integer(i) => RespValue::Integer(i),
            RespFrame::BulkString(b) => RespValue::BulkString(b),
            RespFrame::Null => RespValue::Null,
            RespFrame::NullArray => RespValue::NullArray,
            RespFrame::Array(arr) => RespValue::Array(
                arr.into_iter()
                    .map(RespValue::try_from)
                    .collect::<Result<Vec<_>, _>>()?,
            ),
        })
    }
}
