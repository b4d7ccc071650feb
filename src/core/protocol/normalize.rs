// src/core/protocol/normalize.rs

//! Post-decode reshaping of replies, keyed by the name of the command that
//! produced them.
//!
//! The table is exhaustive: commands not listed here pass through unchanged.

use super::RespValue;
use bytes::Bytes;
use indexmap::IndexMap;

/// The reshaping applied to a command's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Normalization {
    /// A flat `[k1, v1, k2, v2, ...]` array becomes a map. First key wins.
    FlatPairs,
    /// A `key:value` text block becomes a map, skipping blanks and `#` lines.
    InfoBlock,
    /// A non-positive TTL becomes `Null` ("no expiry or no such key").
    Ttl,
    PassThrough,
}

impl Normalization {
    pub fn for_command(name: &str) -> Self {
        if name.eq_ignore_ascii_case("config") || name.eq_ignore_ascii_case("hgetall") {
            Normalization::FlatPairs
        } else if name.eq_ignore_ascii_case("info") {
            Normalization::InfoBlock
        } else if name.eq_ignore_ascii_case("ttl") {
            Normalization::Ttl
        } else {
            Normalization::PassThrough
        }
    }

    pub fn apply(self, value: RespValue) -> RespValue {
        match (self, value) {
            (Normalization::FlatPairs, RespValue::Array(items)) => pairs_to_map(items),
            (Normalization::InfoBlock, RespValue::BulkString(text)) => info_to_map(&text),
            (Normalization::Ttl, RespValue::Integer(ttl)) if ttl <= 0 => RespValue::Null,
            (_, other) => other,
        }
    }
}

/// Normalizes `value` as the reply of the command called `name`.
pub fn normalize(name: &str, value: RespValue) -> RespValue {
    Normalization::for_command(name).apply(value)
}

fn pairs_to_map(items: Vec<RespValue>) -> RespValue {
    let mut map = IndexMap::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let Some(key) = iter.next() {
        // A dangling key at the end of an odd-length array maps to `Null`.
        let value = iter.next().unwrap_or(RespValue::Null);
        if let Some(key) = key.into_bytes() {
            map.entry(key).or_insert(value);
        }
    }
    RespValue::Map(map)
}

fn info_to_map(text: &[u8]) -> RespValue {
    let text = String::from_utf8_lossy(text);
    let mut map = IndexMap::new();
    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            map.entry(Bytes::copy_from_slice(key.as_bytes()))
                .or_insert_with(|| RespValue::BulkString(Bytes::copy_from_slice(value.as_bytes())));
        }
    }
    RespValue::Map(map)
}
