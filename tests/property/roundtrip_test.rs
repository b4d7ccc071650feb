// tests/property/roundtrip_test.rs

//! Property-based tests for the wire codec and reply normalization.

use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use spinelq::core::protocol::{FrameScanner, RespFrame, RespFrameCodec, RespValue, normalize};
use tokio_util::codec::{Decoder, Encoder};

fn encode(frame: RespFrame) -> BytesMut {
    let mut buf = BytesMut::new();
    RespFrameCodec.encode(frame, &mut buf).unwrap();
    buf
}

fn leaf_frame() -> impl Strategy<Value = RespFrame> {
    prop_oneof![
        "[a-zA-Z0-9 ]{0,32}".prop_map(RespFrame::SimpleString),
        any::<i64>().prop_map(RespFrame::Integer),
        prop::collection::vec(any::<u8>(), 0..256).prop_map(|b| RespFrame::BulkString(Bytes::from(b))),
        Just(RespFrame::Null),
        Just(RespFrame::NullArray),
    ]
}

fn frame() -> impl Strategy<Value = RespFrame> {
    leaf_frame().prop_recursive(3, 64, 8, |inner| {
        prop::collection::vec(inner, 0..8).prop_map(RespFrame::Array)
    })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 200,
        max_shrink_iters: 1000,
        ..ProptestConfig::default()
    })]

    #[test]
    fn test_bulk_roundtrip_any_length(data in prop::collection::vec(any::<u8>(), 0..4096)) {
        let mut buf = encode(RespFrame::BulkString(Bytes::from(data.clone())));
        let decoded = RespFrameCodec.decode(&mut buf).unwrap();
        prop_assert_eq!(decoded, Some(RespFrame::BulkString(Bytes::from(data))));
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn test_frames_survive_arbitrary_read_boundaries(
        frames in prop::collection::vec(frame(), 1..6),
        chunk in 1usize..17,
    ) {
        let mut wire = BytesMut::new();
        for frame in &frames {
            wire.extend_from_slice(&encode(frame.clone()));
        }

        // Feed the bytes a few at a time, as a socket might deliver them.
        let mut codec = RespFrameCodec;
        let mut buf = BytesMut::new();
        let mut decoded = Vec::new();
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            while let Some(frame) = codec.decode(&mut buf).unwrap() {
                decoded.push(frame);
            }
        }
        prop_assert_eq!(decoded, frames);
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn test_scanner_reports_ready_exactly_when_a_frame_decodes(
        frame in frame(),
        chunk in 1usize..17,
    ) {
        let wire = encode(frame.clone());
        let mut scanner = FrameScanner::new();
        let mut buf = BytesMut::new();
        let mut decoded = None;
        for piece in wire.chunks(chunk) {
            buf.extend_from_slice(piece);
            let ready = scanner.advance(&buf);
            prop_assert_eq!(ready, buf.len() == wire.len());
            if ready {
                decoded = RespFrameCodec.decode(&mut buf).unwrap();
            }
        }
        prop_assert_eq!(decoded, Some(frame));
        prop_assert!(buf.is_empty());
    }

    #[test]
    fn test_normalization_is_idempotent(
        name in prop::sample::select(vec!["HGETALL", "hgetall", "CONFIG", "INFO", "TTL", "LRANGE", "GET"]),
        frame in frame(),
    ) {
        let value = RespValue::try_from(frame).unwrap();
        let once = normalize(name, value);
        prop_assert_eq!(normalize(name, once.clone()), once);
    }

    #[test]
    fn test_flat_pairs_map_has_one_entry_per_distinct_key(
        pairs in prop::collection::vec(("[a-c]{1,2}", "[a-z]{0,4}"), 0..20),
    ) {
        let items = pairs
            .iter()
            .flat_map(|(k, v)| [k.clone(), v.clone()])
            .map(|s| RespValue::BulkString(Bytes::from(s)))
            .collect();
        let RespValue::Map(map) = normalize("HGETALL", RespValue::Array(items)) else {
            panic!("HGETALL reply should become a map");
        };

        let mut distinct: Vec<&String> = Vec::new();
        for (k, _) in &pairs {
            if !distinct.contains(&k) {
                distinct.push(k);
            }
        }
        prop_assert_eq!(map.len(), distinct.len());
        // Insertion order and first-wins values.
        for (key, (map_key, value)) in distinct.iter().zip(map.iter()) {
            prop_assert_eq!(&map_key[..], key.as_bytes());
            let first = &pairs.iter().find(|(k, _)| k == *key).unwrap().1;
            prop_assert_eq!(value.as_bytes(), Some(first.as_bytes()));
        }
    }
}
