//! Property-based tests for framing and the envelope schema
//!
//! Decoding must not depend on how the byte stream is chunked, and every
//! envelope must survive encode/decode with its payload tag intact.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use bytes::{Bytes, BytesMut};
use castv2::core::codec::{frame_bytes, FrameCodec};
use castv2::core::envelope::{Envelope, Payload};
use castv2::core::proto::{decode_envelope, encode_envelope};
use futures::StreamExt;
use proptest::prelude::*;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{Decoder, FramedRead};

fn decode_chunked(stream: &[u8], chunk_sizes: &[usize]) -> Vec<Bytes> {
    let mut codec = FrameCodec::new(1024 * 1024);
    let mut buf = BytesMut::new();
    let mut frames = Vec::new();
    let mut offset = 0;
    let mut sizes = chunk_sizes.iter().cycle();

    while offset < stream.len() {
        let step = (*sizes.next().unwrap()).max(1).min(stream.len() - offset);
        buf.extend_from_slice(&stream[offset..offset + step]);
        offset += step;
        while let Some(frame) = codec.decode(&mut buf).unwrap() {
            frames.push(frame);
        }
    }
    assert!(!codec.is_mid_frame() && buf.is_empty());
    frames
}

fn payload_strategy() -> impl Strategy<Value = Payload> {
    prop_oneof![
        ".{0,64}".prop_map(Payload::Text),
        prop::collection::vec(any::<u8>(), 0..256).prop_map(Payload::from),
    ]
}

// Property: frames come out identical whatever the chunk boundaries
proptest! {
    #[test]
    fn prop_decoding_is_chunk_independent(
        bodies in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..300), 1..8),
        chunk_sizes in prop::collection::vec(1usize..40, 1..10),
    ) {
        let stream: Vec<u8> = bodies
            .iter()
            .flat_map(|b| frame_bytes(b).unwrap().to_vec())
            .collect();
        let frames = decode_chunked(&stream, &chunk_sizes);
        let expected: Vec<Bytes> = bodies.into_iter().map(Bytes::from).collect();
        prop_assert_eq!(frames, expected);
    }
}

// Property: envelopes round trip through the protobuf schema
proptest! {
    #[test]
    fn prop_envelope_roundtrip(
        source in "[a-z0-9-]{0,16}",
        destination in prop_oneof![Just("*".to_string()), "[a-z0-9-]{1,16}"],
        namespace in "urn:x-cast:[a-z.]{1,24}",
        payload in payload_strategy(),
    ) {
        let envelope = Envelope::new(source, destination, namespace, payload);
        let decoded = decode_envelope(&encode_envelope(&envelope)).unwrap();
        prop_assert_eq!(decoded, envelope);
    }
}

#[test]
fn one_byte_at_a_time_matches_whole_buffer() {
    let envelopes = [
        Envelope::new("sender-0", "receiver-0", "urn:x-cast:a", "{\"type\":\"PING\"}"),
        Envelope::new("receiver-0", "*", "urn:x-cast:b", ""),
        Envelope::new("a", "b", "urn:x-cast:c", vec![0u8, 1, 2, 3]),
    ];
    let stream: Vec<u8> = envelopes
        .iter()
        .flat_map(|e| frame_bytes(&encode_envelope(e)).unwrap().to_vec())
        .collect();

    let whole = decode_chunked(&stream, &[stream.len()]);
    let bytewise = decode_chunked(&stream, &[1]);
    assert_eq!(whole, bytewise);

    let decoded: Vec<Envelope> = bytewise.iter().map(|f| decode_envelope(f).unwrap()).collect();
    assert_eq!(decoded, envelopes);
}

#[tokio::test]
async fn framed_read_over_trickling_stream() {
    let (mut writer, reader) = tokio::io::duplex(8);
    let env = Envelope::new("sender-0", "receiver-0", "urn:x-cast:test", "x".repeat(100));
    let stream = frame_bytes(&encode_envelope(&env)).unwrap();

    let feeder = tokio::spawn(async move {
        for byte in stream.iter() {
            writer.write_all(&[*byte]).await.unwrap();
        }
    });

    let mut frames = FramedRead::new(reader, FrameCodec::default());
    let frame = frames.next().await.unwrap().unwrap();
    assert_eq!(decode_envelope(&frame).unwrap(), env);

    feeder.await.unwrap();
    assert!(frames.next().await.is_none());
}
