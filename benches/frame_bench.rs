use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use castv2::core::codec::FrameCodec;
use castv2::core::envelope::Envelope;
use castv2::core::proto::{decode_envelope, encode_envelope};
use castv2::protocol::router::{Route, Router};
use castv2::transport::connection::Outbound;
use criterion::{criterion_group, criterion_main, BatchSize, Criterion, Throughput};
use tokio_util::codec::{Decoder, Encoder};

const NS: &str = "urn:x-cast:com.google.cast.media";

#[allow(clippy::unwrap_used)]
fn bench_frame_encode_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("frame_encode_decode");
    let payload_sizes = [64usize, 512, 4096, 60 * 1024];

    for &size in &payload_sizes {
        let envelope = Envelope::new("sender-0", "receiver-0", NS, "x".repeat(size));
        let body = encode_envelope(&envelope);
        group.throughput(Throughput::Bytes(body.len() as u64));

        group.bench_function(format!("encode_{size}b"), |b| {
            b.iter_batched(
                || BytesMut::with_capacity(body.len() + 4),
                |mut buf| {
                    let mut codec = FrameCodec::default();
                    codec.encode(encode_envelope(&envelope), &mut buf).unwrap();
                },
                BatchSize::SmallInput,
            )
        });

        let mut wire = BytesMut::new();
        FrameCodec::default()
            .encode(body.clone(), &mut wire)
            .unwrap();
        let wire = wire.freeze();

        group.bench_function(format!("decode_{size}b"), |b| {
            b.iter_batched(
                || BytesMut::from(&wire[..]),
                |mut buf| {
                    let mut codec = FrameCodec::default();
                    let frame: Bytes = codec.decode(&mut buf).unwrap().unwrap();
                    decode_envelope(&frame).unwrap();
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

#[allow(clippy::unwrap_used)]
fn bench_router_dispatch(c: &mut Criterion) {
    let mut group = c.benchmark_group("router_dispatch");

    for &channels in &[1usize, 16, 128] {
        let (outbound, _rx) = Outbound::channel(1, 64 * 1024);
        let router = Router::new(outbound);
        let mut subscribed: Vec<_> = (0..channels)
            .map(|i| {
                router
                    .subscribe(Route::new(format!("sender-{i}"), "receiver-0", NS), None)
                    .unwrap()
            })
            .collect();
        let broadcast = Arc::new(Envelope::new("receiver-0", "*", NS, "{}"));

        group.bench_function(format!("broadcast_{channels}_channels"), |b| {
            b.iter(|| {
                router.dispatch(broadcast.clone()).unwrap();
                for channel in &mut subscribed {
                    channel.try_recv();
                }
            })
        });
    }

    group.finish();
}

criterion_group!(benches, bench_frame_encode_decode, bench_router_dispatch);
criterion_main!(benches);
