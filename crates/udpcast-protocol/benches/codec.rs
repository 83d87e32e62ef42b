//! Codec benchmarks for udpcast-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use udpcast_protocol::{codec, Payload};

fn bench_encode_text(c: &mut Criterion) {
    let payload = Payload::text(vec![b'a'; 64]);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("text_64B", |b| b.iter(|| codec::encode(black_box(&payload))));
    group.finish();
}

fn bench_encode_binary(c: &mut Criterion) {
    let payload = Payload::binary(vec![0u8; 1024]);

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Bytes(1024));
    group.bench_function("binary_1KiB", |b| {
        b.iter(|| codec::encode(black_box(&payload)))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let encoded = codec::encode(&Payload::text(vec![b'a'; 256])).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(encoded.len() as u64));
    group.bench_function("text_256B", |b| {
        b.iter(|| codec::decode_text(black_box(&encoded)))
    });
    group.finish();
}

criterion_group!(benches, bench_encode_text, bench_encode_binary, bench_decode);
criterion_main!(benches);
