//! Benchmarks for universe framing
//!
//! Measures the cost of turning 512 channel bytes into a vendor packet,
//! both into a fresh buffer and into a reused one.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use protocol::{DMX_CHANNELS, PACKET_SIZE, frame, frame_into, frame_slice};

fn ramp() -> [u8; DMX_CHANNELS] {
    let mut channels = [0u8; DMX_CHANNELS];
    for (i, c) in channels.iter_mut().enumerate() {
        *c = i as u8;
    }
    channels
}

fn benchmark_framing(c: &mut Criterion) {
    let mut group = c.benchmark_group("framing");
    group.throughput(Throughput::Bytes(DMX_CHANNELS as u64));

    let channels = ramp();

    group.bench_function("frame", |b| b.iter(|| frame(black_box(&channels))));

    let mut packet = [0u8; PACKET_SIZE];
    group.bench_function("frame_into", |b| {
        b.iter(|| frame_into(black_box(&mut packet), black_box(&channels)))
    });

    let short = &channels[..128];
    group.bench_function("frame_slice_short", |b| {
        b.iter(|| frame_slice(black_box(short)))
    });

    group.finish();
}

criterion_group!(benches, benchmark_framing);
criterion_main!(benches);
