//! Benchmarks for the probe wire codec
//!
//! Run with: cargo bench --bench wire
//!
//! Encode, decode, and echo validation sit on the per-packet path of both
//! engine halves, so regressions here show up directly as per-datagram cost.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pingfort::wire::{echo_matches, Probe, PROBE_BUFFER_SIZE};
use pingfort::SequenceId;
use std::hint::black_box;

/// A probe shaped like real traffic: both fields at unix-millisecond scale.
fn realistic_probe() -> Probe {
    Probe::new(SequenceId::new(1_755_864_000_123), 1_755_864_000_123)
}

fn bench_probe_encode(c: &mut Criterion) {
    let mut group = c.benchmark_group("Probe encode");

    let probe = realistic_probe();
    group.throughput(Throughput::Bytes(probe.encode().len() as u64));
    group.bench_function("unix-millis fields", |b| {
        b.iter(|| black_box(probe).encode());
    });

    group.finish();
}

fn bench_probe_decode(c: &mut Criterion) {
    let mut group = c.benchmark_group("Probe decode");

    let datagram = realistic_probe().encode();
    group.throughput(Throughput::Bytes(datagram.len() as u64));
    group.bench_with_input(
        BenchmarkId::new("well-formed", datagram.len()),
        &datagram,
        |b, datagram| {
            b.iter(|| Probe::decode(black_box(datagram)));
        },
    );

    // The server decodes every datagram best-effort, so the failure paths are
    // just as hot when something other than a ping client is talking to it.
    let wrong_tag = b"HELLO 42 1755864000123\r\n".to_vec();
    group.throughput(Throughput::Bytes(wrong_tag.len() as u64));
    group.bench_with_input(
        BenchmarkId::new("wrong tag", wrong_tag.len()),
        &wrong_tag,
        |b, datagram| {
            b.iter(|| Probe::decode(black_box(datagram)));
        },
    );

    let binary_noise: Vec<u8> = (0..PROBE_BUFFER_SIZE)
        .map(|i| (i * 31 % 251) as u8)
        .collect();
    group.throughput(Throughput::Bytes(binary_noise.len() as u64));
    group.bench_with_input(
        BenchmarkId::new("binary noise", binary_noise.len()),
        &binary_noise,
        |b, datagram| {
            b.iter(|| Probe::decode(black_box(datagram)));
        },
    );

    group.finish();
}

fn bench_echo_matches(c: &mut Criterion) {
    let mut group = c.benchmark_group("Echo validation");

    let sent = realistic_probe().encode();
    let mut buffer = vec![0u8; PROBE_BUFFER_SIZE];
    buffer[..sent.len()].copy_from_slice(&sent);

    group.throughput(Throughput::Bytes(sent.len() as u64));
    group.bench_function("matching echo", |b| {
        b.iter(|| echo_matches(black_box(&sent), black_box(&buffer), sent.len()));
    });
    group.bench_function("mismatched length", |b| {
        b.iter(|| echo_matches(black_box(&sent), black_box(&buffer), PROBE_BUFFER_SIZE));
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_probe_encode,
    bench_probe_decode,
    bench_echo_matches
);
criterion_main!(benches);
