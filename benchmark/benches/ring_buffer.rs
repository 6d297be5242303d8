// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Ring buffer microbenchmarks.
//!
//! Measures push and batched drain of event records at several capacities.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shapewire_benchmark::RingFixture;
use shapewire_core::shm::RingProducer;
use shapewire_core::{EventKind, EventRecord, PeerKey, UserContext};
use std::time::Duration;

/// Ring capacities to benchmark (in elements).
const CAPACITIES: &[usize] = &[64, 1024, 16384];

fn record(i: u32) -> EventRecord {
    EventRecord::new(
        &PeerKey::new([7; 32]),
        EventKind::NonpaddingSent,
        i,
        UserContext::NONE,
    )
}

/// Benchmark a single push followed by a single-element drain.
fn bench_push_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_push_drain");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    for &capacity in CAPACITIES {
        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                let mut fixture =
                    RingFixture::<EventRecord>::new(capacity).expect("Failed to map ring");
                let mut out = Vec::with_capacity(1);
                let mut i = 0u32;

                b.iter(|| {
                    fixture.producer.try_push(black_box(record(i))).ok();
                    out.clear();
                    black_box(fixture.consumer.drain_into(&mut out));
                    i = i.wrapping_add(1);
                });
            },
        );
    }

    group.finish();
}

/// Benchmark filling the ring through a private-cursor producer, then one drain.
fn bench_fill_then_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring_fill_then_drain");
    group.measurement_time(Duration::from_secs(5));

    for &capacity in CAPACITIES {
        group.throughput(Throughput::Elements(capacity as u64 - 1));

        group.bench_with_input(
            BenchmarkId::from_parameter(capacity),
            &capacity,
            |b, &capacity| {
                let fixture = RingFixture::<EventRecord>::new(capacity).expect("Failed to map ring");
                let RingFixture {
                    producer,
                    mut consumer,
                    ..
                } = fixture;
                let mut producer = RingProducer::new(producer);
                let mut out = Vec::with_capacity(capacity);

                b.iter(|| {
                    let mut i = 0;
                    while producer.try_push(record(i)).is_ok() {
                        i += 1;
                    }
                    out.clear();
                    black_box(consumer.drain_into(&mut out));
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_push_drain, bench_fill_then_drain);

criterion_main!(benches);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_benchmark_can_run() {
        let mut fixture = RingFixture::<EventRecord>::new(8).expect("Failed to map ring");
        fixture.producer.try_push(record(1)).expect("Push failed");
        let drained = fixture.consumer.drain_all();
        assert_eq!(drained, vec![record(1)]);
    }
}
