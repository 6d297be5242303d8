// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Event path benchmarks.
//!
//! Measures the packet-path `emit` cost with a session armed, and the full
//! action round trip through the processor and padding hook.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use shapewire_benchmark::SessionFixture;
use shapewire_core::{ActionRecord, EventKind, ShapeError, UserContext};
use std::time::Duration;

/// Benchmark emitting one event and draining it on the client.
fn bench_emit(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_emit");
    group.measurement_time(Duration::from_secs(5));
    group.throughput(Throughput::Elements(1));

    let fixture = SessionFixture::new(4096, 64).expect("Failed to arm session");
    let mut out = Vec::with_capacity(4096);

    group.bench_function("emit_and_receive", |b| {
        b.iter(|| {
            fixture
                .device
                .nonpadding_sent(black_box(&fixture.peer), black_box(1280));
            out.clear();
            black_box(fixture.adapter.receive_events(&mut out).ok());
        });
    });

    // With the ring full every emit takes the drop path.
    group.bench_function("emit_ring_full", |b| {
        for _ in 0..4096 {
            fixture.device.nonpadding_received(&fixture.peer, 100);
        }
        b.iter(|| {
            fixture
                .device
                .nonpadding_received(black_box(&fixture.peer), black_box(100));
        });
    });

    group.finish();
}

/// Benchmark one padding action from send until its event is received.
fn bench_action_round_trip(c: &mut Criterion) {
    let mut group = c.benchmark_group("action_round_trip");
    group.measurement_time(Duration::from_secs(5));

    let fixture = SessionFixture::new(1024, 1024).expect("Failed to arm session");
    let handle = fixture
        .adapter
        .event_data_available_handle()
        .expect("Session is active");
    let action = ActionRecord::inject_padding(&fixture.peer, 256, false, UserContext(1));
    let mut out = Vec::new();

    group.bench_function("inject_padding", |b| {
        b.iter(|| {
            fixture.adapter.send_action(&action).expect("Send failed");
            loop {
                out.clear();
                match fixture.adapter.receive_events(&mut out) {
                    Ok(_) if out.iter().any(|e| e.kind() == Ok(EventKind::PaddingSent)) => break,
                    Ok(_) => {}
                    Err(ShapeError::NoMoreItems) => {
                        handle.wait_timeout(Duration::from_millis(10));
                    }
                    Err(e) => panic!("Receive failed: {}", e),
                }
            }
        });
    });

    group.finish();
}

criterion_group!(benches, bench_emit, bench_action_round_trip);

criterion_main!(benches);
