// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Promise completion and task submission latency.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use skiff::executor::{EventLoop, Promise};
use std::time::Duration;

fn bench_promise_complete(c: &mut Criterion) {
    c.bench_function("promise_complete_inline", |b| {
        b.iter(|| {
            let promise: Promise<u64> = Promise::new(None);
            promise.set_success(black_box(42)).expect("complete");
            black_box(promise.future().get_now());
        });
    });
}

fn bench_submit_round_trip(c: &mut Criterion) {
    let el = EventLoop::new("bench-loop").expect("loop");
    c.bench_function("submit_sync_round_trip", |b| {
        b.iter(|| {
            el.submit(|| black_box(7u64)).sync().expect("round trip");
        });
    });
    el.shutdown_gracefully(Duration::from_millis(10), Duration::from_secs(5))
        .sync()
        .expect("shutdown");
}

criterion_group!(benches, bench_promise_complete, bench_submit_round_trip);
criterion_main!(benches);
