// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 skiff contributors

//! Allocation round-trip latency across the pooled size classes.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use skiff::buf::PooledAllocator;

fn bench_alloc_release(c: &mut Criterion) {
    let alloc = PooledAllocator::with_config(8192, 11, 1);
    let mut group = c.benchmark_group("alloc_release");
    for size in [64usize, 256, 1024, 8192, 65536] {
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, &size| {
            b.iter(|| {
                let buf = alloc.buffer_with(black_box(size)).expect("allocate");
                buf.release().expect("release");
            });
        });
    }
    group.finish();
}

fn bench_write_read_cursor(c: &mut Criterion) {
    let alloc = PooledAllocator::with_config(8192, 11, 1);
    c.bench_function("write_read_u64_x16", |b| {
        b.iter(|| {
            let mut buf = alloc.buffer_with(256).expect("allocate");
            for i in 0..16u64 {
                buf.write_u64(black_box(i)).expect("write");
            }
            for _ in 0..16 {
                black_box(buf.read_u64().expect("read"));
            }
            buf.release().expect("release");
        });
    });
}

criterion_group!(benches, bench_alloc_release, bench_write_read_cursor);
criterion_main!(benches);
