// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 selenite.dev

//! Set Latency Benchmark
//!
//! Measures `Bus::set` with different payload sizes and scrub modes.
//! This isolates the writer-side seqlock cycle: probe, claim, copy,
//! publish, pulse.

#![allow(clippy::uninlined_format_args)]

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use selenite::{Backing, Bus};
use std::hint::black_box as bb;

fn bench_backing(tag: &str) -> Backing {
    Backing::shm(&format!("/selenite_bench_set_{tag}_{}", std::process::id())).unwrap()
}

fn bench_set_payload_sizes(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_latency_by_size");

    let backing = bench_backing("size");
    backing.unlink().ok();
    let bus = Bus::create(&backing, 1024, 65536).expect("bus creation");

    for size in [16usize, 64, 256, 1024, 4096, 16384, 65536] {
        let payload = vec![0xAB_u8; size];
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.iter(|| bus.set(bb("bench_key"), bb(&payload)).unwrap());
        });
    }

    group.finish();
    drop(bus);
    backing.unlink().ok();
}

fn bench_set_scrub_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_latency_by_scrub");

    let backing = bench_backing("scrub");
    backing.unlink().ok();
    let bus = Bus::create(&backing, 1024, 4096).expect("bus creation");
    let payload = vec![0xCD_u8; 512];

    for (label, setup) in [
        ("off", 0u8),
        ("hybrid", 1),
        ("full", 2),
    ] {
        match setup {
            0 => bus.set_auto_scrub(false),
            1 => bus.set_hybrid_auto_scrub(),
            _ => {
                bus.set_auto_scrub(false);
                bus.set_auto_scrub(true);
            }
        }
        group.bench_function(label, |b| {
            b.iter(|| bus.set(bb("scrub_key"), bb(&payload)).unwrap());
        });
    }

    group.finish();
    drop(bus);
    backing.unlink().ok();
}

fn bench_set_update_vs_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("set_latency_update_vs_insert");

    let backing = bench_backing("mode");
    backing.unlink().ok();
    let bus = Bus::create(&backing, 4096, 1024).expect("bus creation");
    let payload = vec![0x11_u8; 256];

    bus.set("resident", &payload).unwrap();
    group.bench_function("update_resident", |b| {
        b.iter(|| bus.set(bb("resident"), bb(&payload)).unwrap());
    });

    let mut n = 0u64;
    group.bench_function("insert_then_unset", |b| {
        b.iter(|| {
            n += 1;
            let key = format!("fresh_{}", n % 2048);
            bus.set(&key, bb(&payload)).unwrap();
            bus.unset(&key).unwrap();
        });
    });

    group.finish();
    drop(bus);
    backing.unlink().ok();
}

criterion_group!(
    benches,
    bench_set_payload_sizes,
    bench_set_scrub_modes,
    bench_set_update_vs_insert
);
criterion_main!(benches);
