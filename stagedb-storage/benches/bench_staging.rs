// SPDX-License-Identifier: AGPL-3.0-or-later
// StageDB - Transactional Staging Buffer for Distributed KV Clients
// Copyright (C) 2026 Sushanth Reddy Vanagala (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Staging buffer micro-benchmarks
//!
//! Compares the two index engines on the buffer's hot paths:
//!
//! | Scenario | What it tests |
//! |----------|---------------|
//! | staged_fill | staged writes, then release |
//! | point_read | gets against a warm buffer |
//! | rollback | stage fill followed by cleanup |
//!
//! Run with: `cargo bench -p stagedb-storage --bench bench_staging`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use stagedb_storage::{ArtMemBuffer, KeyIndex, MemBuffer, TreeMemBuffer};

fn staged_fill<I: KeyIndex>(buf: &MemBuffer<I>, n: u32) {
    let h = buf.staging();
    for i in 0..n {
        buf.set(&i.to_be_bytes(), &i.to_be_bytes()).unwrap();
    }
    buf.release(h);
    black_box(buf.len());
}

fn bench_staged_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("staged_fill");
    for n in [1_000u32, 10_000] {
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("tree", n), &n, |b, &n| {
            b.iter(|| staged_fill(&TreeMemBuffer::new(), n));
        });
        group.bench_with_input(BenchmarkId::new("art", n), &n, |b, &n| {
            b.iter(|| staged_fill(&ArtMemBuffer::new(), n));
        });
    }
    group.finish();
}

fn bench_point_read(c: &mut Criterion) {
    const N: u32 = 10_000;
    let tree = TreeMemBuffer::new();
    let art = ArtMemBuffer::new();
    staged_fill(&tree, N);
    staged_fill(&art, N);

    let mut group = c.benchmark_group("point_read");
    group.throughput(Throughput::Elements(1));
    let mut i = 0u32;
    group.bench_function("tree", |b| {
        b.iter(|| {
            i = (i.wrapping_mul(2654435761)) % N;
            black_box(tree.get(&i.to_be_bytes()).unwrap());
        })
    });
    group.bench_function("art", |b| {
        b.iter(|| {
            i = (i.wrapping_mul(2654435761)) % N;
            black_box(art.get(&i.to_be_bytes()).unwrap());
        })
    });
    group.finish();
}

fn bench_rollback(c: &mut Criterion) {
    const N: u32 = 1_000;
    let mut group = c.benchmark_group("rollback");
    group.throughput(Throughput::Elements(N as u64));
    let tree = TreeMemBuffer::new();
    group.bench_function("tree", |b| {
        b.iter(|| {
            let h = tree.staging();
            for i in 0..N {
                tree.set(&i.to_be_bytes(), b"value").unwrap();
            }
            tree.cleanup(h);
        })
    });
    let art = ArtMemBuffer::new();
    group.bench_function("art", |b| {
        b.iter(|| {
            let h = art.staging();
            for i in 0..N {
                art.set(&i.to_be_bytes(), b"value").unwrap();
            }
            art.cleanup(h);
        })
    });
    group.finish();
}

criterion_group!(benches, bench_staged_fill, bench_point_read, bench_rollback);
criterion_main!(benches);
