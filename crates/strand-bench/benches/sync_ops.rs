//! Criterion benchmarks for skip-ahead synchronization across partitions.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use strand_bench::ring_profile;

/// Benchmark: token ring over 2, 4 and 8 partitions.
fn bench_ring(c: &mut Criterion) {
    let mut group = c.benchmark_group("ring");
    group.sample_size(20);
    for partitions in [2usize, 4, 8] {
        group.bench_with_input(
            BenchmarkId::from_parameter(partitions),
            &partitions,
            |b, &n| {
                b.iter(|| {
                    let report = ring_profile(n, 10, 32, 50, 42).unwrap().run().unwrap();
                    assert!(report.events_delivered() > 0);
                });
            },
        );
    }
    group.finish();
}

criterion_group!(benches, bench_ring);
criterion_main!(benches);
