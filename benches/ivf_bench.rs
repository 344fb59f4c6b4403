//! Benchmarks for IVF index build and search performance.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use quarry_db::{BuildParams, Dataset, IvfIndex, SearchParams};
use tempfile::tempdir;

/// Benchmark index construction with different partition counts.
fn benchmark_ivf_build(c: &mut Criterion) {
    let dataset = Dataset::clustered(20_000, 0, 64, 32, 42);

    let mut group = c.benchmark_group("ivf_build_20k");
    group.sample_size(10); // Reduce samples for slow builds

    for nlist in [16, 64, 256] {
        group.bench_with_input(BenchmarkId::from_parameter(nlist), &nlist, |bench, &nlist| {
            bench.iter(|| {
                let dir = tempdir().unwrap();
                let params = BuildParams::new(nlist).with_seed(42).with_max_iter(5);
                black_box(IvfIndex::build(&dataset.vectors, &params, dir.path().join("g")).unwrap())
            })
        });
    }

    group.finish();
}

/// Benchmark search across nprobe values and memory budgets.
fn benchmark_ivf_search(c: &mut Criterion) {
    let dataset = Dataset::clustered(50_000, 64, 64, 64, 42);
    let dir = tempdir().unwrap();
    let params = BuildParams::new(64).with_seed(42).with_max_iter(8);
    let (index, _) = IvfIndex::build(&dataset.vectors, &params, dir.path().join("g")).unwrap();

    let mut group = c.benchmark_group("ivf_search_50k");
    group.sample_size(20);

    for nprobe in [1, 4, 16] {
        group.bench_with_input(
            BenchmarkId::new("infinite_ram", nprobe),
            &nprobe,
            |bench, &nprobe| {
                let params = SearchParams::new(nprobe, 10);
                bench.iter(|| black_box(index.search(&dataset.queries, &params).unwrap()))
            },
        );

        group.bench_with_input(
            BenchmarkId::new("finite_ram_10k", nprobe),
            &nprobe,
            |bench, &nprobe| {
                let params = SearchParams::new(nprobe, 10).with_upper_bound(10_000);
                bench.iter(|| black_box(index.search(&dataset.queries, &params).unwrap()))
            },
        );
    }

    group.finish();
}

criterion_group!(benches, benchmark_ivf_build, benchmark_ivf_search);
criterion_main!(benches);
