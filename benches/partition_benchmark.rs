use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use shardload_rs::{LoadOptions, LoadCoordinator, MemoryCluster, RecordPartitioner, ShardMap};
use std::hint::black_box;
use tokio_util::sync::CancellationToken;

#[path = "../src/test_support.rs"]
mod test_support;
use test_support::{generate_listings, local_targets};

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|value| value.parse::<f64>().ok())
        .unwrap_or(default)
}

fn benchmark_partition(c: &mut Criterion) {
    let map = ShardMap::london_boroughs();
    let unroutable = env_f64("SHARDLOAD_BENCH_UNROUTABLE", 0.01);
    let mut group = c.benchmark_group("partition");

    for count in [10_000u32, env_u32("SHARDLOAD_BENCH_COUNT", 100_000)] {
        let records = generate_listings(count, unroutable, 0.1, 42).records;
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(
            BenchmarkId::new("records", count),
            &records,
            |b, records| {
                b.iter(|| {
                    let partitioned = RecordPartitioner::new(&map).partition(records.clone());
                    black_box(partitioned.routed())
                })
            },
        );
    }
    group.finish();
}

fn benchmark_memory_load(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
    let map = ShardMap::london_boroughs();
    let count = env_u32("SHARDLOAD_BENCH_LOAD_COUNT", 20_000);
    let records = generate_listings(count, 0.0, 0.1, 7).records;
    let mut group = c.benchmark_group("memory_load");
    group.sample_size(10);
    group.throughput(Throughput::Elements(count as u64));

    for concurrency in [1usize, 4] {
        group.bench_with_input(
            BenchmarkId::new("concurrency", concurrency),
            &concurrency,
            |b, &concurrency| {
                b.iter(|| {
                    let coordinator = LoadCoordinator::new(
                        MemoryCluster::new(),
                        local_targets(&["shard1", "shard2", "shard3", "shard4"]),
                        LoadOptions {
                            concurrency,
                            ..LoadOptions::default()
                        },
                    );
                    let partitioned = RecordPartitioner::new(&map).partition(records.clone());
                    let summary = runtime
                        .block_on(coordinator.load(partitioned, &CancellationToken::new()));
                    black_box(summary.total_inserted())
                })
            },
        );
    }
    group.finish();
}

criterion_group!(benches, benchmark_partition, benchmark_memory_load);
criterion_main!(benches);
