#[path = "../src/test_support.rs"]
mod test_support;
mod support;

use shardload_rs::{
    ErrorKind, Listing, LoadOptions, LoadStatus, MemoryCluster, RecordPartitioner, ShardId,
};
use std::collections::BTreeSet;
use std::time::Duration;
use support::memory_coordinator;
use test_support::generate_listings;
use tokio_util::sync::CancellationToken;

fn one_per_shard() -> Vec<Listing> {
    vec![
        Listing::new(1, Some("Camden")),
        Listing::new(2, Some("Lambeth")),
        Listing::new(3, Some("Brent")),
        Listing::new(4, Some("Bromley")),
    ]
}

#[tokio::test]
async fn unreachable_shard_does_not_stop_the_others() {
    let cluster = MemoryCluster::new();
    cluster.fail_connections("shard2");
    let (map, coordinator) = memory_coordinator(&cluster, LoadOptions::default());

    let summary = coordinator
        .load(
            RecordPartitioner::new(&map).partition(one_per_shard()),
            &CancellationToken::new(),
        )
        .await;

    assert!(!summary.is_success());
    assert_eq!(summary.failed_shards(), vec![&ShardId::from("shard2")]);
    let failed = summary.outcome(&ShardId::from("shard2")).unwrap();
    assert_eq!(failed.error.as_ref().map(|e| e.kind), Some(ErrorKind::Connection));
    for shard in ["shard1", "shard3", "shard4"] {
        let shard = ShardId::from(shard);
        assert_eq!(summary.outcome(&shard).unwrap().status, LoadStatus::Committed);
        assert_eq!(cluster.row_count(&shard), 1);
    }
    assert_eq!(cluster.row_count(&ShardId::from("shard2")), 0);
    assert!(summary.to_string().contains("failed shards (safe to re-run): shard2"));
}

#[tokio::test]
async fn statement_failure_rolls_back_that_shard_only() {
    let cluster = MemoryCluster::new().with_chunk_rows(3);
    cluster.fail_statements("shard3");
    let (map, coordinator) = memory_coordinator(&cluster, LoadOptions::default());
    let records = generate_listings(400, 0.0, 0.1, 8).records;

    let summary = coordinator
        .load(
            RecordPartitioner::new(&map).partition(records),
            &CancellationToken::new(),
        )
        .await;

    let shard3 = ShardId::from("shard3");
    let outcome = summary.outcome(&shard3).unwrap();
    assert_eq!(outcome.status, LoadStatus::Failed);
    assert_eq!(outcome.error.as_ref().map(|e| e.kind), Some(ErrorKind::Statement));
    assert_eq!(cluster.row_count(&shard3), 0);
    assert_eq!(summary.failed_shards().len(), 1);
    assert_eq!(cluster.open_connections(), 0);
}

#[tokio::test]
async fn rerunning_only_the_failed_shard_completes_the_load() {
    let cluster = MemoryCluster::new();
    cluster.fail_connections("shard2");
    let (map, coordinator) = memory_coordinator(&cluster, LoadOptions::default());
    let cancel = CancellationToken::new();

    let first = coordinator
        .load(RecordPartitioner::new(&map).partition(one_per_shard()), &cancel)
        .await;
    assert!(!first.is_success());

    cluster.heal(&ShardId::from("shard2"));
    let mut retry = RecordPartitioner::new(&map).partition(one_per_shard());
    let only: BTreeSet<ShardId> = first.failed_shards().into_iter().cloned().collect();
    retry.retain_shards(&only);
    let second = coordinator.load(retry, &cancel).await;

    assert!(second.is_success());
    assert_eq!(second.outcomes.len(), 1);
    assert_eq!(second.excluded, 3);
    assert_eq!(second.total_records, second.excluded + 1);
    assert!(second.to_string().contains("3 excluded by shard filter"));
    assert_eq!(cluster.commits(), 4);
    assert_eq!(cluster.row_count(&ShardId::from("shard2")), 1);
}

#[tokio::test]
async fn empty_input_opens_no_connections() {
    let cluster = MemoryCluster::new();
    let (map, coordinator) = memory_coordinator(&cluster, LoadOptions::default());

    let summary = coordinator
        .load(
            RecordPartitioner::new(&map).partition(Vec::new()),
            &CancellationToken::new(),
        )
        .await;

    assert!(summary.is_success());
    assert_eq!(summary.outcomes.len(), 4);
    assert!(summary
        .outcomes
        .iter()
        .all(|outcome| outcome.status == LoadStatus::Skipped));
    assert_eq!(cluster.connections_opened(), 0);
}

#[tokio::test]
async fn concurrent_loads_match_sequential_loads() {
    let records = generate_listings(3_000, 0.05, 0.2, 17).records;

    let sequential = MemoryCluster::new().with_chunk_rows(100);
    let (map, coordinator) = memory_coordinator(&sequential, LoadOptions::default());
    let baseline = coordinator
        .load(
            RecordPartitioner::new(&map).partition(records.clone()),
            &CancellationToken::new(),
        )
        .await;

    let concurrent = MemoryCluster::new().with_chunk_rows(100);
    let options = LoadOptions {
        concurrency: 4,
        ..LoadOptions::default()
    };
    let (map, coordinator) = memory_coordinator(&concurrent, options);
    let parallel = coordinator
        .load(
            RecordPartitioner::new(&map).partition(records),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(baseline.total_inserted(), parallel.total_inserted());
    let shards: Vec<&ShardId> = parallel.outcomes.iter().map(|o| &o.shard).collect();
    let mut sorted = shards.clone();
    sorted.sort();
    assert_eq!(shards, sorted);
    for shard in map.shard_ids() {
        assert_eq!(sequential.rows(&shard), concurrent.rows(&shard));
    }
    assert_eq!(concurrent.open_connections(), 0);
}

#[tokio::test]
async fn transient_failure_is_retried_when_enabled() {
    let cluster = MemoryCluster::new();
    cluster.fail_connections_times("shard1", 1);
    let options = LoadOptions {
        concurrency: 2,
        max_retries: 3,
        retry_backoff: Duration::from_millis(1),
    };
    let (map, coordinator) = memory_coordinator(&cluster, options);

    let summary = coordinator
        .load(
            RecordPartitioner::new(&map).partition(one_per_shard()),
            &CancellationToken::new(),
        )
        .await;

    assert!(summary.is_success());
    assert_eq!(summary.outcome(&ShardId::from("shard1")).unwrap().attempts, 2);
}

#[tokio::test]
async fn abort_mid_batch_leaves_shard_untouched() {
    let cancel = CancellationToken::new();
    let cluster = MemoryCluster::new()
        .with_chunk_rows(10)
        .cancel_after_first_chunk(cancel.clone());
    let (map, coordinator) = memory_coordinator(&cluster, LoadOptions::default());
    let records: Vec<Listing> = (1..=50).map(|id| Listing::new(id, Some("Camden"))).collect();

    let summary = coordinator
        .load(RecordPartitioner::new(&map).partition(records), &cancel)
        .await;

    let outcome = summary.outcome(&ShardId::from("shard1")).unwrap();
    assert_eq!(outcome.status, LoadStatus::Failed);
    assert_eq!(outcome.error.as_ref().map(|e| e.kind), Some(ErrorKind::Cancelled));
    assert_eq!(cluster.row_count(&ShardId::from("shard1")), 0);
    assert_eq!(cluster.commits(), 0);
}
