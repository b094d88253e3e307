use std::io::Write;

use shardload_rs::config::LoaderConfig;
use shardload_rs::model::LISTING_COLUMNS;
use shardload_rs::{LoadCoordinator, LoadOptions, MemoryCluster, ShardMap, ShardTargets};
use tempfile::NamedTempFile;

/// Coordinator over a fresh in-memory cluster with the built-in shard layout.
#[allow(dead_code)]
pub fn memory_coordinator(
    cluster: &MemoryCluster,
    options: LoadOptions,
) -> (ShardMap, LoadCoordinator<MemoryCluster>) {
    let config = LoaderConfig::default();
    let map = config.shard_map();
    let targets = ShardTargets::resolve(&config, &map).expect("built-in targets resolve");
    (map, LoadCoordinator::new(cluster.clone(), targets, options))
}

/// Write a listings CSV with the full header and the given data lines.
#[allow(dead_code)]
pub fn write_csv(lines: &[&str]) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(file, "{}", LISTING_COLUMNS.join(",")).expect("write header");
    for line in lines {
        writeln!(file, "{line}").expect("write row");
    }
    file.flush().expect("flush");
    file
}
