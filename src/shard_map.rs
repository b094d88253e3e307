//! Static partition key → shard table.

use crate::model::ShardId;
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Closed mapping from partition key to shard identifier.
///
/// Built once at startup and passed by reference to whoever needs routing.
/// Keys that are not in the table route to `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardMap {
    routes: HashMap<String, ShardId>,
}

impl ShardMap {
    pub fn new<K, S>(entries: impl IntoIterator<Item = (K, S)>) -> Self
    where
        K: Into<String>,
        S: Into<ShardId>,
    {
        Self {
            routes: entries
                .into_iter()
                .map(|(key, shard)| (key.into(), shard.into()))
                .collect(),
        }
    }

    /// The borough table the listings dataset is sharded by.
    pub fn london_boroughs() -> Self {
        Self::new(default_borough_table())
    }

    pub fn route(&self, partition_key: &str) -> Option<&ShardId> {
        self.routes.get(partition_key)
    }

    /// Every shard the table can route to, sorted.
    pub fn shard_ids(&self) -> BTreeSet<ShardId> {
        self.routes.values().cloned().collect()
    }

    /// Partition keys assigned to `shard`, sorted.
    pub fn keys_for(&self, shard: &ShardId) -> Vec<&str> {
        let mut keys: Vec<&str> = self
            .routes
            .iter()
            .filter(|(_, target)| *target == shard)
            .map(|(key, _)| key.as_str())
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl From<&BTreeMap<String, String>> for ShardMap {
    fn from(table: &BTreeMap<String, String>) -> Self {
        Self::new(
            table
                .iter()
                .map(|(key, shard)| (key.clone(), ShardId::new(shard.clone()))),
        )
    }
}

/// Default borough assignments as a config-shaped table.
pub fn default_borough_table() -> BTreeMap<String, String> {
    [
        ("Camden", "shard1"),
        ("Hackney", "shard1"),
        ("Islington", "shard1"),
        ("Westminster", "shard1"),
        ("Tower Hamlets", "shard2"),
        ("Lambeth", "shard2"),
        ("Southwark", "shard2"),
        ("Ealing", "shard3"),
        ("Brent", "shard3"),
        ("Barnet", "shard3"),
        ("Croydon", "shard4"),
        ("Bromley", "shard4"),
        ("Bexley", "shard4"),
    ]
    .into_iter()
    .map(|(key, shard)| (key.to_string(), shard.to_string()))
    .collect()
}
