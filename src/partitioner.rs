//! Grouping of listings into per-shard batches.

use crate::model::{Listing, PartitionBatch, ShardId};
use crate::shard_map::ShardMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// Placeholder used in the unrouted tally for records with no partition key.
pub const MISSING_KEY: &str = "<null>";

/// Output of one partitioning pass.
#[derive(Debug, Clone)]
pub struct Partitioned {
    pub batches: BTreeMap<ShardId, PartitionBatch>,
    /// Records whose partition key was missing or not in the shard map.
    pub unrouted: usize,
    /// Unrouted record count per offending key.
    pub unrouted_keys: BTreeMap<String, usize>,
    /// Routed records whose batch was dropped by [`Partitioned::retain_shards`].
    pub excluded: usize,
    pub total: usize,
}

impl Partitioned {
    pub fn routed(&self) -> usize {
        self.batches.values().map(PartitionBatch::len).sum()
    }

    pub fn batch(&self, shard: &ShardId) -> Option<&PartitionBatch> {
        self.batches.get(shard)
    }

    /// Drop every batch whose shard is not in `shards`.
    ///
    /// Dropped records move to `excluded`, so
    /// `routed + unrouted + excluded == total` still holds.
    pub fn retain_shards(&mut self, shards: &BTreeSet<ShardId>) {
        let mut excluded = 0;
        self.batches.retain(|shard, batch| {
            let keep = shards.contains(shard);
            if !keep {
                excluded += batch.len();
            }
            keep
        });
        self.excluded += excluded;
    }

    pub fn stats(&self) -> PartitionStats {
        PartitionStats {
            total: self.total,
            routed: self.routed(),
            unrouted: self.unrouted,
            excluded: self.excluded,
            per_shard: self
                .batches
                .iter()
                .map(|(shard, batch)| (shard.clone(), batch.len()))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PartitionStats {
    pub total: usize,
    pub routed: usize,
    pub unrouted: usize,
    pub excluded: usize,
    pub per_shard: BTreeMap<ShardId, usize>,
}

/// Routes a record stream through a [`ShardMap`].
#[derive(Debug, Clone, Copy)]
pub struct RecordPartitioner<'a> {
    map: &'a ShardMap,
}

impl<'a> RecordPartitioner<'a> {
    pub fn new(map: &'a ShardMap) -> Self {
        Self { map }
    }

    /// Single pass over `records`.
    ///
    /// Every shard the map knows gets a batch, empty or not, so the run
    /// summary can report all of them. Batches keep input order.
    pub fn partition(&self, records: impl IntoIterator<Item = Listing>) -> Partitioned {
        let mut batches: BTreeMap<ShardId, PartitionBatch> = self
            .map
            .shard_ids()
            .into_iter()
            .map(|shard| (shard.clone(), PartitionBatch::new(shard)))
            .collect();
        let mut unrouted_keys: BTreeMap<String, usize> = BTreeMap::new();
        let mut unrouted = 0usize;
        let mut total = 0usize;

        for record in records {
            total += 1;
            let record = record.normalized();
            let shard = record
                .partition_key()
                .and_then(|key| self.map.route(key));
            match shard {
                Some(shard) => {
                    if let Some(batch) = batches.get_mut(shard) {
                        batch.push(record);
                    }
                }
                None => {
                    unrouted += 1;
                    let key = record.partition_key().unwrap_or(MISSING_KEY).to_string();
                    *unrouted_keys.entry(key).or_insert(0) += 1;
                }
            }
        }

        if unrouted > 0 {
            let keys: Vec<&str> = unrouted_keys.keys().map(String::as_str).collect();
            warn!(
                unrouted,
                total,
                keys = ?keys,
                "Dropped records with no shard assignment"
            );
        }
        debug!(total, routed = total - unrouted, "Partitioned records");

        Partitioned {
            batches,
            unrouted,
            unrouted_keys,
            excluded: 0,
            total,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing(id: i64, key: Option<&str>) -> Listing {
        Listing::new(id, key)
    }

    #[test]
    fn empty_input_yields_empty_batches_for_every_shard() {
        let map = ShardMap::london_boroughs();
        let partitioned = RecordPartitioner::new(&map).partition(Vec::new());
        assert_eq!(partitioned.batches.len(), 4);
        assert!(partitioned.batches.values().all(PartitionBatch::is_empty));
        assert_eq!(partitioned.total, 0);
        assert_eq!(partitioned.unrouted, 0);
    }

    #[test]
    fn unknown_and_missing_keys_are_counted_not_raised() {
        let map = ShardMap::london_boroughs();
        let records = vec![
            listing(1, Some("Camden")),
            listing(2, Some("Unknown District")),
            listing(3, None),
            listing(4, Some("  ")),
            listing(5, Some("Unknown District")),
        ];
        let partitioned = RecordPartitioner::new(&map).partition(records);

        assert_eq!(partitioned.routed(), 1);
        assert_eq!(partitioned.unrouted, 4);
        assert_eq!(partitioned.unrouted_keys.get("Unknown District"), Some(&2));
        assert_eq!(partitioned.unrouted_keys.get(MISSING_KEY), Some(&2));
        assert_eq!(partitioned.routed() + partitioned.unrouted, partitioned.total);
    }

    #[test]
    fn batches_preserve_input_order() {
        let map = ShardMap::london_boroughs();
        let records = vec![
            listing(30, Some("Hackney")),
            listing(10, Some("Lambeth")),
            listing(20, Some("Camden")),
            listing(5, Some("Westminster")),
        ];
        let partitioned = RecordPartitioner::new(&map).partition(records);
        let shard1: Vec<i64> = partitioned
            .batch(&ShardId::from("shard1"))
            .unwrap()
            .records()
            .iter()
            .map(|record| record.id)
            .collect();
        assert_eq!(shard1, vec![30, 20, 5]);
        assert_eq!(partitioned.batch(&ShardId::from("shard2")).unwrap().len(), 1);
    }

    #[test]
    fn duplicate_ids_are_kept_for_insert_time_resolution() {
        let map = ShardMap::london_boroughs();
        let records = vec![listing(7, Some("Camden")), listing(7, Some("Islington"))];
        let partitioned = RecordPartitioner::new(&map).partition(records);
        assert_eq!(partitioned.batch(&ShardId::from("shard1")).unwrap().len(), 2);
    }

    #[test]
    fn payload_nulls_are_normalized() {
        let map = ShardMap::london_boroughs();
        let mut record = listing(1, Some("Brent"));
        record.room_type = Some(String::new());
        record.latitude = Some(f64::NAN);
        let partitioned = RecordPartitioner::new(&map).partition(vec![record]);
        let stored = &partitioned.batch(&ShardId::from("shard3")).unwrap().records()[0];
        assert_eq!(stored.room_type, None);
        assert_eq!(stored.latitude, None);
    }

    #[test]
    fn retain_shards_filters_batches() {
        let map = ShardMap::london_boroughs();
        let mut partitioned = RecordPartitioner::new(&map).partition(vec![
            listing(1, Some("Camden")),
            listing(2, Some("Croydon")),
        ]);
        let keep: BTreeSet<ShardId> = [ShardId::from("shard4")].into_iter().collect();
        partitioned.retain_shards(&keep);
        assert_eq!(partitioned.batches.len(), 1);
        assert_eq!(partitioned.stats().per_shard.get(&ShardId::from("shard4")), Some(&1));
    }

    #[test]
    fn retained_shards_still_account_for_every_record() {
        let map = ShardMap::london_boroughs();
        let mut partitioned = RecordPartitioner::new(&map).partition(vec![
            listing(1, Some("Camden")),
            listing(2, Some("Hackney")),
            listing(3, Some("Croydon")),
            listing(4, Some("Unknown District")),
        ]);
        let keep: BTreeSet<ShardId> = [ShardId::from("shard4")].into_iter().collect();
        partitioned.retain_shards(&keep);

        assert_eq!(partitioned.excluded, 2);
        assert_eq!(partitioned.routed(), 1);
        assert_eq!(partitioned.unrouted, 1);
        assert_eq!(
            partitioned.routed() + partitioned.unrouted + partitioned.excluded,
            partitioned.total
        );
        assert_eq!(partitioned.stats().excluded, 2);
    }

    #[test]
    fn padded_partition_keys_still_route() {
        let map = ShardMap::london_boroughs();
        let partitioned =
            RecordPartitioner::new(&map).partition(vec![listing(1, Some("  Camden "))]);
        assert_eq!(partitioned.unrouted, 0);
        assert_eq!(partitioned.batch(&ShardId::from("shard1")).unwrap().len(), 1);
    }
}
