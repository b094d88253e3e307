//! # Coordinator Module
//!
//! Drives every non-empty shard batch through connect → upsert → release,
//! isolating failures per shard and collecting one [`LoadOutcome`] each.

use crate::config::{
    ShardTarget, ShardTargets, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES,
    DEFAULT_RETRY_BACKOFF_MS, MAX_RETRY_BACKOFF_MS,
};
use crate::connection::{ShardConnection, ShardConnector};
use crate::error::LoadError;
use crate::model::{PartitionBatch, ShardId};
use crate::outcome::{LoadOutcome, RunSummary, ShardLoadState};
use crate::partitioner::Partitioned;
use futures::stream::{self, StreamExt};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Scheduling knobs for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadOptions {
    /// Maximum shard loads in flight. 1 loads shards one after another.
    pub concurrency: usize,
    /// Retries after a retryable failure, per shard.
    pub max_retries: u32,
    /// Sleep before the first retry; doubles on each further retry.
    pub retry_backoff: Duration,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: Duration::from_millis(DEFAULT_RETRY_BACKOFF_MS),
        }
    }
}

impl LoadOptions {
    fn backoff_for(&self, retry: u32) -> Duration {
        let factor = 1u32 << retry.saturating_sub(1).min(16);
        self.retry_backoff
            .saturating_mul(factor)
            .min(Duration::from_millis(MAX_RETRY_BACKOFF_MS))
    }
}

/// Loads partitioned batches into their shards.
#[derive(Debug)]
pub struct LoadCoordinator<C> {
    connector: C,
    targets: ShardTargets,
    options: LoadOptions,
}

impl<C: ShardConnector> LoadCoordinator<C> {
    pub fn new(connector: C, targets: ShardTargets, options: LoadOptions) -> Self {
        Self {
            connector,
            targets,
            options,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    /// Load a partitioning pass and build the run summary.
    pub async fn load(&self, partitioned: Partitioned, cancel: &CancellationToken) -> RunSummary {
        let Partitioned {
            batches,
            unrouted,
            unrouted_keys,
            excluded,
            total,
        } = partitioned;
        let outcomes = self.run(batches, cancel).await;
        let summary = RunSummary {
            total_records: total,
            unrouted,
            unrouted_keys,
            excluded,
            outcomes,
        };
        info!(
            shards = summary.outcomes.len(),
            failed = summary.failed_shards().len(),
            inserted = summary.total_inserted(),
            "Load run finished"
        );
        summary
    }

    /// One outcome per batch, sorted by shard identifier.
    ///
    /// Empty batches are reported as skipped without connecting. A failure
    /// on one shard never prevents the others from being attempted.
    pub async fn run(
        &self,
        batches: BTreeMap<ShardId, PartitionBatch>,
        cancel: &CancellationToken,
    ) -> Vec<LoadOutcome> {
        let mut outcomes = Vec::with_capacity(batches.len());
        let mut pending = Vec::new();
        for (shard, batch) in batches {
            if batch.is_empty() {
                debug!(shard = %shard, "Skipping empty batch");
                outcomes.push(LoadOutcome::skipped(shard));
            } else {
                pending.push((shard, batch));
            }
        }

        let loaded: Vec<LoadOutcome> = stream::iter(pending)
            .map(|(shard, batch)| self.load_shard(shard, batch, cancel))
            .buffer_unordered(self.options.concurrency.max(1))
            .collect()
            .await;
        outcomes.extend(loaded);
        outcomes.sort_by(|a, b| a.shard.cmp(&b.shard));
        outcomes
    }

    #[instrument(skip(self, batch, cancel), fields(records = batch.len()))]
    async fn load_shard(
        &self,
        shard: ShardId,
        batch: PartitionBatch,
        cancel: &CancellationToken,
    ) -> LoadOutcome {
        let started = Instant::now();
        let attempted = batch.len();

        let Some(target) = self.targets.get(&shard) else {
            let err = LoadError::Configuration {
                shard: shard.clone(),
                detail: "no connection parameters for shard".to_string(),
            };
            warn!(error = %err, "Shard load failed");
            return LoadOutcome::failed(shard, attempted, &err).with_timing(0, started.elapsed());
        };

        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                let err = LoadError::Cancelled {
                    shard: shard.clone(),
                };
                warn!(error = %err, "Shard load failed");
                return LoadOutcome::failed(shard, attempted, &err)
                    .with_timing(attempts, started.elapsed());
            }

            attempts += 1;
            match self.attempt(target, &batch, cancel).await {
                Ok(inserted) => {
                    info!(inserted, attempts, "Shard committed");
                    return LoadOutcome::committed(shard, attempted, inserted)
                        .with_timing(attempts, started.elapsed());
                }
                Err(err) if err.is_retryable() && attempts <= self.options.max_retries => {
                    let delay = self.options.backoff_for(attempts);
                    warn!(error = %err, attempt = attempts, ?delay, "Retrying shard load");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
                Err(err) => {
                    warn!(error = %err, attempts, "Shard load failed");
                    return LoadOutcome::failed(shard, attempted, &err)
                        .with_timing(attempts, started.elapsed());
                }
            }
        }
    }

    /// One connect → upsert → release cycle.
    async fn attempt(
        &self,
        target: &ShardTarget,
        batch: &PartitionBatch,
        cancel: &CancellationToken,
    ) -> Result<u64, LoadError> {
        let mut state = ShardLoadState::Pending;
        advance(&mut state, ShardLoadState::Connecting, &target.shard);
        let mut conn = match self.connector.connect(target).await {
            Ok(conn) => conn,
            Err(err) => {
                advance(&mut state, ShardLoadState::Failed, &target.shard);
                return Err(err);
            }
        };

        advance(&mut state, ShardLoadState::Loading, &target.shard);
        let result = conn.bulk_upsert(batch, cancel).await;
        if let Err(err) = conn.close().await {
            debug!(shard = %target.shard, error = %err, "Connection close failed");
        }

        let terminal = if result.is_ok() {
            ShardLoadState::Committed
        } else {
            ShardLoadState::Failed
        };
        advance(&mut state, terminal, &target.shard);
        result
    }
}

fn advance(state: &mut ShardLoadState, next: ShardLoadState, shard: &ShardId) {
    debug_assert!(state.can_advance_to(next), "{state:?} -> {next:?}");
    debug!(shard = %shard, from = ?state, to = ?next, "Shard state");
    *state = next;
}
