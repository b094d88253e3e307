//! Per-shard load results and the run summary.

use crate::error::{ErrorKind, LoadError};
use crate::model::ShardId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Lifecycle of one shard's load.
///
/// `Pending → Connecting → Loading → {Committed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardLoadState {
    Pending,
    Connecting,
    Loading,
    Committed,
    Failed,
}

impl ShardLoadState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ShardLoadState::Committed | ShardLoadState::Failed)
    }

    /// Whether `self → next` is a legal transition.
    pub fn can_advance_to(self, next: ShardLoadState) -> bool {
        use ShardLoadState::*;
        matches!(
            (self, next),
            (Pending, Connecting)
                | (Pending, Failed)
                | (Connecting, Loading)
                | (Connecting, Failed)
                | (Loading, Committed)
                | (Loading, Failed)
        )
    }
}

/// Terminal status reported for a shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
    Committed,
    Failed,
    /// Empty batch; no connection was opened.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadFailure {
    pub kind: ErrorKind,
    pub detail: String,
}

impl From<&LoadError> for LoadFailure {
    fn from(err: &LoadError) -> Self {
        Self {
            kind: err.kind(),
            detail: err.to_string(),
        }
    }
}

/// Result of attempting one shard's batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadOutcome {
    pub shard: ShardId,
    /// Records in the batch handed to the shard.
    pub attempted: usize,
    /// Rows actually written; the rest were primary-key duplicates.
    pub inserted: u64,
    pub status: LoadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<LoadFailure>,
    pub attempts: u32,
    pub elapsed_ms: u64,
}

impl LoadOutcome {
    pub fn committed(shard: ShardId, attempted: usize, inserted: u64) -> Self {
        Self {
            shard,
            attempted,
            inserted,
            status: LoadStatus::Committed,
            error: None,
            attempts: 1,
            elapsed_ms: 0,
        }
    }

    pub fn failed(shard: ShardId, attempted: usize, error: &LoadError) -> Self {
        Self {
            shard,
            attempted,
            inserted: 0,
            status: LoadStatus::Failed,
            error: Some(LoadFailure::from(error)),
            attempts: 1,
            elapsed_ms: 0,
        }
    }

    pub fn skipped(shard: ShardId) -> Self {
        Self {
            shard,
            attempted: 0,
            inserted: 0,
            status: LoadStatus::Skipped,
            error: None,
            attempts: 0,
            elapsed_ms: 0,
        }
    }

    pub fn with_timing(mut self, attempts: u32, elapsed: Duration) -> Self {
        self.attempts = attempts;
        self.elapsed_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn is_success(&self) -> bool {
        self.status != LoadStatus::Failed
    }

    /// Rows suppressed by the conflict rule.
    pub fn duplicates(&self) -> u64 {
        match self.status {
            LoadStatus::Committed => (self.attempted as u64).saturating_sub(self.inserted),
            _ => 0,
        }
    }
}

impl fmt::Display for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            LoadStatus::Committed => write!(
                f,
                "{}: {} records attempted, {} inserted, {} duplicates skipped, committed",
                self.shard,
                self.attempted,
                self.inserted,
                self.duplicates()
            ),
            LoadStatus::Skipped => write!(f, "{}: 0 records attempted, skipped", self.shard),
            LoadStatus::Failed => write!(
                f,
                "{}: {} records attempted, FAILED after {} attempt(s): {}",
                self.shard,
                self.attempted,
                self.attempts,
                self.error
                    .as_ref()
                    .map(|failure| failure.detail.as_str())
                    .unwrap_or("unknown error")
            ),
        }
    }
}

/// Everything an operator needs after a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total_records: usize,
    pub unrouted: usize,
    pub unrouted_keys: BTreeMap<String, usize>,
    /// Routed records left out of this run by a shard filter.
    #[serde(default)]
    pub excluded: usize,
    /// Sorted by shard identifier.
    pub outcomes: Vec<LoadOutcome>,
}

impl RunSummary {
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(LoadOutcome::is_success)
    }

    pub fn failed_shards(&self) -> Vec<&ShardId> {
        self.outcomes
            .iter()
            .filter(|outcome| !outcome.is_success())
            .map(|outcome| &outcome.shard)
            .collect()
    }

    pub fn outcome(&self, shard: &ShardId) -> Option<&LoadOutcome> {
        self.outcomes.iter().find(|outcome| &outcome.shard == shard)
    }

    pub fn total_inserted(&self) -> u64 {
        self.outcomes.iter().map(|outcome| outcome.inserted).sum()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for outcome in &self.outcomes {
            writeln!(f, "{outcome}")?;
        }
        write!(
            f,
            "{} records read, {} unrouted, {} inserted",
            self.total_records,
            self.unrouted,
            self.total_inserted()
        )?;
        if self.excluded > 0 {
            write!(f, ", {} excluded by shard filter", self.excluded)?;
        }
        let failed = self.failed_shards();
        if !failed.is_empty() {
            let names: Vec<&str> = failed.iter().map(|shard| shard.as_str()).collect();
            write!(f, "\nfailed shards (safe to re-run): {}", names.join(","))?;
        }
        Ok(())
    }
}
