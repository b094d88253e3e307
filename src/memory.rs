//! In-memory shard databases.
//!
//! [`MemoryCluster`] implements [`ShardConnector`] with the same
//! transactional and conflict semantics as the PostgreSQL connector. It backs
//! `--dry-run` and the test suite, and can be told to fail a shard's
//! connections or statements.

use crate::config::{ShardTarget, DEFAULT_CHUNK_ROWS};
use crate::connection::{ShardConnection, ShardConnector};
use crate::error::LoadError;
use crate::model::{Listing, PartitionBatch, ShardId};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct ClusterState {
    tables: HashMap<ShardId, BTreeMap<i64, Listing>>,
    unreachable: HashSet<ShardId>,
    failing_statements: HashSet<ShardId>,
    /// Remaining connection failures per shard before it becomes reachable.
    transient_failures: HashMap<ShardId, u32>,
    connections_opened: usize,
    open_connections: usize,
    commits: usize,
}

/// A set of in-memory `listings` tables keyed by shard.
#[derive(Debug, Clone)]
pub struct MemoryCluster {
    state: Arc<Mutex<ClusterState>>,
    chunk_rows: usize,
    /// Cancel this token after the first chunk of every upsert.
    cancel_after_first_chunk: Option<CancellationToken>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClusterState::default())),
            chunk_rows: DEFAULT_CHUNK_ROWS,
            cancel_after_first_chunk: None,
        }
    }

    pub fn with_chunk_rows(mut self, chunk_rows: usize) -> Self {
        self.chunk_rows = chunk_rows.max(1);
        self
    }

    /// Every connection attempt to `shard` fails.
    pub fn fail_connections(&self, shard: impl Into<ShardId>) {
        self.state.lock().unreachable.insert(shard.into());
    }

    /// The next `count` connection attempts to `shard` fail.
    pub fn fail_connections_times(&self, shard: impl Into<ShardId>, count: u32) {
        self.state
            .lock()
            .transient_failures
            .insert(shard.into(), count);
    }

    /// Every INSERT against `shard` fails after the connection opens.
    pub fn fail_statements(&self, shard: impl Into<ShardId>) {
        self.state.lock().failing_statements.insert(shard.into());
    }

    /// Make `shard` healthy again.
    pub fn heal(&self, shard: &ShardId) {
        let mut state = self.state.lock();
        state.unreachable.remove(shard);
        state.failing_statements.remove(shard);
        state.transient_failures.remove(shard);
    }

    /// Simulate an abort arriving mid-batch.
    pub fn cancel_after_first_chunk(mut self, token: CancellationToken) -> Self {
        self.cancel_after_first_chunk = Some(token);
        self
    }

    /// Rows stored in `shard`, ordered by id.
    pub fn rows(&self, shard: &ShardId) -> Vec<Listing> {
        self.state
            .lock()
            .tables
            .get(shard)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn row_count(&self, shard: &ShardId) -> usize {
        self.state
            .lock()
            .tables
            .get(shard)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }

    pub fn connections_opened(&self) -> usize {
        self.state.lock().connections_opened
    }

    pub fn open_connections(&self) -> usize {
        self.state.lock().open_connections
    }

    pub fn commits(&self) -> usize {
        self.state.lock().commits
    }
}

#[async_trait]
impl ShardConnector for MemoryCluster {
    type Connection = MemoryConnection;

    async fn connect(&self, target: &ShardTarget) -> Result<MemoryConnection, LoadError> {
        let shard = target.shard.clone();
        let mut state = self.state.lock();
        if state.unreachable.contains(&shard) {
            return Err(LoadError::connection(
                &shard,
                format!("connection refused ({}:{})", target.host, target.port),
            ));
        }
        if let Some(remaining) = state.transient_failures.get_mut(&shard) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(LoadError::connection(&shard, "connection reset by peer"));
            }
        }
        state.connections_opened += 1;
        state.open_connections += 1;
        Ok(MemoryConnection {
            state: self.state.clone(),
            shard,
            chunk_rows: self.chunk_rows,
            cancel_after_first_chunk: self.cancel_after_first_chunk.clone(),
            released: false,
        })
    }
}

/// One open connection to one in-memory shard.
#[derive(Debug)]
pub struct MemoryConnection {
    state: Arc<Mutex<ClusterState>>,
    shard: ShardId,
    chunk_rows: usize,
    cancel_after_first_chunk: Option<CancellationToken>,
    released: bool,
}

impl MemoryConnection {
    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.state.lock().open_connections -= 1;
        }
    }
}

#[async_trait]
impl ShardConnection for MemoryConnection {
    async fn bulk_upsert(
        &mut self,
        batch: &PartitionBatch,
        cancel: &CancellationToken,
    ) -> Result<u64, LoadError> {
        // The transaction works on a private copy; only commit publishes it.
        let mut staged = {
            let state = self.state.lock();
            if state.failing_statements.contains(&self.shard) {
                return Err(LoadError::statement(
                    &self.shard,
                    "relation \"listings\" does not exist",
                ));
            }
            state.tables.get(&self.shard).cloned().unwrap_or_default()
        };

        let mut inserted = 0u64;
        for (idx, chunk) in batch.chunks(self.chunk_rows).enumerate() {
            if cancel.is_cancelled() {
                return Err(LoadError::Cancelled {
                    shard: self.shard.clone(),
                });
            }
            for record in chunk {
                if !staged.contains_key(&record.id) {
                    staged.insert(record.id, record.clone());
                    inserted += 1;
                }
            }
            if idx == 0 {
                if let Some(token) = &self.cancel_after_first_chunk {
                    token.cancel();
                }
            }
            tokio::task::yield_now().await;
        }
        if cancel.is_cancelled() {
            return Err(LoadError::Cancelled {
                shard: self.shard.clone(),
            });
        }

        let mut state = self.state.lock();
        state.tables.insert(self.shard.clone(), staged);
        state.commits += 1;
        Ok(inserted)
    }

    async fn close(mut self) -> Result<(), LoadError> {
        self.release();
        Ok(())
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.release();
    }
}
