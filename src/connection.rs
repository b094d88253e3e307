//! # Connection Module
//!
//! The seam between the load coordinator and a shard's database. A
//! [`ShardConnector`] opens one scoped [`ShardConnection`] per shard load;
//! the connection exposes a single transactional bulk upsert.
//!
//! Implementations must give these guarantees:
//! - the whole batch is written in one transaction and committed once;
//! - a row whose `id` already exists is skipped, never overwritten and
//!   never an error;
//! - on any error or cancellation nothing from the batch is visible;
//! - dropping the connection releases it, whether or not `close` ran.

use crate::config::ShardTarget;
use crate::error::LoadError;
use crate::model::PartitionBatch;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Opens connections to shard databases.
#[async_trait]
pub trait ShardConnector: Send + Sync {
    type Connection: ShardConnection;

    async fn connect(&self, target: &ShardTarget) -> Result<Self::Connection, LoadError>;
}

/// One open connection to one shard.
#[async_trait]
pub trait ShardConnection: Send {
    /// Insert `batch`, skipping primary-key collisions. Returns the number of
    /// rows actually inserted.
    ///
    /// `cancel` is observed between statement chunks; a cancelled load rolls
    /// back and returns [`LoadError::Cancelled`].
    async fn bulk_upsert(
        &mut self,
        batch: &PartitionBatch,
        cancel: &CancellationToken,
    ) -> Result<u64, LoadError>;

    /// Graceful release. Errors here are logged by the caller, not reported.
    async fn close(self) -> Result<(), LoadError>;
}
