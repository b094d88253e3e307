//! PostgreSQL shard connections.
//!
//! Each shard load opens one dedicated connection, begins one transaction,
//! writes the batch as multi-row `INSERT ... ON CONFLICT (id) DO NOTHING`
//! statements of at most `chunk_rows` rows, and commits once. Dropping the
//! transaction without commit rolls it back.

use crate::config::{
    ShardTarget, DEFAULT_CHUNK_ROWS, DEFAULT_CONNECT_TIMEOUT_SECS, MAX_CHUNK_ROWS,
};
use crate::connection::{ShardConnection, ShardConnector};
use crate::error::LoadError;
use crate::model::{Listing, PartitionBatch, ShardId, LISTING_COLUMNS};
use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{Connection, Postgres, QueryBuilder};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Destination table.
pub const LISTINGS_TABLE: &str = "listings";

/// Reference DDL for the destination table.
pub const LISTINGS_DDL: &str = "CREATE TABLE IF NOT EXISTS listings (
    id BIGINT PRIMARY KEY,
    name TEXT,
    host_id BIGINT,
    host_name TEXT,
    neighbourhood TEXT,
    latitude DOUBLE PRECISION,
    longitude DOUBLE PRECISION,
    room_type TEXT,
    price BIGINT,
    minimum_nights BIGINT,
    number_of_reviews BIGINT,
    last_review DATE,
    reviews_per_month DOUBLE PRECISION,
    calculated_host_listings_count BIGINT,
    availability_365 BIGINT,
    number_of_reviews_ltm BIGINT
)";

/// Opens one PostgreSQL connection per shard load.
#[derive(Debug, Clone)]
pub struct PgConnector {
    connect_timeout: Duration,
    chunk_rows: usize,
}

impl Default for PgConnector {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            DEFAULT_CHUNK_ROWS,
        )
    }
}

impl PgConnector {
    pub fn new(connect_timeout: Duration, chunk_rows: usize) -> Self {
        Self {
            connect_timeout,
            chunk_rows: chunk_rows.clamp(1, MAX_CHUNK_ROWS),
        }
    }

    fn connect_options(target: &ShardTarget) -> PgConnectOptions {
        let options = PgConnectOptions::new()
            .host(&target.host)
            .port(target.port)
            .database(&target.dbname)
            .username(&target.user)
            .application_name("shardload");
        match &target.password {
            Some(password) => options.password(password),
            None => options,
        }
    }
}

#[async_trait]
impl ShardConnector for PgConnector {
    type Connection = PgShardConnection;

    async fn connect(&self, target: &ShardTarget) -> Result<PgShardConnection, LoadError> {
        let options = Self::connect_options(target);
        let conn = tokio::time::timeout(self.connect_timeout, PgConnection::connect_with(&options))
            .await
            .map_err(|_| {
                LoadError::connection(
                    &target.shard,
                    format!(
                        "timed out after {:?} connecting to {}:{}",
                        self.connect_timeout, target.host, target.port
                    ),
                )
            })?
            .map_err(|err| LoadError::connection(&target.shard, err))?;
        Ok(PgShardConnection {
            shard: target.shard.clone(),
            conn,
            chunk_rows: self.chunk_rows,
        })
    }
}

/// One open connection to one shard database.
pub struct PgShardConnection {
    shard: ShardId,
    conn: PgConnection,
    chunk_rows: usize,
}

impl std::fmt::Debug for PgShardConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgShardConnection")
            .field("shard", &self.shard)
            .field("chunk_rows", &self.chunk_rows)
            .finish_non_exhaustive()
    }
}

/// `INSERT INTO listings (...) VALUES (...), ... ON CONFLICT (id) DO NOTHING`
/// for one chunk of rows.
pub fn build_insert(rows: &[Listing]) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new(format!(
        "INSERT INTO {LISTINGS_TABLE} ({}) ",
        LISTING_COLUMNS.join(", ")
    ));
    builder.push_values(rows, |mut row, listing| {
        row.push_bind(listing.id)
            .push_bind(listing.name.as_deref())
            .push_bind(listing.host_id)
            .push_bind(listing.host_name.as_deref())
            .push_bind(listing.neighbourhood.as_deref())
            .push_bind(listing.latitude)
            .push_bind(listing.longitude)
            .push_bind(listing.room_type.as_deref())
            .push_bind(listing.price)
            .push_bind(listing.minimum_nights)
            .push_bind(listing.number_of_reviews)
            .push_bind(listing.last_review)
            .push_bind(listing.reviews_per_month)
            .push_bind(listing.calculated_host_listings_count)
            .push_bind(listing.availability_365)
            .push_bind(listing.number_of_reviews_ltm);
    });
    builder.push(" ON CONFLICT (id) DO NOTHING");
    builder
}

/// A cancelled load is reported as cancelled whatever the rollback did.
/// The server discards an uncommitted transaction when the connection goes.
fn cancelled(shard: ShardId, rollback: Result<(), sqlx::Error>) -> LoadError {
    if let Err(err) = rollback {
        debug!(shard = %shard, error = %err, "Rollback after cancellation failed");
    }
    LoadError::Cancelled { shard }
}

#[async_trait]
impl ShardConnection for PgShardConnection {
    async fn bulk_upsert(
        &mut self,
        batch: &PartitionBatch,
        cancel: &CancellationToken,
    ) -> Result<u64, LoadError> {
        let shard = self.shard.clone();
        let mut tx = self
            .conn
            .begin()
            .await
            .map_err(|err| LoadError::connection(&shard, err))?;

        let mut inserted = 0u64;
        for chunk in batch.chunks(self.chunk_rows) {
            if cancel.is_cancelled() {
                return Err(cancelled(shard, tx.rollback().await));
            }
            let result = build_insert(chunk)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(|err| LoadError::statement(&shard, err))?;
            inserted += result.rows_affected();
            debug!(shard = %shard, rows = chunk.len(), inserted, "Executed insert chunk");
        }

        if cancel.is_cancelled() {
            return Err(cancelled(shard, tx.rollback().await));
        }
        tx.commit()
            .await
            .map_err(|err| LoadError::statement(&shard, err))?;
        Ok(inserted)
    }

    async fn close(self) -> Result<(), LoadError> {
        let shard = self.shard;
        self.conn
            .close()
            .await
            .map_err(|err| LoadError::connection(&shard, err))
    }
}
