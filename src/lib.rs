//! # Shardload
//!
//! Routes listing records from one source dataset into independently owned
//! PostgreSQL shards, choosing each record's shard from its neighbourhood
//! through a static table, and bulk-loads every shard idempotently.
//!
//! Data flow:
//!
//! ```text
//! CSV rows → RecordPartitioner(ShardMap) → {shard → PartitionBatch}
//!          → LoadCoordinator → ShardConnection(shard) → listings table
//! ```
//!
//! Each shard is loaded in its own transaction with
//! `ON CONFLICT (id) DO NOTHING`, so re-running a load never duplicates or
//! overwrites rows, and a failing shard never stops the others.

pub mod config;
pub mod connection;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod model;
pub mod outcome;
pub mod partitioner;
pub mod postgres;
pub mod shard_map;
pub mod source;

// Re-export main types for convenience
pub use config::{LoaderConfig, ShardTarget, ShardTargets};
pub use connection::{ShardConnection, ShardConnector};
pub use coordinator::{LoadCoordinator, LoadOptions};
pub use error::{ConfigError, ErrorKind, LoadError, SourceError};
pub use memory::MemoryCluster;
pub use model::{Listing, PartitionBatch, ShardId};
pub use outcome::{LoadOutcome, LoadStatus, RunSummary, ShardLoadState};
pub use partitioner::{Partitioned, RecordPartitioner};
pub use postgres::PgConnector;
pub use shard_map::ShardMap;
pub use source::{read_listings, ListingReader, SourceStats};
