//! Default constants for loader configuration.
//!
//! All magic numbers are centralized here with documentation.

// =============================================================================
// Shard Defaults
// =============================================================================

/// Host used for the built-in local shard set
pub const DEFAULT_SHARD_HOST: &str = "localhost";

/// Port of `shard1`; `shardN` listens on this plus N - 1
pub const DEFAULT_FIRST_SHARD_PORT: u16 = 5433;

/// Number of shards in the built-in local shard set
pub const DEFAULT_SHARD_COUNT: u16 = 4;

/// Database user when neither the shard nor `[credentials]` names one
pub const DEFAULT_SHARD_USER: &str = "postgres";

/// Database name for a shard with no explicit `dbname`
pub fn default_dbname(shard: &str) -> String {
    format!("{shard}_db")
}

// =============================================================================
// Load Defaults
// =============================================================================

/// Shards loaded at once; 1 is the sequential baseline
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Rows per INSERT statement inside a shard's transaction
pub const DEFAULT_CHUNK_ROWS: usize = 1000;

/// Hard cap on rows per statement.
/// 16 bind parameters per row must stay within PostgreSQL's 65535 limit.
pub const MAX_CHUNK_ROWS: usize = 65535 / 16;

/// Retries after the first failed attempt; 0 disables retry
pub const DEFAULT_MAX_RETRIES: u32 = 0;

/// Backoff before the first retry, doubled on each further retry
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;

/// Upper bound on a single backoff sleep
pub const MAX_RETRY_BACKOFF_MS: u64 = 30_000;

/// Time allowed to establish a shard connection
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
