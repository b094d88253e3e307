//! Error types for configuration, input reading and shard loads.

use crate::model::ShardId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of one shard's load. Never aborts other shards.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("shard {shard}: configuration error: {detail}")]
    Configuration { shard: ShardId, detail: String },

    #[error("shard {shard}: connection failed: {detail}")]
    Connection { shard: ShardId, detail: String },

    #[error("shard {shard}: statement failed: {detail}")]
    Statement { shard: ShardId, detail: String },

    #[error("shard {shard}: load cancelled before commit")]
    Cancelled { shard: ShardId },
}

/// Serializable classification of a [`LoadError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    Connection,
    Statement,
    Cancelled,
}

impl LoadError {
    pub fn connection(shard: &ShardId, detail: impl ToString) -> Self {
        Self::Connection {
            shard: shard.clone(),
            detail: detail.to_string(),
        }
    }

    pub fn statement(shard: &ShardId, detail: impl ToString) -> Self {
        Self::Statement {
            shard: shard.clone(),
            detail: detail.to_string(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            LoadError::Configuration { .. } => ErrorKind::Configuration,
            LoadError::Connection { .. } => ErrorKind::Connection,
            LoadError::Statement { .. } => ErrorKind::Statement,
            LoadError::Cancelled { .. } => ErrorKind::Cancelled,
        }
    }

    pub fn shard(&self) -> &ShardId {
        match self {
            LoadError::Configuration { shard, .. }
            | LoadError::Connection { shard, .. }
            | LoadError::Statement { shard, .. }
            | LoadError::Cancelled { shard } => shard,
        }
    }

    /// Network and database failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LoadError::Connection { .. } | LoadError::Statement { .. }
        )
    }
}

/// Startup-time configuration failure.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("shard {0} is referenced by the shard map but has no connection parameters")]
    MissingShard(ShardId),

    #[error("shard {shard}: {reason}")]
    InvalidShard { shard: ShardId, reason: String },

    #[error("invalid load settings: {0}")]
    InvalidLoad(String),

    #[error("the shard map is empty")]
    EmptyShardMap,
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Load(Box::new(err))
    }
}

/// Failure reading the input dataset.
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing required column: {0}")]
    MissingColumn(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_connection_and_statement_errors_retry() {
        let shard = ShardId::from("shard1");
        assert!(LoadError::connection(&shard, "refused").is_retryable());
        assert!(LoadError::statement(&shard, "deadlock").is_retryable());
        assert!(!LoadError::Cancelled {
            shard: shard.clone()
        }
        .is_retryable());
        assert!(!LoadError::Configuration {
            shard: shard.clone(),
            detail: "missing".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn error_detail_names_the_shard() {
        let err = LoadError::connection(&ShardId::from("shard3"), "connection refused");
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(err.shard().as_str(), "shard3");
        assert_eq!(
            err.to_string(),
            "shard shard3: connection failed: connection refused"
        );
    }
}
