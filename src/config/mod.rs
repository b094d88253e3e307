//! Configuration for the shard loader.
//!
//! Configuration is loaded with precedence: CLI args > Env vars > Config file > Defaults
//!
//! # Example config file (shardload.toml)
//! ```toml
//! input = "data/cleaned_airbnb_listings.csv"
//!
//! [shard_map]
//! "Camden" = "shard1"
//! "Lambeth" = "shard2"
//!
//! [credentials]
//! user = "loader"
//! password = "secret"
//!
//! [shards.shard1]
//! host = "localhost"
//! port = 5433
//! dbname = "shard1_db"
//!
//! [shards.shard2]
//! host = "localhost"
//! port = 5434
//!
//! [load]
//! concurrency = 2
//! max_retries = 3
//! ```
//!
//! Environment variables use the `SHARDLOAD_` prefix and `__` for nesting,
//! e.g. `SHARDLOAD_SHARDS__SHARD1__PORT=6543` or `SHARDLOAD_CREDENTIALS__PASSWORD=...`.
//! The variables of the compose deployment (`POSTGRES_USER`,
//! `POSTGRES_PASSWORD`, `PG_SHARD1_PORT` .. `PG_SHARD4_PORT`) are read as
//! well, below the `SHARDLOAD_` ones.
//!
//! An empty `[shard_map]` falls back to the built-in London borough table; a
//! non-empty one replaces it entirely. `[shards]` entries are laid over the
//! four built-in local shards.

mod defaults;

pub use defaults::*;

use crate::coordinator::LoadOptions;
use crate::error::ConfigError;
use crate::model::ShardId;
use crate::shard_map::{default_borough_table, ShardMap};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Cleaned listings CSV
    pub input: Option<PathBuf>,
    /// Partition key → shard identifier
    pub shard_map: BTreeMap<String, String>,
    /// Connection parameters per shard identifier
    pub shards: BTreeMap<String, ShardConfig>,
    /// Credentials shared by shards that do not set their own
    pub credentials: CredentialsConfig,
    /// Load scheduling and statement sizing
    pub load: LoadConfig,
}

impl LoaderConfig {
    /// Load configuration with precedence: CLI args > Env > File > Defaults
    pub fn load(
        config_path: Option<&str>,
        overrides: ConfigOverrides,
    ) -> Result<Self, ConfigError> {
        let mut figment = Figment::new().merge(Serialized::defaults(LoaderConfig::default()));

        // Layer 1: Config file (if provided)
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Layer 2: Variables shared with the docker compose shard deployment
        figment = merge_compose_env(figment);

        // Layer 3: Environment variables with SHARDLOAD_ prefix
        figment = figment.merge(Env::prefixed("SHARDLOAD_").split("__"));

        // Layer 4: CLI overrides
        figment = figment.merge(Serialized::defaults(overrides));

        let config: LoaderConfig = figment.extract()?;
        config.load.validate()?;
        Ok(config)
    }

    /// Load from environment and optional config file only (no CLI overrides)
    pub fn from_env(config_path: Option<&str>) -> Result<Self, ConfigError> {
        Self::load(config_path, ConfigOverrides::default())
    }

    /// The effective routing table.
    pub fn shard_map(&self) -> ShardMap {
        if self.shard_map.is_empty() {
            ShardMap::from(&default_borough_table())
        } else {
            ShardMap::from(&self.shard_map)
        }
    }

    /// The effective per-shard connection settings.
    ///
    /// Configured shards are laid over the built-in local ones field by
    /// field, so `SHARDLOAD_SHARDS__SHARD1__PORT` alone moves one port.
    pub fn shard_configs(&self) -> BTreeMap<String, ShardConfig> {
        let mut configs = default_shard_configs();
        for (shard, config) in &self.shards {
            let merged = match configs.remove(shard) {
                Some(base) => config.clone().or(base),
                None => config.clone(),
            };
            configs.insert(shard.clone(), merged);
        }
        configs
    }
}

/// Layer `POSTGRES_USER`, `POSTGRES_PASSWORD` and `PG_SHARD<N>_PORT` from the
/// compose `.env` onto `credentials` and `shards.shard<N>.port`.
///
/// Credentials are read as raw strings so a numeric password keeps its
/// exact text.
fn merge_compose_env(mut figment: Figment) -> Figment {
    if let Some(user) = Env::var("POSTGRES_USER") {
        figment = figment.merge(Serialized::default("credentials.user", user));
    }
    if let Some(password) = Env::var("POSTGRES_PASSWORD") {
        figment = figment.merge(Serialized::default("credentials.password", password));
    }
    figment.merge(Env::raw().filter_map(|key| {
        let key = key.as_str().to_ascii_uppercase();
        let index = key.strip_prefix("PG_SHARD")?.strip_suffix("_PORT")?;
        if index.is_empty() || !index.bytes().all(|byte| byte.is_ascii_digit()) {
            return None;
        }
        Some(format!("shards.shard{index}.port").into())
    }))
}

/// Connection settings for one shard as written in the config file.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ShardConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub dbname: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for ShardConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ShardConfig {
    fn or(self, base: ShardConfig) -> Self {
        Self {
            host: self.host.or(base.host),
            port: self.port.or(base.port),
            dbname: self.dbname.or(base.dbname),
            user: self.user.or(base.user),
            password: self.password.or(base.password),
        }
    }
}

fn default_shard_configs() -> BTreeMap<String, ShardConfig> {
    (0..DEFAULT_SHARD_COUNT)
        .map(|idx| {
            let shard = format!("shard{}", idx + 1);
            let config = ShardConfig {
                host: Some(DEFAULT_SHARD_HOST.to_string()),
                port: Some(DEFAULT_FIRST_SHARD_PORT + idx),
                dbname: Some(default_dbname(&shard)),
                user: None,
                password: None,
            };
            (shard, config)
        })
        .collect()
}

#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    pub user: Option<String>,
    pub password: Option<String>,
}

impl fmt::Debug for CredentialsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialsConfig")
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Load scheduling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Shards loaded at once
    pub concurrency: usize,
    /// Rows per INSERT statement
    pub chunk_rows: usize,
    /// Retries of a failed shard load
    pub max_retries: u32,
    /// Initial retry backoff in milliseconds
    pub retry_backoff_ms: u64,
    /// Connection timeout in seconds
    pub connect_timeout_secs: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            chunk_rows: DEFAULT_CHUNK_ROWS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl LoadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidLoad(
                "concurrency must be at least 1".to_string(),
            ));
        }
        if self.chunk_rows == 0 || self.chunk_rows > MAX_CHUNK_ROWS {
            return Err(ConfigError::InvalidLoad(format!(
                "chunk_rows must be between 1 and {MAX_CHUNK_ROWS}"
            )));
        }
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidLoad(
                "connect_timeout_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn options(&self) -> LoadOptions {
        LoadOptions {
            concurrency: self.concurrency,
            max_retries: self.max_retries,
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

/// Resolved, immutable connection parameters for one shard.
#[derive(Clone, PartialEq, Eq)]
pub struct ShardTarget {
    pub shard: ShardId,
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: Option<String>,
}

impl fmt::Debug for ShardTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShardTarget")
            .field("shard", &self.shard)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("dbname", &self.dbname)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl ShardTarget {
    fn resolve(
        shard: &ShardId,
        config: &ShardConfig,
        credentials: &CredentialsConfig,
    ) -> Result<Self, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidShard {
            shard: shard.clone(),
            reason: reason.to_string(),
        };

        let host = config
            .host
            .clone()
            .unwrap_or_else(|| DEFAULT_SHARD_HOST.to_string());
        if host.trim().is_empty() {
            return Err(invalid("host is empty"));
        }
        let port = config.port.ok_or_else(|| invalid("port is not set"))?;
        if port == 0 {
            return Err(invalid("port must be non-zero"));
        }
        let dbname = config
            .dbname
            .clone()
            .unwrap_or_else(|| default_dbname(shard.as_str()));
        if dbname.trim().is_empty() {
            return Err(invalid("dbname is empty"));
        }
        let user = config
            .user
            .clone()
            .or_else(|| credentials.user.clone())
            .unwrap_or_else(|| DEFAULT_SHARD_USER.to_string());
        let password = config.password.clone().or_else(|| credentials.password.clone());

        Ok(Self {
            shard: shard.clone(),
            host,
            port,
            dbname,
            user,
            password,
        })
    }
}

/// Per-shard connection parameters, resolved once at startup.
#[derive(Debug, Clone, Default)]
pub struct ShardTargets {
    targets: BTreeMap<ShardId, ShardTarget>,
}

impl ShardTargets {
    pub fn new(targets: impl IntoIterator<Item = ShardTarget>) -> Self {
        Self {
            targets: targets
                .into_iter()
                .map(|target| (target.shard.clone(), target))
                .collect(),
        }
    }

    /// Resolve a target for every shard `map` can route to.
    ///
    /// A routable shard without connection parameters is a startup failure.
    pub fn resolve(config: &LoaderConfig, map: &ShardMap) -> Result<Self, ConfigError> {
        if map.is_empty() {
            return Err(ConfigError::EmptyShardMap);
        }
        let configs = config.shard_configs();
        let mut targets = BTreeMap::new();
        for shard in map.shard_ids() {
            let shard_config = configs
                .get(shard.as_str())
                .ok_or_else(|| ConfigError::MissingShard(shard.clone()))?;
            let target = ShardTarget::resolve(&shard, shard_config, &config.credentials)?;
            targets.insert(shard, target);
        }
        Ok(Self { targets })
    }

    pub fn get(&self, shard: &ShardId) -> Option<&ShardTarget> {
        self.targets.get(shard)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ShardTarget> {
        self.targets.values()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// CLI overrides that take precedence over file and env config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadOverrides>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}
