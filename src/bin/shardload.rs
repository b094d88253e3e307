use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{bail, Context};
use shardload_rs::config::{ConfigOverrides, LoadOverrides, LoaderConfig};
use shardload_rs::{
    read_listings, LoadCoordinator, MemoryCluster, Partitioned, PgConnector, RecordPartitioner,
    RunSummary, ShardConnector, ShardId, ShardTargets,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn has_flag(flag: &str) -> bool {
    std::env::args().any(|arg| arg == flag)
}

fn print_help() {
    eprintln!(
        r#"shardload - route listings to neighbourhood shards and bulk-load them

USAGE:
    shardload [OPTIONS]

OPTIONS:
    -c, --config <FILE>       Path to config file (TOML)
    -i, --input <FILE>        Cleaned listings CSV
        --concurrency <N>     Shards loaded at once [default: 1]
        --max-retries <N>     Retries per failed shard [default: 0]
        --only <IDS>          Load only these shards (comma-separated)
        --dry-run             Load into in-memory shards instead of PostgreSQL
        --json                Print the run summary as JSON
        --log-file <FILE>     Write logs to a file instead of stderr
    -h, --help                Print help

ENVIRONMENT:
    SHARDLOAD_CONFIG                    Path to config file
    SHARDLOAD_INPUT                     Listings CSV
    SHARDLOAD_CREDENTIALS__USER         User shared by all shards
    SHARDLOAD_CREDENTIALS__PASSWORD     Password shared by all shards
    SHARDLOAD_SHARDS__<ID>__PORT        Port of one shard
    POSTGRES_USER, POSTGRES_PASSWORD    Compose credentials (below SHARDLOAD_*)
    PG_SHARD<N>_PORT                    Compose port of shard<N>
    RUST_LOG                            Log filter [default: info]

CONFIG FILE (shardload.toml):
    input = "data/cleaned_airbnb_listings.csv"

    [shard_map]
    "Camden" = "shard1"

    [shards.shard1]
    host = "localhost"
    port = 5433
"#
    );
}

fn init_logging(log_file: Option<String>) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if let Some(path) = log_file {
        let file = std::fs::File::create(&path)
            .with_context(|| format!("cannot create log file {path}"))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn parse_only(value: Option<String>) -> Option<BTreeSet<ShardId>> {
    value.map(|list| {
        list.split(',')
            .map(str::trim)
            .filter(|shard| !shard.is_empty())
            .map(ShardId::from)
            .collect()
    })
}

async fn load_with<C: ShardConnector>(
    connector: C,
    config: &LoaderConfig,
    targets: ShardTargets,
    partitioned: Partitioned,
) -> RunSummary {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, rolling back in-flight shard loads");
            on_signal.cancel();
        }
    });

    let coordinator = LoadCoordinator::new(connector, targets, config.load.options());
    coordinator.load(partitioned, &cancel).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if has_flag("-h") || has_flag("--help") {
        print_help();
        return Ok(());
    }

    init_logging(parse_arg("--log-file"))?;

    // Build CLI overrides
    let mut overrides = ConfigOverrides::default();
    let mut load_overrides = LoadOverrides::default();

    if let Some(input) = parse_arg("--input").or_else(|| parse_arg("-i")) {
        overrides.input = Some(PathBuf::from(input));
    }
    if let Some(concurrency) = parse_arg("--concurrency") {
        load_overrides.concurrency = Some(concurrency.parse().context("--concurrency")?);
    }
    if let Some(retries) = parse_arg("--max-retries") {
        load_overrides.max_retries = Some(retries.parse().context("--max-retries")?);
    }
    if load_overrides.concurrency.is_some() || load_overrides.max_retries.is_some() {
        overrides.load = Some(load_overrides);
    }

    // Load config: CLI > Env > File > Defaults
    let config_path = parse_arg("--config")
        .or_else(|| parse_arg("-c"))
        .or_else(|| std::env::var("SHARDLOAD_CONFIG").ok());
    let config = LoaderConfig::load(config_path.as_deref(), overrides)?;

    // Every routable shard must be configured before any load begins
    let shard_map = config.shard_map();
    let targets = ShardTargets::resolve(&config, &shard_map)?;

    let Some(input) = config.input.clone() else {
        bail!("no input dataset: pass --input or set `input` in the config file");
    };
    let (listings, source_stats) = read_listings(&input)
        .with_context(|| format!("cannot read listings from {}", input.display()))?;
    tracing::info!(
        rows = source_stats.rows_read,
        rejected = source_stats.rows_rejected,
        coerced = source_stats.values_coerced_to_null,
        "Read input dataset"
    );

    let mut partitioned = RecordPartitioner::new(&shard_map).partition(listings);
    if let Some(only) = parse_only(parse_arg("--only")) {
        let unknown: Vec<&str> = only
            .iter()
            .filter(|shard| targets.get(shard).is_none())
            .map(ShardId::as_str)
            .collect();
        if !unknown.is_empty() {
            bail!("--only names unknown shards: {}", unknown.join(","));
        }
        partitioned.retain_shards(&only);
    }
    let stats = partitioned.stats();
    tracing::info!(
        routed = stats.routed,
        unrouted = stats.unrouted,
        excluded = stats.excluded,
        per_shard = ?stats.per_shard,
        "Partitioned input"
    );

    let summary = if has_flag("--dry-run") {
        let cluster = MemoryCluster::new().with_chunk_rows(config.load.chunk_rows);
        load_with(cluster, &config, targets, partitioned).await
    } else {
        let connector = PgConnector::new(config.load.connect_timeout(), config.load.chunk_rows);
        load_with(connector, &config, targets, partitioned).await
    };

    if has_flag("--json") {
        println!("{}", summary.to_json()?);
    } else {
        println!("{summary}");
    }

    if !summary.is_success() {
        let failed: Vec<&str> = summary.failed_shards().iter().map(|s| s.as_str()).collect();
        bail!("{} shard(s) failed: {}", failed.len(), failed.join(","));
    }
    Ok(())
}
