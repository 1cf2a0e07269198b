use anyhow::Context;
use clap::Parser;
use comps_engine::config::Settings;
use comps_engine::models::{ComparablesOptions, ComparablesResult, Strategy};
use comps_engine::{ComparablesEngine, EngineConfig, MemoryStore, PostgresStore, PropertyStore, ResultCache};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Find and rank comparable properties for one subject account
#[derive(Parser, Debug)]
#[command(name = "comps-engine")]
#[command(about = "Comparable property search and pricing summary", long_about = None)]
struct Args {
    /// Subject account identifier
    account: String,

    /// Stop relaxing once this many comparables are admitted
    #[arg(long)]
    min_comps: Option<usize>,

    /// Number of ranked comparables to return
    #[arg(long)]
    max_comps: Option<usize>,

    /// Value source: equity (market value) or sales (sale price)
    #[arg(long, default_value = "equity")]
    strategy: Strategy,

    /// Drop radius tiers wider than this many miles
    #[arg(long)]
    max_radius: Option<f64>,

    /// Settings file (defaults to config/default + config/local)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Read the candidate pool from a JSON array instead of PostgreSQL
    #[arg(long)]
    pool: Option<PathBuf>,

    /// Print flat export rows instead of the full result
    #[arg(long)]
    rows: bool,
}

fn init_logging(level: &str, format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

async fn run<S: PropertyStore>(
    store: Arc<S>,
    config: EngineConfig,
    cache: Option<Arc<ResultCache>>,
    args: &Args,
) -> anyhow::Result<ComparablesResult> {
    let mut engine = ComparablesEngine::new(store, config);
    if let Some(cache) = cache {
        engine = engine.with_cache(cache);
    }

    let mut options = ComparablesOptions::default().with_strategy(args.strategy);
    options.min_comps = args.min_comps;
    options.max_comps = args.max_comps;
    options.max_radius_miles = args.max_radius;

    Ok(engine.get_comparables(&args.account, &options).await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .context("Failed to load configuration")?;

    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| settings.logging.level.clone());
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| settings.logging.format.clone());
    init_logging(&log_level, &log_format);

    info!("Starting comps-engine v{}", env!("CARGO_PKG_VERSION"));

    let config = EngineConfig::from_settings(&settings.matching, &settings.scoring)
        .context("Invalid matching configuration")?;

    let cache_ttl = settings.cache.ttl_secs.unwrap_or(3600);
    let l1_cache_size = settings.cache.l1_cache_size.unwrap_or(50);
    let cache = if !settings.cache.enabled {
        None
    } else if let Some(redis_url) = &settings.cache.redis_url {
        match ResultCache::with_redis(redis_url, l1_cache_size, cache_ttl).await {
            Ok(c) => {
                info!("Result cache initialized (L1: {} entries, L2: Redis, TTL: {}s)", l1_cache_size, cache_ttl);
                Some(Arc::new(c))
            }
            Err(e) => {
                warn!("Failed to connect to Redis ({}), using in-process cache only", e);
                Some(Arc::new(ResultCache::in_memory(l1_cache_size, cache_ttl)))
            }
        }
    } else {
        Some(Arc::new(ResultCache::in_memory(l1_cache_size, cache_ttl)))
    };

    let result = match &args.pool {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read pool file {}", path.display()))?;
            let store = MemoryStore::from_json(&raw).context("Failed to parse pool file")?;
            info!("Loaded {} properties from {}", store.len().await, path.display());
            run(Arc::new(store), config, cache, &args).await?
        }
        None => {
            let store = PostgresStore::from_settings(&settings.database)
                .await
                .context("Failed to connect to PostgreSQL")?;
            run(Arc::new(store), config, cache, &args).await?
        }
    };

    if result.insufficient() {
        warn!(
            "Only {} comparables found (wanted at least {})",
            result.len(),
            result.search.parameters.min_comps
        );
    }

    let json = if args.rows {
        serde_json::to_string_pretty(&result.export_rows())?
    } else {
        serde_json::to_string_pretty(&result)?
    };
    println!("{}", json);

    Ok(())
}
