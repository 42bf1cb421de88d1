use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use strata_cache::{CacheConfig, CacheWarmer, LogFormat, LoggingConfig};
use tracing::{debug, info, warn};

#[derive(Parser, Debug)]
#[command(name = "strata-cache")]
#[command(about = "Strata - multi-tier cache host process", long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&logging.level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => CacheConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => CacheConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    init_tracing(&config.logging);

    info!("Starting Strata cache v{}", env!("CARGO_PKG_VERSION"));

    let stack = config.build().context("building cache tiers")?;

    let sweeper = config
        .local
        .sweep_interval_ms
        .map(|ms| stack.local.start_expiry_sweeper(Duration::from_millis(ms)));

    let reporter = stack.manager.start_stats_reporter(config.stats_interval());

    let strategies = config.warming_strategies();
    let warmer = CacheWarmer::new(stack.manager.clone());
    if !strategies.is_empty() {
        let report = warmer.run(&strategies).await;
        info!(
            "Initial warming stored {} entries ({} strategies failed)",
            report.total_stored(),
            report.failed().count()
        );
    }
    let periodic_warmer = match config.warming_interval() {
        Some(interval) if !strategies.is_empty() => Some(warmer.spawn_periodic(strategies, interval)),
        _ => None,
    };

    info!("Cache ready, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;

    info!("Shutting down");
    if let Some(task) = periodic_warmer {
        task.stop().await;
    }
    reporter.stop().await;
    if let Some(task) = sweeper {
        task.stop().await;
    }

    let stats = stack.manager.stats();
    info!(
        "Final hit ratio {:.2}% over {} requests",
        stats.hit_ratio * 100.0,
        stats.requests
    );
    match strata_cache::metrics::encode_metrics() {
        Ok(text) => debug!("Final metrics:\n{}", text),
        Err(e) => warn!("Failed to encode metrics: {}", e),
    }

    Ok(())
}
