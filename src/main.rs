//! bcminer - Main Application
//!
//! Mines one block header with the configured strategy and prints the
//! outcome.

use anyhow::Context;
use bcminer::{
    config::{Config, LogFormat},
    utils::{format_hash_rate, range_progress},
    BlockHeader, Miner, MinerFactory, Outcome, APP_NAME, APP_VERSION,
};
use std::sync::Arc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load().await.context("Failed to load configuration")?;
    init_tracing(&config);

    if config.print_config {
        print_configuration(&config)?;
        return Ok(());
    }

    info!("Starting {} v{}", APP_NAME, APP_VERSION);
    info!(
        "Configuration: miner={}, threads={}, grid_size={}",
        config.miner, config.threads, config.grid_size
    );

    let header = config
        .load_header()
        .await
        .context("Failed to load block header")?;
    let miner = MinerFactory::create(config.miner, config.threads)
        .context("Failed to create miner")?;

    let outcome = mine(Arc::clone(&miner), header.clone(), &config).await?;
    print_outcome(&header, &outcome);
    Ok(())
}

/// Install the tracing subscriber. `RUST_LOG` overrides `--log-level`.
fn init_tracing(config: &Config) {
    let level = tracing::Level::from(config.log_level);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string().to_lowercase()));

    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Plain => registry.with(fmt::layer().with_target(false)).init(),
        LogFormat::Json => registry.with(fmt::layer().json().with_target(false)).init(),
    }
}

/// Run one search with progress reporting and Ctrl-C cancellation
async fn mine(
    miner: Arc<dyn Miner>,
    header: BlockHeader,
    config: &Config,
) -> anyhow::Result<Outcome> {
    let start_nonce = header.nonce();
    let report_every = config.report_interval()?;

    miner.configure(header)?;
    miner
        .start(config.parallelism())
        .await
        .with_context(|| format!("Failed to start {} miner", miner.miner_type()))?;

    let reporter = {
        let miner = Arc::clone(&miner);
        tokio::spawn(async move {
            let mut ticker = interval(report_every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !miner.is_running() {
                    break;
                }
                let stats = miner.stats();
                info!(
                    "Progress: {} hashes, {}, {:.4}% of range",
                    stats.total_hashes,
                    format_hash_rate(stats.average_hash_rate),
                    range_progress(start_nonce, stats.total_hashes)
                );
            }
        })
    };

    let outcome = tokio::select! {
        outcome = miner.await_result() => outcome?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling search");
            miner.cancel().await?
        }
    };

    reporter.abort();
    info!("Finished: {}", miner.stats());
    Ok(outcome)
}

/// Print the search outcome
fn print_outcome(header: &BlockHeader, outcome: &Outcome) {
    match outcome {
        Outcome::Matched(result) => {
            let mut solved = header.clone();
            solved.set_nonce(result.nonce);
            println!("nonce:      {:#010x} ({})", result.nonce, result.nonce);
            println!("hash:       {}", result.hash_hex());
            println!("block hash: {}", result.block_hash_hex());
            println!("header:     {}", solved);
        }
        Outcome::Exhausted => println!(
            "exhausted: no nonce from {:#010x} meets the target",
            header.nonce()
        ),
        Outcome::Cancelled => println!("cancelled"),
    }
}

/// Print current configuration
fn print_configuration(config: &Config) -> anyhow::Result<()> {
    let config_yaml = serde_yaml::to_string(config)?;
    println!("{}", config_yaml);
    Ok(())
}
