//! Exchequer Simulator
//!
//! Drives the exchange through concurrency, expiry and pagination scenarios.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod client;
mod controller;
mod metrics;
mod scenario;

use controller::SimulationController;
use exchequer_exchange::{Exchange, ExchangeConfig};
use exchequer_fx::{InMemoryOfferCache, RateTableProvider};
use exchequer_ledger::InMemoryLedger;
use scenario::Scenario;

/// Exchequer Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "Exchequer exchange simulation environment")]
struct Args {
    /// Number of simulated clients to create
    #[arg(short, long, default_value = "3")]
    clients: usize,

    /// Built-in scenario to run
    #[arg(short, long, conflicts_with = "scenario_file")]
    scenario: Option<String>,

    /// Scenario to run from a JSON file
    #[arg(long)]
    scenario_file: Option<PathBuf>,

    /// Simulation speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Run duration in seconds (0 = until Ctrl+C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Lifetime of simulated offers in seconds
    #[arg(long, default_value = "5")]
    offer_ttl_secs: u64,

    /// Post to PostgreSQL at DATABASE_URL instead of the in-memory ledger
    #[arg(long)]
    postgres: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ExchangeConfig::from_env();

    let filter = EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone()));
    if args.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!(clients = args.clients, speed = args.speed, "Starting Exchequer Simulator");

    if config.token_secret.is_empty() {
        config.token_secret = "exchequer-simulator".to_string();
    }
    let ttl = Duration::from_secs(args.offer_ttl_secs);
    config.offers.fiat_ttl = ttl;
    config.offers.crypto_ttl = ttl;

    let quotes = Arc::new(RateTableProvider::new("simulated-rates"));
    let cache = Arc::new(InMemoryOfferCache::new());

    let exchange = if args.postgres {
        info!("Using PostgreSQL ledger");
        Exchange::connect_postgres(config, quotes.clone(), cache.clone())
            .await
            .context("connecting to the PostgreSQL ledger")?
    } else {
        let ledger = InMemoryLedger::with_lock_wait(config.timeouts.lock_wait);
        Exchange::new(config, quotes.clone(), cache.clone(), Arc::new(ledger))?
    };
    let exchange = Arc::new(exchange);

    let mut controller = SimulationController::new(
        exchange.clone(),
        quotes,
        cache,
        args.clients,
        args.speed,
        args.seed,
    );
    controller.initialize().await?;

    let scenario = match (&args.scenario, &args.scenario_file) {
        (Some(name), _) => Some(Scenario::load(name)?),
        (None, Some(path)) => Some(Scenario::from_file(path)?),
        (None, None) => None,
    };

    if let Some(scenario) = scenario {
        controller.run_scenario(scenario).await?;
    } else {
        info!("Running in continuous mode, press Ctrl+C to stop");

        let duration = if args.duration > 0 {
            Some(Duration::from_secs(args.duration))
        } else {
            None
        };

        controller.run(duration).await?;
    }

    let metrics = controller.metrics().await;
    info!(
        redemptions = metrics.total_redemptions,
        settled = metrics.settled,
        missed = metrics.missed,
        refused = metrics.refused,
        retryable = metrics.retryable,
        failed = metrics.failed,
        success_rate = metrics.success_rate(),
        avg_latency_ms = metrics.average_latency_ms(),
        p99_latency_ms = metrics.p99_latency_ms(),
        "Simulation complete"
    );
    println!("{}", exchange.metrics().to_prometheus());

    Ok(())
}
