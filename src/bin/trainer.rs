use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tourrec::catalog::{CatalogSnapshot, InMemoryCatalog};
use tourrec::{init_tracing, Config, EngineState};
use tracing::info;

/// Offline training job: loads an exported catalog snapshot, rebuilds every
/// derived table, and prints the run report.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    /// JSON catalog snapshot to train against.
    #[arg(short, long)]
    snapshot: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Override the configured latent factor count.
    #[arg(long)]
    factors: Option<usize>,

    /// Override the configured SGD epoch count.
    #[arg(long)]
    iterations: Option<usize>,

    /// Override the configured SGD learning rate.
    #[arg(long)]
    learning_rate: Option<f32>,

    /// Override the configured L2 regularization.
    #[arg(long)]
    regularization: Option<f32>,

    /// Override the configured list length for refreshed caches.
    #[arg(long)]
    top_k: Option<usize>,

    /// Override the RNG seed for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    let mut config = if std::path::Path::new(&args.config).exists() {
        Config::from_file(&args.config)?
    } else {
        info!("config file not found, using defaults");
        Config::default()
    };

    if let Some(factors) = args.factors {
        config.training.factors = factors;
    }
    if let Some(iterations) = args.iterations {
        config.training.iterations = iterations;
    }
    if let Some(learning_rate) = args.learning_rate {
        config.training.learning_rate = learning_rate;
    }
    if let Some(regularization) = args.regularization {
        config.training.regularization = regularization;
    }
    if let Some(top_k) = args.top_k {
        config.training.top_k = top_k;
    }
    if let Some(seed) = args.seed {
        config.training.seed = seed;
    }

    info!(training = ?config.training, "trainer configuration loaded");

    let raw = std::fs::read_to_string(&args.snapshot)
        .with_context(|| format!("reading snapshot {}", args.snapshot))?;
    let snapshot: CatalogSnapshot =
        serde_json::from_str(&raw).with_context(|| format!("parsing snapshot {}", args.snapshot))?;
    info!(
        tours = snapshot.tours.len(),
        analytics = snapshot.analytics.len(),
        bookings = snapshot.bookings.len(),
        "snapshot loaded"
    );

    let catalog = Arc::new(InMemoryCatalog::from_snapshot(snapshot).await);
    let state = EngineState::new(catalog, config);

    let report = state.training_service.run().await?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
