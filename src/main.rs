mod api;
mod config;
mod db;
mod error;
mod estimate;
mod ingest;
mod reconcile;
mod source;
mod types;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::config::{Cli, Command, EstimateConfig, ServeConfig};
use crate::db::ListingStore;
use crate::error::Result;
use crate::estimate::OutcomeEstimator;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cli.log_level))
        .init();

    if let Err(e) = run(cli).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let store = ListingStore::connect(&cli.database_url).await?;
    info!("Database ready at {}", cli.database_url);

    match cli.command {
        Command::Ingest(cfg) => {
            let summary = ingest::run(&cfg, store).await?;
            info!(
                files = summary.files,
                applied = summary.applied,
                already_processed = summary.already_processed,
                skipped = summary.skipped,
                "ingest finished"
            );
        }
        Command::Estimate(cfg) => estimate(cfg, store).await?,
        Command::Serve(cfg) => serve(cfg, store).await?,
    }
    Ok(())
}

async fn estimate(cfg: EstimateConfig, store: ListingStore) -> Result<()> {
    let estimator = OutcomeEstimator::new(store);
    let tally = estimator
        .estimate_ended(cfg.force, cfg.limit.unwrap_or(i64::MAX))
        .await?;
    info!(
        won_bid = tally.won_bid,
        won_buyout = tally.won_buyout,
        expired = tally.expired,
        cancelled = tally.cancelled,
        unusable = tally.unusable,
        "Estimated {} listings",
        tally.total(),
    );
    Ok(())
}

async fn serve(cfg: ServeConfig, store: ListingStore) -> Result<()> {
    let app = router(ApiState::new(store));
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;
    Ok(())
}
