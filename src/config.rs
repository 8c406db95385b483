use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

pub const MINUTE_MS: i64 = 60 * 1_000;
pub const HOUR_MS: i64 = 60 * MINUTE_MS;
pub const DAY_MS: i64 = 24 * HOUR_MS;

/// Rows per statement chunk inside a phase transaction.
pub const DEFAULT_BATCH_SIZE: usize = 50;

/// Lookback for active-set and listing-match queries, in days.
pub const DEFAULT_DAY_BUFFER: i64 = 7;

/// Largest accepted lookback window, in days.
pub const MAX_DAY_BUFFER: i64 = 3_650;

/// Dumps decoded ahead of the engine. Bounded so a slow store does not let
/// decompressed snapshots pile up in memory.
pub const PREFETCH_DEPTH: usize = 2;

/// Upper bound of each time-left bucket as reported by the auction house.
pub mod time_left_ceilings {
    use super::{HOUR_MS, MINUTE_MS};

    pub const SHORT_MS: i64 = 30 * MINUTE_MS;
    pub const MEDIUM_MS: i64 = 2 * HOUR_MS;
    pub const LONG_MS: i64 = 12 * HOUR_MS;
    pub const VERY_LONG_MS: i64 = 48 * HOUR_MS;
}

/// Real time assumed to elapse per observed snapshot of a listing.
pub const SAMPLING_INTERVAL_MS: i64 = HOUR_MS;

/// Countdown extension credited for each observed bid change.
pub const REBID_PENALTY_MS: i64 = 5 * MINUTE_MS;

/// Owner value the dumps use for anonymized sellers.
pub const ANONYMOUS_OWNER: &str = "???";

#[derive(Debug, Parser)]
#[command(name = "auction-ledger", about = "Auction house snapshot ledger")]
pub struct Cli {
    /// Store connection string.
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite:auctions.db", global = true)]
    pub database_url: String,

    /// tracing EnvFilter directive.
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reconcile every dump in a directory against the store.
    Ingest(IngestConfig),
    /// Classify ended listings that have no cached outcome yet.
    Estimate(EstimateConfig),
    /// Serve the read-only listing API.
    Serve(ServeConfig),
}

#[derive(Debug, Clone, Args)]
pub struct IngestConfig {
    /// Directory holding `<prefix>-<ms>-<hash>.json[.bz2]` dumps.
    #[arg(env = "DATA_DIR")]
    pub data_dir: PathBuf,

    #[arg(long, env = "BATCH_SIZE", default_value_t = DEFAULT_BATCH_SIZE)]
    pub batch_size: usize,

    /// Lookback window in days for active-set queries.
    #[arg(
        long,
        env = "DAY_BUFFER",
        default_value_t = DEFAULT_DAY_BUFFER,
        value_parser = clap::value_parser!(i64).range(1..=MAX_DAY_BUFFER)
    )]
    pub day_buffer: i64,

    /// Ignore dumps stamped before this epoch (ms).
    #[arg(long, env = "SKIP_BEFORE")]
    pub skip_before: Option<i64>,

    /// Log a summary line for every applied snapshot.
    #[arg(long, env = "PROGRESS", default_value_t = false)]
    pub progress: bool,
}

#[derive(Debug, Clone, Args)]
pub struct EstimateConfig {
    /// Recompute outcomes that are already cached.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Stop after this many listings.
    #[arg(long)]
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Args)]
pub struct ServeConfig {
    #[arg(long, env = "API_PORT", default_value_t = 3000)]
    pub api_port: u16,
}

/// Engine tuning shared by ingest and tests.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub window_ms: i64,
}

impl EngineConfig {
    pub fn new(batch_size: usize, day_buffer: i64) -> Self {
        Self {
            batch_size: batch_size.max(1),
            window_ms: day_buffer.clamp(1, MAX_DAY_BUFFER) * DAY_MS,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BATCH_SIZE, DEFAULT_DAY_BUFFER)
    }
}

impl From<&IngestConfig> for EngineConfig {
    fn from(cfg: &IngestConfig) -> Self {
        Self::new(cfg.batch_size, cfg.day_buffer)
    }
}
