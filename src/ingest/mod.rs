//! Ingest run: walk a dump directory in timestamp order and feed every
//! snapshot through the reconciler.

pub mod latency;

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::config::{EngineConfig, IngestConfig};
use crate::db::ListingStore;
use crate::error::Result;
use crate::reconcile::{ProcessOutcome, Reconciler};
use crate::source::{collect_dumps, spawn_reader};
use crate::types::fmt_ms;

use latency::ApplyLatency;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub files: usize,
    pub applied: usize,
    pub already_processed: usize,
    pub skipped: usize,
}

/// Process every dump under `cfg.data_dir`. Unreadable dumps are skipped with
/// a warning; a store error aborts the run and leaves that snapshot unmarked.
pub async fn run(cfg: &IngestConfig, store: ListingStore) -> Result<IngestSummary> {
    let files = collect_dumps(&cfg.data_dir, cfg.skip_before)?;
    info!(
        files = files.len(),
        dir = %cfg.data_dir.display(),
        skip_before = ?cfg.skip_before,
        "starting ingest"
    );

    let engine = Reconciler::new(store, EngineConfig::from(cfg));
    let mut summary = IngestSummary {
        files: files.len(),
        ..IngestSummary::default()
    };
    let mut latency = ApplyLatency::new();
    let mut rx = spawn_reader(files);

    while let Some((file, decoded)) = rx.recv().await {
        let snapshot = match decoded {
            Ok(s) => s,
            Err(e) => {
                warn!(path = %file.path.display(), "skipping unreadable dump: {e}");
                summary.skipped += 1;
                continue;
            }
        };

        let started = Instant::now();
        match engine.process_snapshot(&snapshot).await? {
            ProcessOutcome::AlreadyProcessed => {
                summary.already_processed += 1;
                debug!(path = %file.path.display(), "dump already imported");
            }
            ProcessOutcome::Applied(stats) => {
                let elapsed = started.elapsed();
                latency.record(elapsed);
                summary.applied += 1;
                if cfg.progress {
                    info!(
                        timestamp = snapshot.timestamp,
                        listings = snapshot.listings.len(),
                        active = stats.active,
                        ended = stats.ended,
                        new = stats.new,
                        continuing = stats.continuing,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "[{}/{}] {}",
                        summary.applied + summary.already_processed + summary.skipped,
                        summary.files,
                        fmt_ms(snapshot.timestamp),
                    );
                } else {
                    debug!(
                        timestamp = snapshot.timestamp,
                        ended = stats.ended,
                        new = stats.new,
                        continuing = stats.continuing,
                        "snapshot applied"
                    );
                }
            }
        }
    }

    match latency.percentiles() {
        Some((p50, p95, p99)) => info!(
            applied = summary.applied,
            already_processed = summary.already_processed,
            skipped = summary.skipped,
            "Ingest complete | apply latency p50={p50}ms p95={p95}ms p99={p99}ms over {} snapshots",
            latency.len(),
        ),
        None => info!(
            applied = summary.applied,
            already_processed = summary.already_processed,
            skipped = summary.skipped,
            "Ingest complete | nothing applied"
        ),
    }

    Ok(summary)
}
