//! Snapshot reconciliation: diff each dump against the open listings in the
//! store and apply ended / new / continuing in separate phase transactions.
//!
//! Callers must feed snapshots in non-decreasing timestamp order and never run
//! two `process_snapshot` calls against the same store at once.

use std::collections::HashSet;

use tracing::debug;

use crate::config::EngineConfig;
use crate::db::ListingStore;
use crate::error::Result;
use crate::types::{fmt_ms, AuctionSnapshot, IncomingListing};

/// How one snapshot's incoming listings split against the active set.
#[derive(Debug)]
pub struct Partition<'a> {
    /// Active ids missing from the snapshot, ascending.
    pub ended: Vec<i64>,
    pub new: Vec<&'a IncomingListing>,
    pub continuing: Vec<&'a IncomingListing>,
}

/// Split `incoming` against `active`. The three sets are disjoint and
/// `ended ∪ ids(continuing) == active`.
pub fn partition<'a>(active: &HashSet<i64>, incoming: &'a [IncomingListing]) -> Partition<'a> {
    let incoming_ids: HashSet<i64> = incoming.iter().map(|l| l.auc_id).collect();

    let mut ended: Vec<i64> = active.difference(&incoming_ids).copied().collect();
    ended.sort_unstable();

    let (continuing, new): (Vec<_>, Vec<_>) =
        incoming.iter().partition(|l| active.contains(&l.auc_id));

    Partition {
        ended,
        new,
        continuing,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub active: usize,
    pub ended: u64,
    pub new: u64,
    pub continuing: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    Applied(ApplyStats),
    /// An import record already exists for this timestamp; nothing was written.
    AlreadyProcessed,
}

pub struct Reconciler {
    store: ListingStore,
    cfg: EngineConfig,
}

impl Reconciler {
    pub fn new(store: ListingStore, cfg: EngineConfig) -> Self {
        Self { store, cfg }
    }

    pub async fn process_snapshot(&self, snapshot: &AuctionSnapshot) -> Result<ProcessOutcome> {
        let ts = snapshot.timestamp;

        if self.store.import_exists(ts).await? {
            debug!(timestamp = ts, "snapshot already imported");
            return Ok(ProcessOutcome::AlreadyProcessed);
        }

        let active = self.store.active_auc_ids(ts, self.cfg.window_ms).await?;
        let parts = partition(&active, &snapshot.listings);
        debug!(
            timestamp = ts,
            active = active.len(),
            ended = parts.ended.len(),
            new = parts.new.len(),
            continuing = parts.continuing.len(),
            "snapshot partitioned"
        );

        let ended = self
            .store
            .apply_ended(&parts.ended, ts, self.cfg.window_ms, self.cfg.batch_size)
            .await?;
        let new = self
            .store
            .apply_new(&parts.new, ts, self.cfg.batch_size)
            .await?;
        let continuing = self
            .store
            .apply_continuing(&parts.continuing, ts, self.cfg.window_ms, self.cfg.batch_size)
            .await?;

        self.store
            .insert_import(ts, &snapshot.realm_key, &snapshot.content_hash)
            .await?;

        let stats = ApplyStats {
            active: active.len(),
            ended,
            new,
            continuing,
        };
        debug!(
            timestamp = ts,
            realms = %snapshot.realm_key,
            ended,
            new,
            continuing,
            "applied snapshot {}",
            fmt_ms(ts),
        );
        Ok(ProcessOutcome::Applied(stats))
    }
}
