use std::cmp::Ordering;

use crate::config::{time_left_ceilings, REBID_PENALTY_MS, SAMPLING_INTERVAL_MS};
use crate::db::models::SnapshotRow;
use crate::types::{Outcome, TimeLeft};

/// A price normalized by quantity. Compared by cross-multiplication so
/// `20/4 == 10/2` without floating point.
#[derive(Debug, Clone, Copy)]
pub struct PerUnit {
    pub total: i64,
    pub quantity: i64,
}

impl PerUnit {
    pub fn new(total: i64, quantity: i64) -> Self {
        Self { total, quantity: quantity.max(1) }
    }
}

impl PartialEq for PerUnit {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for PerUnit {}

impl PartialOrd for PerUnit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PerUnit {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = i128::from(self.total) * i128::from(other.quantity);
        let rhs = i128::from(other.total) * i128::from(self.quantity);
        lhs.cmp(&rhs)
    }
}

/// What the snapshots of one listing say on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observations {
    pub first_bid: i64,
    pub max_bid: i64,
    pub last_bid: i64,
    pub last_time_left: TimeLeft,
    /// Timestamp of the final snapshot.
    pub last_seen: i64,
    pub sample_count: i64,
    /// Adjacent snapshot pairs whose bid differs.
    pub bid_changes: i64,
}

/// Summarize snapshots sorted oldest first. `None` when there are none or the
/// last one carries an unknown bucket.
pub fn observe(snapshots: &[SnapshotRow]) -> Option<Observations> {
    let first = snapshots.first()?;
    let last = snapshots.last()?;
    Some(Observations {
        first_bid: first.bid,
        max_bid: snapshots.iter().map(|s| s.bid).max()?,
        last_bid: last.bid,
        last_time_left: last.time_left()?,
        last_seen: last.timestamp,
        sample_count: snapshots.len() as i64,
        bid_changes: snapshots.windows(2).filter(|w| w[0].bid != w[1].bid).count() as i64,
    })
}

/// Estimated true expiry: the last bucket's ceiling, less the real time the
/// samples account for, plus the countdown credited back by each rebid.
pub fn estimate_ended_at(started_at: i64, obs: &Observations) -> i64 {
    started_at + (obs.last_time_left.ceiling_ms() - obs.sample_count * SAMPLING_INTERVAL_MS)
        + obs.bid_changes * REBID_PENALTY_MS
}

/// A competing listing's price and end time, as seen by [`was_lowest`].
#[derive(Debug, Clone, Copy)]
pub struct Competitor {
    pub price: PerUnit,
    pub ended_at: Option<i64>,
}

/// True when `own` is the cheapest, or every strictly cheaper competitor
/// vanished at exactly `own_ended_at` (same sample, so treated as a tie).
pub fn was_lowest(own: PerUnit, own_ended_at: i64, competitors: &[Competitor]) -> bool {
    competitors
        .iter()
        .filter(|c| c.price < own)
        .all(|c| c.ended_at == Some(own_ended_at))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signals {
    /// Last observed bucket was MEDIUM or shorter.
    pub time_expired: bool,
    pub had_bids: bool,
    pub was_bid_only: bool,
    pub was_lowest_bid: bool,
    pub was_lowest_buyout: bool,
    /// Observed `ended_at - started_at`.
    pub runtime_ms: i64,
}

impl Signals {
    pub fn time_expired(last: TimeLeft) -> bool {
        last <= TimeLeft::Medium
    }
}

/// Best-effort outcome from the signals. Coarse sampling makes some
/// misclassification unavoidable.
pub fn classify(s: &Signals) -> Outcome {
    if s.time_expired {
        if s.had_bids || (s.was_lowest_bid && s.runtime_ms > time_left_ceilings::LONG_MS) {
            Outcome::WonBid
        } else {
            Outcome::Expired
        }
    } else if !s.was_bid_only && s.was_lowest_buyout {
        Outcome::WonBuyout
    } else {
        Outcome::Cancelled
    }
}
