//! Row types matching `migrations/0001_init.sql`.
//! Timestamps are UTC epoch milliseconds.

use serde::Serialize;

use crate::types::{Outcome, TimeLeft};

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ListingRow {
    pub id: i64,
    pub auc_id: i64,
    pub owner: Option<String>,
    pub owner_realm: String,
    pub item_id: i64,
    pub quantity: i64,
    pub buyout: Option<i64>,
    pub rand: i64,
    pub seed: i64,
    pub context: i64,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub created_at: i64,
    pub est_ended_at: Option<i64>,
    pub est_outcome: Option<String>,
}

impl ListingRow {
    pub fn cached_outcome(&self) -> Option<Outcome> {
        self.est_outcome.as_deref().and_then(Outcome::parse)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct SnapshotRow {
    pub id: i64,
    pub listing_id: i64,
    pub timestamp: i64,
    pub bid: i64,
    pub time_left: String,
}

impl SnapshotRow {
    pub fn time_left(&self) -> Option<TimeLeft> {
        TimeLeft::parse(&self.time_left)
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct AttributeRow {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ImportRecordRow {
    pub id: i64,
    pub timestamp: i64,
    pub realm_key: String,
    pub content_hash: String,
    pub created_at: i64,
}

/// A competing listing for the same item, with its last bid at or before
/// the reference instant.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct SiblingRow {
    pub quantity: i64,
    pub buyout: Option<i64>,
    pub started_at: i64,
    pub ended_at: Option<i64>,
    pub bid_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCounts {
    pub listings: i64,
    pub snapshots: i64,
    pub attributes: i64,
    pub imports: i64,
}
