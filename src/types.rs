use serde::{Deserialize, Serialize};

use crate::config::time_left_ceilings;

// ---------------------------------------------------------------------------
// Time-left bucket
// ---------------------------------------------------------------------------

/// Coarse remaining-time bucket reported for each auction.
/// Variant order is ascending by remaining time, so `<=` comparisons read naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeLeft {
    Short,
    Medium,
    Long,
    VeryLong,
}

impl TimeLeft {
    /// Upper bound of the bucket in milliseconds.
    pub fn ceiling_ms(self) -> i64 {
        match self {
            TimeLeft::Short => time_left_ceilings::SHORT_MS,
            TimeLeft::Medium => time_left_ceilings::MEDIUM_MS,
            TimeLeft::Long => time_left_ceilings::LONG_MS,
            TimeLeft::VeryLong => time_left_ceilings::VERY_LONG_MS,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TimeLeft::Short => "SHORT",
            TimeLeft::Medium => "MEDIUM",
            TimeLeft::Long => "LONG",
            TimeLeft::VeryLong => "VERY_LONG",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SHORT" => Some(TimeLeft::Short),
            "MEDIUM" => Some(TimeLeft::Medium),
            "LONG" => Some(TimeLeft::Long),
            "VERY_LONG" => Some(TimeLeft::VeryLong),
            _ => None,
        }
    }
}

impl std::fmt::Display for TimeLeft {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Estimated outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    /// Sold to the highest bidder when the timer ran out.
    WonBid,
    /// Bought outright before expiry.
    WonBuyout,
    /// Ran out with no buyer.
    Expired,
    /// Pulled by the seller.
    Cancelled,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::WonBid => "WON_BID",
            Outcome::WonBuyout => "WON_BUYOUT",
            Outcome::Expired => "EXPIRED",
            Outcome::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WON_BID" => Some(Outcome::WonBid),
            "WON_BUYOUT" => Some(Outcome::WonBuyout),
            "EXPIRED" => Some(Outcome::Expired),
            "CANCELLED" => Some(Outcome::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Normalized snapshot contract (source -> engine)
// ---------------------------------------------------------------------------

/// Flattened extra metadata carried alongside a new listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attribute {
    pub key: String,
    pub value: String,
}

impl Attribute {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One cleaned auction record from a dump.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingListing {
    pub auc_id: i64,
    /// `None` for anonymized sellers.
    pub owner: Option<String>,
    /// Realm slug when the dump's realm table knows the name, else the raw name.
    pub owner_realm: String,
    pub item_id: i64,
    pub quantity: i64,
    /// `None` for bid-only auctions.
    pub buyout: Option<i64>,
    pub bid: i64,
    pub time_left: TimeLeft,
    pub rand: i64,
    pub seed: i64,
    pub context: i64,
    pub attributes: Vec<Attribute>,
}

/// One full dump, ready for reconciliation.
#[derive(Debug, Clone)]
pub struct AuctionSnapshot {
    /// Epoch milliseconds parsed from the dump file name.
    pub timestamp: i64,
    /// Sorted realm slugs joined with `,`.
    pub realm_key: String,
    pub content_hash: String,
    pub listings: Vec<IncomingListing>,
}

/// Milliseconds rendered as RFC 3339 for log lines.
pub fn fmt_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ms.to_string())
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_left_orders_by_remaining_time() {
        assert!(TimeLeft::Short < TimeLeft::Medium);
        assert!(TimeLeft::Medium < TimeLeft::Long);
        assert!(TimeLeft::Long < TimeLeft::VeryLong);
        assert!(TimeLeft::Short.ceiling_ms() < TimeLeft::VeryLong.ceiling_ms());
    }

    #[test]
    fn time_left_parses_dump_spelling() {
        for tl in [TimeLeft::Short, TimeLeft::Medium, TimeLeft::Long, TimeLeft::VeryLong] {
            assert_eq!(TimeLeft::parse(tl.as_str()), Some(tl));
        }
        assert_eq!(TimeLeft::parse("very_long"), None);
    }

    #[test]
    fn outcome_serializes_screaming_case() {
        let json = serde_json::to_string(&Outcome::WonBuyout).unwrap();
        assert_eq!(json, "\"WON_BUYOUT\"");
        assert_eq!(Outcome::parse("CANCELLED"), Some(Outcome::Cancelled));
    }
}
