//! Decoding of a single auction dump into an [`AuctionSnapshot`].
//!
//! Dumps look like `{ "realms": [{name, slug}], "auctions": [{auc, item, ...}] }`.
//! Each auction is decoded independently so one bad record only costs itself.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::config::ANONYMOUS_OWNER;
use crate::error::{AppError, Result};
use crate::types::{Attribute, AuctionSnapshot, IncomingListing, TimeLeft};

static RECORD_FAILURES: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Deserialize)]
struct RawDump {
    #[serde(default)]
    realms: Vec<RawRealm>,
    auctions: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RawRealm {
    name: String,
    slug: String,
}

#[derive(Debug, Deserialize)]
struct RawModifier {
    #[serde(rename = "type")]
    kind: i64,
    value: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBonus {
    bonus_list_id: i64,
}

/// One auction as it appears in the dump. Anything not named here lands in
/// `extra` and becomes an attribute.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAuction {
    auc: i64,
    item: i64,
    #[serde(default)]
    owner: Option<String>,
    owner_realm: String,
    quantity: i64,
    #[serde(default)]
    buyout: Option<i64>,
    bid: i64,
    time_left: TimeLeft,
    #[serde(default)]
    rand: i64,
    #[serde(default)]
    seed: i64,
    #[serde(default)]
    context: i64,
    #[serde(default)]
    modifiers: Vec<RawModifier>,
    #[serde(default)]
    bonus_lists: Vec<RawBonus>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

/// Decode a dump body. `compressed` selects bzip2 decoding.
pub fn decode_dump(
    reader: impl Read,
    compressed: bool,
    timestamp: i64,
    content_hash: &str,
) -> Result<AuctionSnapshot> {
    let raw: RawDump = if compressed {
        serde_json::from_reader(std::io::BufReader::new(bzip2::read::MultiBzDecoder::new(reader)))?
    } else {
        serde_json::from_reader(std::io::BufReader::new(reader))?
    };
    Ok(normalize_dump(raw, timestamp, content_hash))
}

fn normalize_dump(raw: RawDump, timestamp: i64, content_hash: &str) -> AuctionSnapshot {
    let realm_slugs: HashMap<String, String> = raw
        .realms
        .iter()
        .map(|r| (r.name.clone(), r.slug.clone()))
        .collect();

    let mut slugs: Vec<&str> = raw.realms.iter().map(|r| r.slug.as_str()).collect();
    slugs.sort_unstable();
    slugs.dedup();
    let realm_key = slugs.join(",");

    let mut listings = Vec::with_capacity(raw.auctions.len());
    for value in raw.auctions {
        let parsed = serde_json::from_value::<RawAuction>(value)
            .map_err(AppError::from)
            .and_then(|a| normalize_auction(a, &realm_slugs));
        match parsed {
            Ok(listing) => listings.push(listing),
            Err(e) => {
                let count = RECORD_FAILURES.fetch_add(1, Ordering::Relaxed) + 1;
                if count <= 10 || count % 1000 == 0 {
                    warn!(count, timestamp, "[DUMP] dropping auction record: {e}");
                }
            }
        }
    }

    AuctionSnapshot {
        timestamp,
        realm_key,
        content_hash: content_hash.to_string(),
        listings,
    }
}

fn normalize_auction(
    raw: RawAuction,
    realm_slugs: &HashMap<String, String>,
) -> Result<IncomingListing> {
    if raw.item <= 0 {
        return Err(AppError::InvalidRecord(format!("auc {}: item {}", raw.auc, raw.item)));
    }
    if raw.quantity <= 0 {
        return Err(AppError::InvalidRecord(format!(
            "auc {}: quantity {}",
            raw.auc, raw.quantity
        )));
    }
    if raw.bid <= 0 {
        return Err(AppError::InvalidRecord(format!("auc {}: bid {}", raw.auc, raw.bid)));
    }
    let buyout = match raw.buyout {
        None | Some(0) => None,
        Some(b) if b > 0 => Some(b),
        Some(b) => {
            return Err(AppError::InvalidRecord(format!("auc {}: buyout {b}", raw.auc)));
        }
    };

    let owner = raw.owner.filter(|o| o != ANONYMOUS_OWNER);
    let owner_realm = realm_slugs
        .get(&raw.owner_realm)
        .cloned()
        .unwrap_or(raw.owner_realm);
    let attributes = flatten_attributes(raw.extra, &raw.modifiers, &raw.bonus_lists);

    Ok(IncomingListing {
        auc_id: raw.auc,
        owner,
        owner_realm,
        item_id: raw.item,
        quantity: raw.quantity,
        buyout,
        bid: raw.bid,
        time_left: raw.time_left,
        rand: raw.rand,
        seed: raw.seed,
        context: raw.context,
        attributes,
    })
}

/// Non-core fields as key/value pairs. Modifiers become `modifiers-type-<type>`
/// keys and bonus lists repeat the `bonusListId` key.
fn flatten_attributes(
    extra: BTreeMap<String, Value>,
    modifiers: &[RawModifier],
    bonus_lists: &[RawBonus],
) -> Vec<Attribute> {
    let mut out = Vec::with_capacity(extra.len() + modifiers.len() + bonus_lists.len());
    for (key, value) in extra {
        let text = match value {
            Value::Null => continue,
            Value::String(s) => s,
            other => other.to_string(),
        };
        out.push(Attribute::new(key, text));
    }
    for m in modifiers {
        out.push(Attribute::new(format!("modifiers-type-{}", m.kind), m.value.to_string()));
    }
    for b in bonus_lists {
        out.push(Attribute::new("bonusListId", b.bonus_list_id.to_string()));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH: &str = "0123456789abcdef0123456789abcdef";

    fn decode(json: &str) -> AuctionSnapshot {
        decode_dump(json.as_bytes(), false, 1_000, HASH).expect("decode")
    }

    #[test]
    fn normalizes_owner_realm_buyout_and_time_left() {
        let snap = decode(
            r#"{
                "realms": [{"name": "Argent Dawn", "slug": "argent-dawn"}],
                "auctions": [
                    {"auc": 1, "item": 25, "owner": "???", "ownerRealm": "Argent Dawn",
                     "bid": 100, "buyout": 0, "quantity": 1, "timeLeft": "VERY_LONG",
                     "rand": 0, "seed": 7, "context": 0}
                ]
            }"#,
        );
        assert_eq!(snap.realm_key, "argent-dawn");
        assert_eq!(snap.content_hash, HASH);
        let l = &snap.listings[0];
        assert_eq!(l.owner, None);
        assert_eq!(l.owner_realm, "argent-dawn");
        assert_eq!(l.buyout, None);
        assert_eq!(l.time_left, TimeLeft::VeryLong);
        assert_eq!(l.seed, 7);
        assert!(l.attributes.is_empty());
    }

    #[test]
    fn flattens_modifiers_bonus_lists_and_extra_fields() {
        let snap = decode(
            r#"{
                "realms": [],
                "auctions": [
                    {"auc": 2, "item": 82800, "owner": "Bob", "ownerRealm": "Kazzak",
                     "bid": 5, "buyout": 10, "quantity": 1, "timeLeft": "SHORT",
                     "petSpeciesId": 1387,
                     "modifiers": [{"type": 9, "value": 110}, {"type": 3, "value": 1387}],
                     "bonusLists": [{"bonusListId": 1472}, {"bonusListId": 1813}]}
                ]
            }"#,
        );
        let keys: Vec<(&str, &str)> = snap.listings[0]
            .attributes
            .iter()
            .map(|a| (a.key.as_str(), a.value.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                ("petSpeciesId", "1387"),
                ("modifiers-type-9", "110"),
                ("modifiers-type-3", "1387"),
                ("bonusListId", "1472"),
                ("bonusListId", "1813"),
            ]
        );
        assert_eq!(snap.listings[0].owner_realm, "Kazzak");
    }

    #[test]
    fn invalid_records_are_dropped_not_fatal() {
        let snap = decode(
            r#"{
                "realms": [{"name": "A", "slug": "a"}, {"name": "B", "slug": "b"}],
                "auctions": [
                    {"auc": 1, "item": 1, "ownerRealm": "A", "bid": 1, "quantity": 0, "timeLeft": "LONG"},
                    {"auc": 2, "item": 1, "ownerRealm": "A", "bid": 1, "quantity": 1, "timeLeft": "FOREVER"},
                    {"auc": 3, "item": 1, "ownerRealm": "B", "bid": 1, "quantity": 1, "timeLeft": "LONG"}
                ]
            }"#,
        );
        assert_eq!(snap.realm_key, "a,b");
        assert_eq!(snap.listings.len(), 1);
        assert_eq!(snap.listings[0].auc_id, 3);
        assert_eq!(snap.listings[0].owner_realm, "b");
    }

    #[test]
    fn malformed_body_is_an_error() {
        assert!(decode_dump(&b"{ not json"[..], false, 1, HASH).is_err());
    }
}
