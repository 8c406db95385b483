//! Outcome estimation for ended listings.
//!
//! Results are cached on the listing row; later calls return the cached values
//! unless a recompute is forced.

pub mod classifier;

use serde::Serialize;
use tracing::{debug, warn};

use crate::db::models::{ListingRow, SiblingRow};
use crate::db::ListingStore;
use crate::error::{AppError, Result};
use crate::types::{now_ms, Outcome};

use classifier::{Competitor, Observations, PerUnit, Signals};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Estimate {
    pub listing_id: i64,
    pub ended_at: i64,
    pub estimated_ended_at: i64,
    pub outcome: Outcome,
}

/// Outcome counts from a bulk estimation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EstimateTally {
    pub won_bid: usize,
    pub won_buyout: usize,
    pub expired: usize,
    pub cancelled: usize,
    pub unusable: usize,
}

impl EstimateTally {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::WonBid => self.won_bid += 1,
            Outcome::WonBuyout => self.won_buyout += 1,
            Outcome::Expired => self.expired += 1,
            Outcome::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.won_bid + self.won_buyout + self.expired + self.cancelled
    }
}

#[derive(Clone)]
pub struct OutcomeEstimator {
    store: ListingStore,
}

impl OutcomeEstimator {
    pub fn new(store: ListingStore) -> Self {
        Self { store }
    }

    /// Approximate true expiry instant of an ended listing.
    pub async fn estimate_ended_at(&self, listing_id: i64) -> Result<i64> {
        let (listing, _) = self.load_ended(listing_id).await?;
        let obs = self.observe(&listing).await?;
        Ok(classifier::estimate_ended_at(listing.started_at, &obs))
    }

    /// Classify an ended listing, using the cached result unless `force`.
    pub async fn estimate_result(&self, listing_id: i64, force: bool) -> Result<Estimate> {
        let (listing, ended_at) = self.load_ended(listing_id).await?;

        if !force {
            if let (Some(estimated_ended_at), Some(outcome)) =
                (listing.est_ended_at, listing.cached_outcome())
            {
                return Ok(Estimate {
                    listing_id,
                    ended_at,
                    estimated_ended_at,
                    outcome,
                });
            }
        }

        let obs = self.observe(&listing).await?;
        let estimated_ended_at = classifier::estimate_ended_at(listing.started_at, &obs);
        let siblings = self
            .store
            .siblings(&listing, ended_at, obs.last_seen, now_ms())
            .await?;
        let signals = signals_for(&listing, ended_at, &obs, &siblings);
        let outcome = classifier::classify(&signals);

        self.store
            .cache_estimate(listing_id, estimated_ended_at, outcome)
            .await?;
        debug!(
            listing_id,
            siblings = siblings.len(),
            ?signals,
            %outcome,
            "estimated listing outcome"
        );

        Ok(Estimate {
            listing_id,
            ended_at,
            estimated_ended_at,
            outcome,
        })
    }

    /// Estimate up to `limit` ended listings. Without `force`, only listings
    /// lacking a cached outcome are visited.
    pub async fn estimate_ended(&self, force: bool, limit: i64) -> Result<EstimateTally> {
        let ids = self.store.ended_listing_ids(!force, limit).await?;
        let mut tally = EstimateTally::default();

        for id in ids {
            match self.estimate_result(id, force).await {
                Ok(est) => tally.record(est.outcome),
                Err(AppError::InvalidRecord(msg)) => {
                    warn!(listing_id = id, "skipping listing: {msg}");
                    tally.unusable += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(tally)
    }

    async fn load_ended(&self, listing_id: i64) -> Result<(ListingRow, i64)> {
        let listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or(AppError::NotFound(listing_id))?;
        let ended_at = listing.ended_at.ok_or(AppError::NotEnded(listing_id))?;
        Ok((listing, ended_at))
    }

    async fn observe(&self, listing: &ListingRow) -> Result<Observations> {
        let snapshots = self.store.snapshots_for(listing.id).await?;
        classifier::observe(&snapshots).ok_or_else(|| {
            AppError::InvalidRecord(format!("listing {} has no usable snapshots", listing.id))
        })
    }
}

fn signals_for(
    listing: &ListingRow,
    ended_at: i64,
    obs: &Observations,
    siblings: &[SiblingRow],
) -> Signals {
    // Competing bids only count if the sibling was listed at our final sample.
    let bid_competitors: Vec<Competitor> = siblings
        .iter()
        .filter(|s| s.started_at <= obs.last_seen && s.ended_at.map_or(true, |e| e > obs.last_seen))
        .filter_map(|s| {
            s.bid_at.map(|bid| Competitor {
                price: PerUnit::new(bid, s.quantity),
                ended_at: s.ended_at,
            })
        })
        .collect();
    let was_lowest_bid = classifier::was_lowest(
        PerUnit::new(obs.last_bid, listing.quantity),
        ended_at,
        &bid_competitors,
    );

    let was_lowest_buyout = match listing.buyout {
        Some(buyout) => {
            let buyout_competitors: Vec<Competitor> = siblings
                .iter()
                .filter_map(|s| {
                    s.buyout.map(|b| Competitor {
                        price: PerUnit::new(b, s.quantity),
                        ended_at: s.ended_at,
                    })
                })
                .collect();
            classifier::was_lowest(
                PerUnit::new(buyout, listing.quantity),
                ended_at,
                &buyout_competitors,
            )
        }
        None => false,
    };

    Signals {
        time_expired: Signals::time_expired(obs.last_time_left),
        had_bids: obs.first_bid != obs.max_bid,
        was_bid_only: listing.buyout.is_none(),
        was_lowest_bid,
        was_lowest_buyout,
        runtime_ms: ended_at - listing.started_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DAY_MS, HOUR_MS};
    use crate::db::test_store;
    use crate::types::{IncomingListing, TimeLeft};

    const T0: i64 = 1_500_000_000_000;

    fn incoming(auc_id: i64, bid: i64, buyout: Option<i64>, tl: TimeLeft) -> IncomingListing {
        IncomingListing {
            auc_id,
            owner: None,
            owner_realm: "kazzak".to_string(),
            item_id: 7,
            quantity: 1,
            buyout,
            bid,
            time_left: tl,
            rand: 0,
            seed: 0,
            context: 0,
            attributes: Vec::new(),
        }
    }

    async fn id_of(store: &ListingStore, auc_id: i64, started_at: i64) -> i64 {
        store
            .get_by_auc_id(auc_id, started_at, DAY_MS)
            .await
            .unwrap()
            .expect("listing")
            .id
    }

    #[tokio::test]
    async fn open_listing_is_rejected_as_not_ended() {
        let store = test_store().await;
        store
            .apply_new(&[&incoming(1, 10, Some(20), TimeLeft::Long)], T0, 50)
            .await
            .unwrap();
        let id = id_of(&store, 1, T0).await;

        let est = OutcomeEstimator::new(store);
        assert!(matches!(est.estimate_result(id, false).await, Err(AppError::NotEnded(x)) if x == id));
        assert!(matches!(est.estimate_ended_at(id).await, Err(AppError::NotEnded(_))));
        assert!(matches!(est.estimate_result(999, false).await, Err(AppError::NotFound(999))));
    }

    #[tokio::test]
    async fn cheapest_buyout_vanishing_early_is_won_buyout() {
        let store = test_store().await;
        let cheap = incoming(1, 10, Some(100), TimeLeft::VeryLong);
        let dear = incoming(2, 10, Some(150), TimeLeft::VeryLong);
        store.apply_new(&[&cheap, &dear], T0, 50).await.unwrap();
        store.apply_ended(&[1], T0 + HOUR_MS, 7 * DAY_MS, 50).await.unwrap();

        let est = OutcomeEstimator::new(store.clone());
        let id = id_of(&store, 1, T0).await;
        let first = est.estimate_result(id, false).await.unwrap();
        assert_eq!(first.outcome, Outcome::WonBuyout);
        assert_eq!(first.ended_at, T0 + HOUR_MS);

        let second = est.estimate_result(id, false).await.unwrap();
        assert_eq!(first, second);
        let row = store.get_listing(id).await.unwrap().unwrap();
        assert_eq!(row.cached_outcome(), Some(Outcome::WonBuyout));
    }

    #[tokio::test]
    async fn undercut_listing_vanishing_early_is_cancelled() {
        let store = test_store().await;
        let dear = incoming(1, 10, Some(150), TimeLeft::VeryLong);
        let cheap = incoming(2, 10, Some(100), TimeLeft::VeryLong);
        store.apply_new(&[&dear, &cheap], T0, 50).await.unwrap();
        store.apply_ended(&[1], T0 + HOUR_MS, 7 * DAY_MS, 50).await.unwrap();

        let est = OutcomeEstimator::new(store.clone());
        let id = id_of(&store, 1, T0).await;
        assert_eq!(est.estimate_result(id, false).await.unwrap().outcome, Outcome::Cancelled);
    }

    #[tokio::test]
    async fn cheaper_sibling_gone_in_same_sample_is_a_tie() {
        let store = test_store().await;
        let dear = incoming(1, 10, Some(150), TimeLeft::VeryLong);
        let cheap = incoming(2, 10, Some(100), TimeLeft::VeryLong);
        store.apply_new(&[&dear, &cheap], T0, 50).await.unwrap();
        store.apply_ended(&[1, 2], T0 + HOUR_MS, 7 * DAY_MS, 50).await.unwrap();

        let est = OutcomeEstimator::new(store.clone());
        let id = id_of(&store, 1, T0).await;
        assert_eq!(est.estimate_result(id, false).await.unwrap().outcome, Outcome::WonBuyout);
    }

    #[tokio::test]
    async fn short_bucket_with_rebid_is_won_bid() {
        let store = test_store().await;
        let l = incoming(1, 10, None, TimeLeft::Short);
        store.apply_new(&[&l], T0, 50).await.unwrap();
        let rebid = incoming(1, 15, None, TimeLeft::Short);
        store
            .apply_continuing(&[&rebid], T0 + HOUR_MS, 7 * DAY_MS, 50)
            .await
            .unwrap();
        store.apply_ended(&[1], T0 + 2 * HOUR_MS, 7 * DAY_MS, 50).await.unwrap();

        let est = OutcomeEstimator::new(store.clone());
        let id = id_of(&store, 1, T0).await;
        let result = est.estimate_result(id, false).await.unwrap();
        assert_eq!(result.outcome, Outcome::WonBid);
        assert_eq!(
            est.estimate_ended_at(id).await.unwrap(),
            T0 + 30 * 60_000 - 2 * HOUR_MS + 5 * 60_000
        );
        assert_eq!(result.estimated_ended_at, est.estimate_ended_at(id).await.unwrap());
    }

    /// Bid-only listing seen VERY_LONG at T0 and SHORT at T0+13h, gone at
    /// T0+14h, with an optional cheaper-per-unit sibling listed at T0+1h.
    async fn long_runner_outcome(sibling: Option<i64>) -> Outcome {
        let store = test_store().await;
        let own = incoming(1, 100, None, TimeLeft::VeryLong);
        store.apply_new(&[&own], T0, 50).await.unwrap();

        let mut rival = incoming(2, 150, None, TimeLeft::VeryLong);
        rival.quantity = 2;
        if sibling.is_some() {
            store.apply_new(&[&rival], T0 + HOUR_MS, 50).await.unwrap();
        }

        let last = incoming(1, 100, None, TimeLeft::Short);
        store
            .apply_continuing(&[&last], T0 + 13 * HOUR_MS, 7 * DAY_MS, 50)
            .await
            .unwrap();
        store
            .apply_ended(&[1], T0 + 14 * HOUR_MS, 7 * DAY_MS, 50)
            .await
            .unwrap();
        if let Some(rival_ended_at) = sibling {
            store
                .apply_ended(&[2], rival_ended_at, 7 * DAY_MS, 50)
                .await
                .unwrap();
        }

        let id = id_of(&store, 1, T0).await;
        OutcomeEstimator::new(store)
            .estimate_result(id, false)
            .await
            .unwrap()
            .outcome
    }

    #[tokio::test]
    async fn lowest_bid_long_runner_is_won_bid() {
        assert_eq!(long_runner_outcome(None).await, Outcome::WonBid);
    }

    #[tokio::test]
    async fn cheaper_per_unit_rival_at_last_sample_means_expired() {
        // 150 for 2 undercuts 100 for 1; the rival outlives our last sample.
        assert_eq!(
            long_runner_outcome(Some(T0 + 20 * HOUR_MS)).await,
            Outcome::Expired
        );
    }

    #[tokio::test]
    async fn cheaper_rival_ending_with_us_is_a_tie() {
        assert_eq!(
            long_runner_outcome(Some(T0 + 14 * HOUR_MS)).await,
            Outcome::WonBid
        );
    }

    #[tokio::test]
    async fn rival_gone_before_last_sample_does_not_compete() {
        assert_eq!(
            long_runner_outcome(Some(T0 + 12 * HOUR_MS)).await,
            Outcome::WonBid
        );
    }

    #[tokio::test]
    async fn bulk_pass_only_visits_uncached_listings() {
        let store = test_store().await;
        let a = incoming(1, 10, Some(100), TimeLeft::VeryLong);
        let b = incoming(2, 10, None, TimeLeft::Medium);
        let open = incoming(3, 10, Some(300), TimeLeft::VeryLong);
        store.apply_new(&[&a, &b, &open], T0, 50).await.unwrap();
        store.apply_ended(&[1, 2], T0 + HOUR_MS, 7 * DAY_MS, 50).await.unwrap();

        let est = OutcomeEstimator::new(store.clone());
        let tally = est.estimate_ended(false, 100).await.unwrap();
        assert_eq!(tally.total(), 2);
        assert_eq!(tally.won_buyout, 1);
        assert_eq!(tally.expired, 1);

        let again = est.estimate_ended(false, 100).await.unwrap();
        assert_eq!(again.total(), 0);
        let forced = est.estimate_ended(true, 100).await.unwrap();
        assert_eq!(forced, tally);
    }

    #[tokio::test]
    async fn forced_recompute_sees_new_evidence() {
        let store = test_store().await;
        let l = incoming(1, 10, Some(100), TimeLeft::Long);
        store.apply_new(&[&l], T0, 50).await.unwrap();
        store.apply_ended(&[1], T0 + HOUR_MS, 7 * DAY_MS, 50).await.unwrap();

        let est = OutcomeEstimator::new(store.clone());
        let id = id_of(&store, 1, T0).await;
        assert_eq!(est.estimate_result(id, false).await.unwrap().outcome, Outcome::WonBuyout);

        // A cheaper overlapping listing recorded later changes the verdict,
        // but only when recomputation is forced.
        let cheaper = incoming(2, 10, Some(50), TimeLeft::Long);
        store.apply_new(&[&cheaper], T0 + 30 * 60_000, 50).await.unwrap();
        assert_eq!(est.estimate_result(id, false).await.unwrap().outcome, Outcome::WonBuyout);
        assert_eq!(est.estimate_result(id, true).await.unwrap().outcome, Outcome::Cancelled);
    }
}
