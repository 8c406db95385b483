use std::collections::HashSet;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tracing::debug;

use crate::db::models::{
    AttributeRow, ImportRecordRow, ListingRow, RowCounts, SiblingRow, SnapshotRow,
};
use crate::error::Result;
use crate::types::{now_ms, IncomingListing, Outcome};

const LISTING_COLUMNS: &str = "id, auc_id, owner, owner_realm, item_id, quantity, buyout, \
     rand, seed, context, started_at, ended_at, created_at, est_ended_at, est_outcome";

/// SQLite's default cap on bound parameters in one statement.
const SQLITE_MAX_VARIABLES: usize = 32_766;

/// Rows per multi-row statement: at most `batch_size`, and few enough that
/// `fixed + rows * per_row` parameters stay under [`SQLITE_MAX_VARIABLES`].
fn rows_per_statement(batch_size: usize, per_row: usize, fixed: usize) -> usize {
    batch_size.clamp(1, (SQLITE_MAX_VARIABLES - fixed) / per_row)
}

/// Persistence boundary for listings, snapshots, attributes and the import ledger.
///
/// Each `apply_*` method is one phase: all of its chunks share a single
/// transaction, so a failure rolls back the whole phase and nothing else.
#[derive(Debug, Clone)]
pub struct ListingStore {
    pool: SqlitePool,
}

impl ListingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Open (creating if needed) the database at `url` and run migrations.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self::new(pool))
    }

    // -----------------------------------------------------------------------
    // Import ledger
    // -----------------------------------------------------------------------

    pub async fn import_exists(&self, timestamp: i64) -> Result<bool> {
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM import_records WHERE timestamp = ?")
                .bind(timestamp)
                .fetch_optional(&self.pool)
                .await?;
        Ok(found.is_some())
    }

    pub async fn insert_import(
        &self,
        timestamp: i64,
        realm_key: &str,
        content_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO import_records (timestamp, realm_key, content_hash, created_at)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(timestamp)
        .bind(realm_key)
        .bind(content_hash)
        .bind(now_ms())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn recent_imports(&self, limit: i64) -> Result<Vec<ImportRecordRow>> {
        let rows = sqlx::query_as::<_, ImportRecordRow>(
            r#"
            SELECT id, timestamp, realm_key, content_hash, created_at
            FROM import_records
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    // -----------------------------------------------------------------------
    // Windowed lookups
    // -----------------------------------------------------------------------

    /// External ids of open listings that started within `[timestamp - window_ms, timestamp]`.
    pub async fn active_auc_ids(&self, timestamp: i64, window_ms: i64) -> Result<HashSet<i64>> {
        let ids: Vec<i64> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT auc_id
            FROM listings
            WHERE ended_at IS NULL
              AND started_at >= ?
              AND started_at <= ?
            "#,
        )
        .bind(timestamp - window_ms)
        .bind(timestamp)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().collect())
    }

    /// Most recent listing with this external id that started within
    /// `window_ms` either side of `timestamp`.
    pub async fn get_by_auc_id(
        &self,
        auc_id: i64,
        timestamp: i64,
        window_ms: i64,
    ) -> Result<Option<ListingRow>> {
        let sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings \
             WHERE auc_id = ? AND started_at >= ? AND started_at <= ? \
             ORDER BY started_at DESC LIMIT 1"
        );
        let row = sqlx::query_as::<_, ListingRow>(&sql)
            .bind(auc_id)
            .bind(timestamp - window_ms)
            .bind(timestamp + window_ms)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    // -----------------------------------------------------------------------
    // Phase writes
    // -----------------------------------------------------------------------

    /// Close the open listings with these external ids. Returns rows updated.
    pub async fn apply_ended(
        &self,
        auc_ids: &[i64],
        timestamp: i64,
        window_ms: i64,
        batch_size: usize,
    ) -> Result<u64> {
        if auc_ids.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut updated = 0u64;

        for chunk in auc_ids.chunks(rows_per_statement(batch_size, 1, 3)) {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE listings SET ended_at = ");
            qb.push_bind(timestamp);
            qb.push(" WHERE ended_at IS NULL AND started_at >= ");
            qb.push_bind(timestamp - window_ms);
            qb.push(" AND started_at <= ");
            qb.push_bind(timestamp);
            qb.push(" AND auc_id IN (");
            let mut ids = qb.separated(", ");
            for id in chunk {
                ids.push_bind(*id);
            }
            ids.push_unseparated(")");

            updated += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(updated, "ended phase committed");
        Ok(updated)
    }

    /// Insert listings first seen at `timestamp`, each with its seed snapshot
    /// and attributes. Returns the number of listing rows created.
    ///
    /// A listing already present under the same `(auc_id, owner_realm, started_at)`
    /// is left untouched and only gains the seed snapshot if it is missing.
    pub async fn apply_new(
        &self,
        listings: &[&IncomingListing],
        timestamp: i64,
        batch_size: usize,
    ) -> Result<u64> {
        if listings.is_empty() {
            return Ok(0);
        }

        let created_at = now_ms();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        // Seed snapshots bind 4 parameters per row.
        for chunk in listings.chunks(rows_per_statement(batch_size, 4, 0)) {
            let mut seeds: Vec<(i64, &IncomingListing)> = Vec::with_capacity(chunk.len());
            let mut fresh: Vec<(i64, &IncomingListing)> = Vec::new();

            for listing in chunk {
                let res = sqlx::query(
                    r#"
                    INSERT OR IGNORE INTO listings (
                        auc_id, owner, owner_realm, item_id, quantity, buyout,
                        rand, seed, context, started_at, created_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(listing.auc_id)
                .bind(listing.owner.as_deref())
                .bind(&listing.owner_realm)
                .bind(listing.item_id)
                .bind(listing.quantity)
                .bind(listing.buyout)
                .bind(listing.rand)
                .bind(listing.seed)
                .bind(listing.context)
                .bind(timestamp)
                .bind(created_at)
                .execute(&mut *tx)
                .await?;

                let listing_id = if res.rows_affected() == 1 {
                    inserted += 1;
                    let id = res.last_insert_rowid();
                    fresh.push((id, *listing));
                    id
                } else {
                    sqlx::query_scalar(
                        r#"
                        SELECT id FROM listings
                        WHERE auc_id = ? AND owner_realm = ? AND started_at = ?
                        "#,
                    )
                    .bind(listing.auc_id)
                    .bind(&listing.owner_realm)
                    .bind(timestamp)
                    .fetch_one(&mut *tx)
                    .await?
                };
                seeds.push((listing_id, *listing));
            }

            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT OR IGNORE INTO snapshots (listing_id, timestamp, bid, time_left) ",
            );
            qb.push_values(&seeds, |mut b, (listing_id, listing)| {
                b.push_bind(*listing_id)
                    .push_bind(timestamp)
                    .push_bind(listing.bid)
                    .push_bind(listing.time_left.as_str());
            });
            qb.build().execute(&mut *tx).await?;

            let attributes: Vec<(i64, String, String)> = fresh
                .iter()
                .flat_map(|(id, listing)| {
                    listing
                        .attributes
                        .iter()
                        .map(move |a| (*id, a.key.clone(), a.value.clone()))
                })
                .collect();
            let attr_rows = rows_per_statement(batch_size.saturating_mul(4), 3, 0);
            for attr_chunk in attributes.chunks(attr_rows) {
                let mut qb = QueryBuilder::<Sqlite>::new(
                    "INSERT INTO attributes (listing_id, key, value) ",
                );
                qb.push_values(attr_chunk, |mut b, (listing_id, key, value)| {
                    b.push_bind(*listing_id)
                        .push_bind(key.clone())
                        .push_bind(value.clone());
                });
                qb.build().execute(&mut *tx).await?;
            }
        }

        tx.commit().await?;
        debug!(inserted, "new phase committed");
        Ok(inserted)
    }

    /// Append a snapshot at `timestamp` to the open listing matching each
    /// entry's external id within the window. Returns snapshot rows created.
    pub async fn apply_continuing(
        &self,
        listings: &[&IncomingListing],
        timestamp: i64,
        window_ms: i64,
        batch_size: usize,
    ) -> Result<u64> {
        if listings.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;
        let mut appended = 0u64;

        for chunk in listings.chunks(rows_per_statement(batch_size, 3, 3)) {
            let mut qb =
                QueryBuilder::<Sqlite>::new("WITH incoming (auc_id, bid, time_left) AS (");
            qb.push_values(chunk, |mut b, listing| {
                b.push_bind(listing.auc_id)
                    .push_bind(listing.bid)
                    .push_bind(listing.time_left.as_str());
            });
            qb.push(
                ") INSERT OR IGNORE INTO snapshots (listing_id, timestamp, bid, time_left) \
                 SELECT l.id, ",
            );
            qb.push_bind(timestamp);
            qb.push(
                ", incoming.bid, incoming.time_left \
                 FROM incoming JOIN listings l ON l.auc_id = incoming.auc_id \
                 WHERE l.ended_at IS NULL AND l.started_at >= ",
            );
            qb.push_bind(timestamp - window_ms);
            qb.push(" AND l.started_at <= ");
            qb.push_bind(timestamp);

            appended += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        debug!(appended, "continuing phase committed");
        Ok(appended)
    }

    // -----------------------------------------------------------------------
    // Reads for estimation and the API
    // -----------------------------------------------------------------------

    pub async fn get_listing(&self, id: i64) -> Result<Option<ListingRow>> {
        let sql = format!("SELECT {LISTING_COLUMNS} FROM listings WHERE id = ?");
        let row = sqlx::query_as::<_, ListingRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Snapshots of one listing, oldest first.
    pub async fn snapshots_for(&self, listing_id: i64) -> Result<Vec<SnapshotRow>> {
        let rows = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT id, listing_id, timestamp, bid, time_left
            FROM snapshots
            WHERE listing_id = ?
            ORDER BY timestamp ASC
            "#,
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn attributes_for(&self, listing_id: i64) -> Result<Vec<AttributeRow>> {
        let rows = sqlx::query_as::<_, AttributeRow>(
            "SELECT key, value FROM attributes WHERE listing_id = ? ORDER BY id ASC",
        )
        .bind(listing_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Listings for the same item, other than `listing`, with the same
    /// buyout presence, whose `[started_at, ended_at or now)` interval
    /// overlaps `[listing.started_at, end)`.
    ///
    /// `bid_at` on each row is the sibling's last observed bid at or before `at`.
    pub async fn siblings(
        &self,
        listing: &ListingRow,
        end: i64,
        at: i64,
        now: i64,
    ) -> Result<Vec<SiblingRow>> {
        let rows = sqlx::query_as::<_, SiblingRow>(
            r#"
            SELECT l.quantity, l.buyout, l.started_at, l.ended_at,
                   (SELECT s.bid FROM snapshots s
                    WHERE s.listing_id = l.id AND s.timestamp <= ?
                    ORDER BY s.timestamp DESC
                    LIMIT 1) AS bid_at
            FROM listings l
            WHERE l.item_id = ?
              AND l.id <> ?
              AND (l.buyout IS NULL) = ?
              AND l.started_at < ?
              AND COALESCE(l.ended_at, ?) > ?
            "#,
        )
        .bind(at)
        .bind(listing.item_id)
        .bind(listing.id)
        .bind(listing.buyout.is_none())
        .bind(end)
        .bind(now)
        .bind(listing.started_at)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn cache_estimate(
        &self,
        listing_id: i64,
        est_ended_at: i64,
        outcome: Outcome,
    ) -> Result<()> {
        sqlx::query("UPDATE listings SET est_ended_at = ?, est_outcome = ? WHERE id = ?")
            .bind(est_ended_at)
            .bind(outcome.as_str())
            .bind(listing_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Ids of ended listings, oldest end first. With `pending_only`, only
    /// those without a cached outcome.
    pub async fn ended_listing_ids(&self, pending_only: bool, limit: i64) -> Result<Vec<i64>> {
        let ids = sqlx::query_scalar(
            r#"
            SELECT id FROM listings
            WHERE ended_at IS NOT NULL
              AND (? = 0 OR est_outcome IS NULL)
            ORDER BY ended_at ASC, id ASC
            LIMIT ?
            "#,
        )
        .bind(pending_only)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Listings of one item that started in `[since, until)`.
    pub async fn listings_for_item(
        &self,
        item_id: i64,
        since: i64,
        until: i64,
        ended_only: bool,
        limit: i64,
    ) -> Result<Vec<ListingRow>> {
        let sql = format!(
            "SELECT {LISTING_COLUMNS} FROM listings \
             WHERE item_id = ? AND started_at >= ? AND started_at < ? \
               AND (? = 0 OR ended_at IS NOT NULL) \
             ORDER BY started_at ASC, id ASC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, ListingRow>(&sql)
            .bind(item_id)
            .bind(since)
            .bind(until)
            .bind(ended_only)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn row_counts(&self) -> Result<RowCounts> {
        let counts = sqlx::query_as::<_, (i64, i64, i64, i64)>(
            r#"
            SELECT
                (SELECT COUNT(*) FROM listings),
                (SELECT COUNT(*) FROM snapshots),
                (SELECT COUNT(*) FROM attributes),
                (SELECT COUNT(*) FROM import_records)
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(RowCounts {
            listings: counts.0,
            snapshots: counts.1,
            attributes: counts.2,
            imports: counts.3,
        })
    }
}
