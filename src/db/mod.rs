pub mod models;
pub mod store;

pub use store::ListingStore;

/// Fresh in-memory store with migrations applied. One connection, never
/// recycled, so every query sees the same database.
#[cfg(test)]
pub async fn test_store() -> ListingStore {
    use sqlx::sqlite::SqlitePoolOptions;

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .expect("open in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrate");
    ListingStore::new(pool)
}
