use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::db::models::{AttributeRow, ImportRecordRow, ListingRow, RowCounts, SnapshotRow};
use crate::db::ListingStore;
use crate::error::AppError;
use crate::estimate::{Estimate, OutcomeEstimator};
use crate::types::now_ms;

#[derive(Clone)]
pub struct ApiState {
    pub store: ListingStore,
    pub estimator: OutcomeEstimator,
}

impl ApiState {
    pub fn new(store: ListingStore) -> Self {
        Self {
            estimator: OutcomeEstimator::new(store.clone()),
            store,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/imports/recent", get(get_recent_imports))
        .route("/listings/:id", get(get_listing))
        .route("/listings/:id/outcome", get(get_listing_outcome))
        .route("/items/:item_id/listings", get(get_item_listings))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct OutcomeQuery {
    pub force: Option<bool>,
}

#[derive(Deserialize)]
pub struct ItemListingsQuery {
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub ended_only: Option<bool>,
    pub limit: Option<i64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub rows: RowCounts,
    pub last_import_at: Option<i64>,
}

#[derive(Serialize)]
pub struct ListingDetail {
    #[serde(flatten)]
    pub listing: ListingRow,
    pub snapshots: Vec<SnapshotRow>,
    pub attributes: Vec<AttributeRow>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let rows = state.store.row_counts().await?;
    let last_import_at = state
        .store
        .recent_imports(1)
        .await?
        .first()
        .map(|r| r.timestamp);

    Ok(Json(HealthResponse {
        status: "ok",
        rows,
        last_import_at,
    }))
}

async fn get_recent_imports(
    State(state): State<ApiState>,
    Query(params): Query<LimitQuery>,
) -> Result<Json<Vec<ImportRecordRow>>, AppError> {
    let limit = params.limit.unwrap_or(20).clamp(1, 500);
    Ok(Json(state.store.recent_imports(limit).await?))
}

async fn get_listing(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
) -> Result<Json<ListingDetail>, AppError> {
    let listing = state
        .store
        .get_listing(id)
        .await?
        .ok_or(AppError::NotFound(id))?;
    let snapshots = state.store.snapshots_for(id).await?;
    let attributes = state.store.attributes_for(id).await?;

    Ok(Json(ListingDetail {
        listing,
        snapshots,
        attributes,
    }))
}

async fn get_listing_outcome(
    State(state): State<ApiState>,
    Path(id): Path<i64>,
    Query(params): Query<OutcomeQuery>,
) -> Result<Json<Estimate>, AppError> {
    let force = params.force.unwrap_or(false);
    Ok(Json(state.estimator.estimate_result(id, force).await?))
}

async fn get_item_listings(
    State(state): State<ApiState>,
    Path(item_id): Path<i64>,
    Query(params): Query<ItemListingsQuery>,
) -> Result<Json<Vec<ListingRow>>, AppError> {
    let until = params.until.unwrap_or_else(now_ms);
    let since = params.since.unwrap_or(0);
    let limit = params.limit.unwrap_or(1_000).clamp(1, 10_000);

    let rows = state
        .store
        .listings_for_item(
            item_id,
            since,
            until,
            params.ended_only.unwrap_or(false),
            limit,
        )
        .await?;
    Ok(Json(rows))
}
