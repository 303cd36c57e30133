//! `GET /status`: per-component status snapshot for one site -- the ETL
//! synchronizer's watermark/error log plus hot-tier bounds, enough for an
//! operator to tell at a glance whether ingestion is current.

use axum::extract::{
    Query,
    State,
};
use common::SiteId;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    error::ApiError,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct StatusParams {
    pub site: String,
}

#[derive(Debug, Serialize)]
pub struct HotBounds {
    pub min_timestamp: i64,
    pub max_timestamp: i64,
    pub row_count: u64,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub site: String,
    pub etl: etl_sync::SyncStatus,
    pub hot_bounds: Option<HotBounds>,
}

pub async fn status(State(state): State<AppState>, Query(params): Query<StatusParams>) -> Result<axum::Json<StatusResponse>, ApiError> {
    let site = SiteId::new(params.site.clone());
    let etl = state.etl.get_status(&site).await?;
    let hot_bounds = state
        .hot
        .bounds(&site)
        .await?
        .map(|(min, max, count)| HotBounds { min_timestamp: min, max_timestamp: max, row_count: count });
    Ok(axum::Json(StatusResponse { site: params.site, etl, hot_bounds }))
}
