//! `POST /trigger`: operator-initiated immediate ETL sync for one site,
//! bypassing the periodic scheduler. Identical code path to a scheduled
//! tick -- §4.1 defines no separate "manual" semantics.

use axum::extract::{
    Query,
    State,
};
use common::SiteId;
use serde::Deserialize;

use crate::{
    error::ApiError,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct TriggerParams {
    pub site: String,
}

pub async fn trigger(
    State(state): State<AppState>,
    Query(params): Query<TriggerParams>,
) -> Result<axum::Json<etl_sync::SyncOutcome>, ApiError> {
    let site = SiteId::new(params.site);
    let outcome = state.etl.trigger(&site).await?;
    Ok(axum::Json(outcome))
}
