//! Historical backfill job endpoints: `POST /backfill/start` (operator
//! bearer-auth protected, per §4.2.1), `GET /backfill/status`, `POST
//! /backfill/tick`.

use axum::{
    extract::{
        Query,
        State,
    },
    http::HeaderMap,
    Json,
};
use backfill::BackfillStatusSnapshot;
use chrono::NaiveDate;
use common::SiteId;
use serde::Deserialize;

use crate::{
    auth::require_operator_bearer,
    error::ApiError,
    state::AppState,
};

#[derive(Debug, Deserialize)]
pub struct StartBackfillParams {
    pub site: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Debug, serde::Serialize)]
pub struct StartBackfillResponse {
    pub job_id: String,
}

pub async fn start(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<StartBackfillParams>,
) -> Result<Json<StartBackfillResponse>, ApiError> {
    require_operator_bearer(&headers, &state.operator_bearer_token)?;
    let job_id = state.backfill.start(SiteId::new(params.site), params.start_date, params.end_date).await?;
    Ok(Json(StartBackfillResponse { job_id }))
}

#[derive(Debug, Deserialize)]
pub struct JobIdParams {
    pub job_id: String,
}

pub async fn status(State(state): State<AppState>, Query(params): Query<JobIdParams>) -> Result<Json<BackfillStatusSnapshot>, ApiError> {
    let snapshot = state.backfill.status(&params.job_id).await?;
    Ok(Json(snapshot))
}

pub async fn tick(State(state): State<AppState>, Query(params): Query<JobIdParams>) -> Result<Json<BackfillStatusSnapshot>, ApiError> {
    let snapshot = state.backfill.tick(&params.job_id).await?;
    Ok(Json(snapshot))
}
