//! `GET /timeseries/query`: the read path. Data-source, strategy and
//! cache status are echoed back both in the JSON body and as response
//! headers (`X-Data-Source`, `X-Query-Strategy`, `X-Cache-Status`,
//! `X-Processing-Time-Ms`) so an operator can see routing decisions
//! without parsing the body.

use axum::{
    extract::{
        Query,
        State,
    },
    http::HeaderValue,
    response::{
        IntoResponse,
        Response,
    },
    Json,
};
use common::{
    PointName,
    SiteId,
    TimeRange,
};
use errors::ErrorMetadata;
use query_router::QueryOptions;
use serde::Deserialize;

use crate::{
    error::ApiError,
    state::AppState,
};

fn default_use_routing() -> bool {
    true
}

#[derive(Debug, Deserialize)]
pub struct QueryParams {
    pub site: String,
    /// Comma-delimited list of point names; empty/absent means "all
    /// configured points".
    #[serde(default)]
    pub points: String,
    pub start_time: i64,
    pub end_time: i64,
    #[serde(default = "default_use_routing")]
    pub use_routing: bool,
}

pub async fn query(State(state): State<AppState>, Query(params): Query<QueryParams>) -> Result<Response, ApiError> {
    let site = SiteId::new(params.site);
    let points: Vec<PointName> = params.points.split(',').map(str::trim).filter(|s| !s.is_empty()).map(PointName::new).collect();
    let range = TimeRange::new(params.start_time, params.end_time)
        .map_err(|e| e.context(ErrorMetadata::bad_request("InvalidQueryRange", "start_time must be <= end_time")))?;

    let opts = QueryOptions { use_routing: params.use_routing, deadline: None };
    let result = state.query.query(&site, &points, range, opts).await?;

    let mut response = Json(&result).into_response();
    let headers = response.headers_mut();
    headers.insert("x-data-source", HeaderValue::from_str(&result.data_source.to_string()).unwrap_or(HeaderValue::from_static("unknown")));
    headers.insert("x-query-strategy", HeaderValue::from_str(&result.strategy.to_string()).unwrap_or(HeaderValue::from_static("unknown")));
    headers.insert("x-cache-status", HeaderValue::from_str(&result.cache_status.to_string()).unwrap_or(HeaderValue::from_static("unknown")));
    headers.insert("x-processing-time-ms", HeaderValue::from_str(&result.processing_ms.to_string()).unwrap_or(HeaderValue::from_static("0")));
    Ok(response)
}
