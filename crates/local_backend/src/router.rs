//! Assembles the axum `Router` and its middleware stack: a per-request
//! timeout, a global concurrency cap, and request tracing -- the HTTP
//! plumbing ambient to any exposed service regardless of the data-path
//! details above it.

use std::time::Duration;

use axum::{
    error_handling::HandleErrorLayer,
    http::StatusCode,
    routing::{
        get,
        post,
    },
    Router,
};
use common::knobs;
use tower::{
    BoxError,
    ServiceBuilder,
};
use tower_http::trace::TraceLayer;

use crate::{
    routes,
    state::AppState,
};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health))
        .route("/status", get(routes::status::status))
        .route("/trigger", post(routes::trigger::trigger))
        .route("/backfill/start", post(routes::backfill::start))
        .route("/backfill/status", get(routes::backfill::status))
        .route("/backfill/tick", post(routes::backfill::tick))
        .route("/timeseries/query", get(routes::query::query))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(HandleErrorLayer::new(|_: BoxError| async { StatusCode::REQUEST_TIMEOUT }))
                .concurrency_limit(*knobs::COLD_FETCH_PARALLELISM * 4)
                .timeout(Duration::from_secs(*knobs::WORKER_SOFT_BUDGET_SECONDS as u64)),
        )
        .with_state(state)
}
