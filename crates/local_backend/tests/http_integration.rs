//! End-to-end HTTP tests driving the assembled router with `tower::
//! ServiceExt::oneshot`, against an in-memory hot/coord tier, a
//! tempdir-backed cold tier, and a stubbed upstream -- no network, no
//! real clock dependence.

use std::sync::Arc;

use archival::ArchivalCompactor;
use axum::{
    body::Body,
    http::{
        Request,
        StatusCode,
    },
};
use backfill::BackfillEngine;
use cold_store::{
    ColdStore,
    LocalDiskStorage,
    Storage,
};
use common::{
    runtime::ProdRuntime,
    Sample,
    SiteId,
};
use coord_store::CoordStore;
use etl_sync::EtlSync;
use hot_store::HotStore;
use local_backend::{
    router::router,
    state::AppState,
};
use query_router::QueryRouter;
use serde_json::Value;
use tower::ServiceExt;
use upstream_client::{
    StubUpstreamApi,
    UpstreamApi,
    UpstreamPage,
};

type ColdBackend = Arc<dyn Storage>;

fn test_state(upstream_pages: Vec<anyhow::Result<UpstreamPage>>) -> (AppState, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let runtime = ProdRuntime;
    let hot = HotStore::open_in_memory().unwrap();
    let coord = CoordStore::open_in_memory().unwrap();
    let backend: ColdBackend = Arc::new(LocalDiskStorage::new(tmp.path()));
    let cold = ColdStore::new(backend);
    let upstream: Arc<dyn UpstreamApi> = Arc::new(StubUpstreamApi::new(upstream_pages));

    let etl = Arc::new(EtlSync::new(hot.clone(), coord.clone(), upstream.clone(), runtime));
    let backfill = Arc::new(BackfillEngine::new(cold.clone(), coord.clone(), upstream.clone(), runtime));
    let archival = Arc::new(ArchivalCompactor::new(hot.clone(), cold.clone(), coord.clone(), runtime));
    let query = Arc::new(QueryRouter::new(hot.clone(), cold.clone(), Some(upstream.clone()), runtime));

    let state = AppState {
        hot,
        cold,
        coord,
        upstream,
        etl,
        backfill,
        archival,
        query,
        operator_bearer_token: "test-operator-token".into(),
        runtime,
    };
    (state, tmp)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_endpoint_returns_ok_without_touching_any_store() {
    let (state, _tmp) = test_state(vec![]);
    let app = router(state);
    let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn trigger_runs_etl_sync_and_status_reflects_it() {
    let page = UpstreamPage { samples: vec![Sample::new("p1", 1_700_000_000, 1.0).unwrap()], next_cursor: None };
    let (state, _tmp) = test_state(vec![Ok(page)]);
    let app = router(state);

    let trigger_response =
        app.clone().oneshot(Request::builder().uri("/trigger?site=site_a").method("POST").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(trigger_response.status(), StatusCode::OK);
    let trigger_body = body_json(trigger_response).await;
    assert_eq!(trigger_body["samples_inserted"], 1);

    let status_response = app.oneshot(Request::builder().uri("/status?site=site_a").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(status_response.status(), StatusCode::OK);
    let status_body = body_json(status_response).await;
    assert!(status_body["etl"]["last_sync_ts"].is_number());
}

#[tokio::test]
async fn backfill_start_requires_operator_bearer_token() {
    let (state, _tmp) = test_state(vec![]);
    let app = router(state);

    let unauthenticated = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/backfill/start?site=site_a&start_date=2024-01-01&end_date=2024-01-02")
                .method("POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(unauthenticated.status(), StatusCode::UNAUTHORIZED);

    let authenticated = app
        .oneshot(
            Request::builder()
                .uri("/backfill/start?site=site_a&start_date=2024-01-01&end_date=2024-01-02")
                .method("POST")
                .header("authorization", "Bearer test-operator-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(authenticated.status(), StatusCode::OK);
    let body = body_json(authenticated).await;
    assert!(body["job_id"].as_str().is_some());
}

#[tokio::test]
async fn backfill_tick_advances_a_started_job() {
    let page = UpstreamPage { samples: vec![Sample::new("p1", 1_704_067_200, 1.0).unwrap()], next_cursor: None };
    let (state, _tmp) = test_state(vec![Ok(page)]);
    let app = router(state);

    let start = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/backfill/start?site=site_a&start_date=2024-01-01&end_date=2024-01-01")
                .method("POST")
                .header("authorization", "Bearer test-operator-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let job_id = body_json(start).await["job_id"].as_str().unwrap().to_string();

    let tick = app
        .oneshot(Request::builder().uri(format!("/backfill/tick?job_id={job_id}")).method("POST").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(tick.status(), StatusCode::OK);
    let tick_body = body_json(tick).await;
    assert_eq!(tick_body["status"], "complete");
    assert_eq!(tick_body["samples_fetched"], 1);
}

#[tokio::test]
async fn query_endpoint_reports_routing_headers_for_cold_only_range() {
    let (state, _tmp) = test_state(vec![]);
    let site = SiteId::new("site_a");
    let date = chrono::NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
    let day_start = date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
    state.cold.append_day(&site, date, &[Sample::new("p1", day_start, 1.0).unwrap()]).await.unwrap();

    let app = router(state);
    let uri = format!("/timeseries/query?site=site_a&points=p1&start_time={}&end_time={}", day_start, day_start + 86_400);
    let response = app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get("x-data-source").unwrap(), "COLD");
    assert_eq!(response.headers().get("x-query-strategy").unwrap(), "COLD_ONLY");
    assert_eq!(response.headers().get("x-cache-status").unwrap(), "MISS");
}

#[tokio::test]
async fn query_range_exceeding_max_is_rejected_with_bad_request() {
    let (state, _tmp) = test_state(vec![]);
    let app = router(state);
    let too_wide_days = *common::knobs::QUERY_MAX_RANGE_DAYS + 10;
    let uri = format!("/timeseries/query?site=site_a&points=p1&start_time=0&end_time={}", too_wide_days * 86_400);
    let response = app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
