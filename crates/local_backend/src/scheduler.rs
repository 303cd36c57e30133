//! Background periodic work: an ETL tick per managed site on
//! `ETL_INTERVAL_SECONDS`, and a daily archival pass per site. Both are
//! plain `tokio::spawn`ed loops -- each tick is independently
//! lease-protected by the worker it calls into, so an overrunning tick
//! simply gets skipped by the next one rather than piling up.

use std::time::Duration;

use common::{
    knobs,
    SiteId,
};

use crate::state::AppState;

pub fn spawn_background_workers(state: AppState, managed_sites: Vec<String>) {
    for site in managed_sites {
        let site = SiteId::new(site);
        tokio::spawn(etl_loop(state.clone(), site.clone()));
        tokio::spawn(archival_loop(state.clone(), site));
    }
}

async fn etl_loop(state: AppState, site: SiteId) {
    let mut interval = tokio::time::interval(Duration::from_secs(*knobs::ETL_INTERVAL_SECONDS as u64));
    loop {
        interval.tick().await;
        let span = tracing::info_span!("scheduled_etl_tick", site = %site);
        let _enter = span.enter();
        if let Err(e) = state.etl.run_sync(&site).await {
            tracing::warn!(error = %e, "scheduled ETL tick failed");
        }
    }
}

async fn archival_loop(state: AppState, site: SiteId) {
    let mut interval = tokio::time::interval(Duration::from_secs(86_400));
    loop {
        interval.tick().await;
        let span = tracing::info_span!("scheduled_archival_pass", site = %site);
        let _enter = span.enter();
        match state.archival.run_archival(&site).await {
            Ok(report) => tracing::info!(days_archived = report.days.len(), "archival pass complete"),
            Err(e) => tracing::warn!(error = %e, "scheduled archival pass failed"),
        }
    }
}
