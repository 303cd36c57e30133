//! Incremental ETL synchronizer: periodic, resumable, deduplicating sync
//! from the upstream API to the hot tier. Public operations mirror
//! §4.1 exactly: `run_sync`, `get_status`, `trigger`.
//!
//! State machine (`idle -> fetching -> writing -> committing-watermark ->
//! idle`) is realized as the sequence of steps inside `run_sync`, not a
//! persisted enum -- the only durable state is the watermark itself and
//! the per-site lease, matching "failure in any non-commit state leaves
//! the watermark unchanged."

use std::sync::Arc;

use chrono::Utc;
use common::{
    knobs,
    push_bounded_log,
    runtime::Runtime,
    ErrorLogEntry,
    Sample,
    SiteId,
    TimestampSecs,
};
use coord_store::{
    keys,
    CoordStore,
};
use errors::ErrorMetadataAnyhowExt;
use hot_store::HotStore;
use serde::{
    Deserialize,
    Serialize,
};
use upstream_client::{
    drain_all_pages,
    sync_window,
    UpstreamApi,
};

/// Result of one `run_sync` invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncOutcome {
    pub samples_inserted: usize,
    pub error: Option<String>,
    /// `true` when this invocation found an already-held lease and did
    /// nothing -- not an error, just a suppressed overlapping tick.
    pub skipped_overlap: bool,
}

/// `get_status` snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncStatus {
    pub last_sync_ts: Option<TimestampSecs>,
    pub last_success_age: Option<i64>,
    pub recent_errors: Vec<ErrorLogEntry>,
}

pub struct EtlSync<RT: Runtime> {
    hot: HotStore,
    coord: CoordStore,
    upstream: Arc<dyn UpstreamApi>,
    runtime: RT,
}

impl<RT: Runtime> EtlSync<RT> {
    pub fn new(hot: HotStore, coord: CoordStore, upstream: Arc<dyn UpstreamApi>, runtime: RT) -> Self {
        Self { hot, coord, upstream, runtime }
    }

    /// Operator override to run a sync immediately, bypassing the
    /// periodic scheduler. Identical to `run_sync` -- there is no
    /// separate code path, only a different caller.
    pub async fn trigger(&self, site: &SiteId) -> anyhow::Result<SyncOutcome> {
        self.run_sync(site).await
    }

    pub async fn get_status(&self, site: &SiteId) -> anyhow::Result<SyncStatus> {
        let last_sync_ts: Option<TimestampSecs> = self.coord.get_json(&keys::etl_last_sync_ts(site)).await?;
        let recent_errors: Vec<ErrorLogEntry> = self.coord.get_json(&keys::etl_errors(site)).await?.unwrap_or_default();
        let now = self.runtime.now_secs();
        let last_success_age = last_sync_ts.map(|ts| now - ts);
        Ok(SyncStatus { last_sync_ts, last_success_age, recent_errors })
    }

    /// Idempotent: fetch samples created since the watermark, upsert into
    /// the hot tier, advance the watermark. A failure at any point before
    /// the watermark commit leaves state untouched so the next tick
    /// simply retries the same (or an overlapping) window.
    pub async fn run_sync(&self, site: &SiteId) -> anyhow::Result<SyncOutcome> {
        let holder = uuid::Uuid::new_v4().to_string();
        let now = self.runtime.now_secs();
        let lease_key = keys::etl_lease(site);
        if !self.coord.acquire_lease(&lease_key, &holder, *knobs::ETL_LEASE_SECONDS, now).await? {
            tracing::info!(site = %site, "etl sync already in progress, suppressing overlapping tick");
            return Ok(SyncOutcome { samples_inserted: 0, error: None, skipped_overlap: true });
        }

        let result = self.run_sync_inner(site).await;

        self.coord.release_lease(&lease_key, &holder).await?;

        match result {
            Ok(samples_inserted) => Ok(SyncOutcome { samples_inserted, error: None, skipped_overlap: false }),
            Err(e) => {
                self.record_error(site, &e).await?;
                Ok(SyncOutcome { samples_inserted: 0, error: Some(e.msg()), skipped_overlap: false })
            },
        }
    }

    async fn run_sync_inner(&self, site: &SiteId) -> anyhow::Result<usize> {
        let span = tracing::info_span!("etl_sync", site = %site);
        let _enter = span.enter();

        // idle -> fetching
        let last_sync_ts: Option<TimestampSecs> = self.coord.get_json(&keys::etl_last_sync_ts(site)).await?;
        let now = self.runtime.now();
        let last_sync_dt = last_sync_ts.and_then(|ts| chrono::DateTime::from_timestamp(ts, 0));
        let (start, end) = sync_window(now, last_sync_dt);

        let samples = drain_all_pages(
            self.upstream.as_ref(),
            &self.runtime,
            site,
            start,
            end,
            *knobs::ETL_BATCH_SIZE,
            true,
            *knobs::ETL_MAX_PAGES_PER_SYNC,
        )
        .await?;

        // fetching -> writing
        let inserted = self.write_batches(site, &samples).await?;

        // writing -> committing-watermark
        //
        // An empty upstream response does not mean the window is settled --
        // the point may simply not have reported yet, and a later sample
        // could still land with a timestamp inside [start, end). Only
        // advance the watermark when we actually observed data for this
        // window; otherwise leave it where it was so the next tick re-covers
        // the same window (plus its own lookback buffer) instead of
        // silently skipping it.
        if !samples.is_empty() {
            let watermark = end.timestamp();
            self.coord.put_json(&keys::etl_last_sync_ts(site), &watermark, self.runtime.now_secs()).await?;
        } else {
            tracing::debug!(site = %site, "etl sync saw no samples this tick, watermark not advanced");
        }

        tracing::info!(site = %site, samples_inserted = inserted, pages_capped = samples.len(), "etl sync committed");
        Ok(inserted)
    }

    async fn write_batches(&self, site: &SiteId, samples: &[Sample]) -> anyhow::Result<usize> {
        let mut inserted = 0;
        for batch in samples.chunks(*knobs::ETL_BATCH_SIZE) {
            inserted += self.hot.upsert_batch(site, batch).await?;
        }
        Ok(inserted)
    }

    async fn record_error(&self, site: &SiteId, e: &anyhow::Error) -> anyhow::Result<()> {
        tracing::warn!(site = %site, error = %e, "etl sync failed, watermark not advanced");
        let now = self.runtime.now_secs();
        let key = keys::etl_errors(site);
        let mut log: Vec<ErrorLogEntry> = self.coord.get_json(&key).await?.unwrap_or_default();
        push_bounded_log(&mut log, ErrorLogEntry::new(now, e.msg()), *knobs::ETL_MAX_ERRORS, *knobs::ETL_ERROR_TTL_SECONDS, now);
        self.coord.put_json(&key, &log, now).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use common::runtime::TestRuntime;
    use errors::ErrorMetadata;
    use upstream_client::{
        StubUpstreamApi,
        UpstreamPage,
    };

    use super::*;

    fn site() -> SiteId {
        SiteId::new("site_a")
    }

    #[tokio::test]
    async fn first_sync_inserts_samples_and_advances_watermark() {
        let hot = HotStore::open_in_memory().unwrap();
        let coord = CoordStore::open_in_memory().unwrap();
        let page = UpstreamPage { samples: vec![Sample::new("p1", 1_700_000_000, 1.0).unwrap()], next_cursor: None };
        let upstream: Arc<dyn UpstreamApi> = Arc::new(StubUpstreamApi::new(vec![Ok(page)]));
        let rt = TestRuntime::new(Utc::now(), 1);
        let etl = EtlSync::new(hot.clone(), coord.clone(), upstream, rt.clone());

        let outcome = etl.run_sync(&site()).await.unwrap();
        assert_eq!(outcome.samples_inserted, 1);
        assert!(outcome.error.is_none());

        let status = etl.get_status(&site()).await.unwrap();
        assert!(status.last_sync_ts.is_some());
        assert_eq!(status.last_success_age, Some(0));
    }

    #[tokio::test]
    async fn overlapping_tick_is_suppressed_by_lease() {
        let hot = HotStore::open_in_memory().unwrap();
        let coord = CoordStore::open_in_memory().unwrap();
        let site = site();
        let now = Utc::now();
        coord.acquire_lease(&keys::etl_lease(&site), "other-holder", 300, now.timestamp()).await.unwrap();
        let upstream: Arc<dyn UpstreamApi> = Arc::new(StubUpstreamApi::new(vec![]));
        let rt = TestRuntime::new(now, 1);
        let etl = EtlSync::new(hot, coord, upstream, rt);

        let outcome = etl.run_sync(&site).await.unwrap();
        assert!(outcome.skipped_overlap);
        assert_eq!(outcome.samples_inserted, 0);
    }

    #[tokio::test]
    async fn failed_sync_does_not_advance_watermark_and_logs_error() {
        let hot = HotStore::open_in_memory().unwrap();
        let coord = CoordStore::open_in_memory().unwrap();
        let err = anyhow::anyhow!("boom").context(ErrorMetadata::unavailable("UpstreamTimeout", "timed out"));
        let upstream: Arc<dyn UpstreamApi> = Arc::new(StubUpstreamApi::new(vec![Err(err)]));
        let rt = TestRuntime::new(Utc::now(), 1);
        let etl = EtlSync::new(hot, coord, upstream, rt);

        let outcome = etl.run_sync(&site()).await.unwrap();
        assert_eq!(outcome.samples_inserted, 0);
        assert!(outcome.error.is_some());

        let status = etl.get_status(&site()).await.unwrap();
        assert!(status.last_sync_ts.is_none());
        assert_eq!(status.recent_errors.len(), 1);
    }

    #[tokio::test]
    async fn empty_sync_does_not_advance_watermark() {
        let hot = HotStore::open_in_memory().unwrap();
        let coord = CoordStore::open_in_memory().unwrap();
        let site = site();
        let upstream: Arc<dyn UpstreamApi> =
            Arc::new(StubUpstreamApi::new(vec![Ok(UpstreamPage { samples: vec![], next_cursor: None })]));
        let rt = TestRuntime::new(Utc::now(), 1);
        let etl = EtlSync::new(hot, coord, upstream, rt);

        let outcome = etl.run_sync(&site).await.unwrap();
        assert_eq!(outcome.samples_inserted, 0);
        assert!(outcome.error.is_none());

        let status = etl.get_status(&site).await.unwrap();
        assert!(status.last_sync_ts.is_none());
    }

    #[tokio::test]
    async fn repeated_sync_with_same_samples_is_idempotent() {
        let hot = HotStore::open_in_memory().unwrap();
        let coord = CoordStore::open_in_memory().unwrap();
        let site = site();
        let sample = Sample::new("p1", 1_700_000_000, 1.0).unwrap();
        let upstream: Arc<dyn UpstreamApi> = Arc::new(StubUpstreamApi::new(vec![
            Ok(UpstreamPage { samples: vec![sample.clone()], next_cursor: None }),
            Ok(UpstreamPage { samples: vec![sample.clone()], next_cursor: None }),
        ]));
        let rt = TestRuntime::new(Utc::now(), 1);
        let etl = EtlSync::new(hot.clone(), coord, upstream, rt);

        etl.run_sync(&site).await.unwrap();
        etl.run_sync(&site).await.unwrap();

        let range = common::TimeRange::new(0, 2_000_000_000).unwrap();
        let rows = hot.range_scan(&site, &[], range).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
