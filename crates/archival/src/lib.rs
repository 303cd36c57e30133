//! Archival compactor: the daily, age-based move of samples from the hot
//! tier to the cold tier (§4.3). Crash-safe by construction -- a cold
//! chunk write is idempotent (dedup on read-back) and the corresponding
//! hot-tier delete only happens after that write succeeds, so a crash
//! between the two just leaves duplicate rows for the next pass to
//! dedupe away on re-write.

use std::sync::Arc;

use chrono::NaiveDate;
use cold_store::{
    ColdStore,
    Storage,
};
use common::{
    backoff::Backoff,
    knobs,
    runtime::Runtime,
    SiteId,
    TimeRange,
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

/// Per-day outcome of one archival pass, for observability (§4.3 step 5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayResult {
    pub date: NaiveDate,
    pub rows_moved: usize,
    pub new_chunk_size: usize,
}

/// Full report for one `run_archival` invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivalReport {
    pub cutoff: TimestampSecs,
    pub days: Vec<DayResult>,
    /// `true` when this invocation found an already-held lease for this
    /// site and did nothing.
    pub skipped_overlap: bool,
}

pub struct ArchivalCompactor<S, RT: Runtime> {
    hot: HotStore,
    cold: ColdStore<S>,
    coord: CoordStore,
    runtime: RT,
}

fn day_range(date: NaiveDate) -> TimeRange {
    let start = date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
    TimeRange::new(start, start + 86_400).expect("a UTC calendar day is always a valid range")
}

impl<S: Storage, RT: Runtime> ArchivalCompactor<S, RT> {
    pub fn new(hot: HotStore, cold: ColdStore<S>, coord: CoordStore, runtime: RT) -> Self {
        Self { hot, cold, coord, runtime }
    }

    /// Runs one archival pass for `site`: scan hot rows older than
    /// `now - HOT_RETENTION_DAYS`, grouped by UTC day, and for each day
    /// move its rows to the matching cold chunk (§4.3 steps 1-5).
    /// Serial per site via a short lease, matching the concurrency model's
    /// "archival per site is serial; across sites parallel."
    pub async fn run_archival(&self, site: &SiteId) -> anyhow::Result<ArchivalReport> {
        let holder = uuid::Uuid::new_v4().to_string();
        let now = self.runtime.now_secs();
        let lease_key = keys::archival_lease(site);
        if !self.coord.acquire_lease(&lease_key, &holder, *knobs::WORKER_SOFT_BUDGET_SECONDS * 2, now).await? {
            tracing::info!(site = %site, "archival pass already in progress, suppressing overlapping tick");
            return Ok(ArchivalReport { cutoff: now, days: Vec::new(), skipped_overlap: true });
        }

        let result = self.run_archival_inner(site, now).await;
        self.coord.release_lease(&lease_key, &holder).await?;
        result
    }

    async fn run_archival_inner(&self, site: &SiteId, now: TimestampSecs) -> anyhow::Result<ArchivalReport> {
        let span = tracing::info_span!("archival", site = %site);
        let _enter = span.enter();

        let cutoff = now - *knobs::HOT_RETENTION_DAYS * 86_400;
        let grouped = self.hot.rows_older_than_grouped_by_day(site, cutoff).await?;

        let mut days = Vec::with_capacity(grouped.len());
        for (date, rows) in grouped {
            let day_result = self.move_day(site, date, &rows, cutoff).await?;
            tracing::info!(
                site = %site,
                date = %date,
                rows_moved = day_result.rows_moved,
                new_chunk_size = day_result.new_chunk_size,
                "archived day to cold tier"
            );
            days.push(day_result);
        }

        Ok(ArchivalReport { cutoff, days, skipped_overlap: false })
    }

    /// Moves one day's rows: write (merge-dedup) the cold chunk first,
    /// then delete the hot tier range that was actually archived. On the
    /// boundary day `cutoff` falls strictly inside `day_range(date)`, so the
    /// delete is clipped to `[day_start, cutoff)` -- rows at or after
    /// `cutoff` are still within the retention window and were never handed
    /// to `rows_older_than_grouped_by_day`, so deleting the full calendar
    /// day would drop them from both tiers. The order of write-then-delete
    /// matters -- see the crate-level doc comment on crash safety.
    async fn move_day(
        &self,
        site: &SiteId,
        date: NaiveDate,
        rows: &[common::Sample],
        cutoff: TimestampSecs,
    ) -> anyhow::Result<DayResult> {
        let mut backoff = Backoff::new(std::time::Duration::from_millis(200), std::time::Duration::from_secs(5));
        let meta = loop {
            match self.cold.append_day(site, date, rows).await {
                Ok(meta) => break meta,
                Err(e) if e.is_retriable() && backoff.failures() < 3 => {
                    let delay = self.runtime.with_rng(|rng| backoff.fail(rng));
                    tracing::warn!(site = %site, date = %date, error = %e, "cold chunk write failed, retrying");
                    self.runtime.wait(delay).await;
                },
                Err(e) => return Err(e),
            }
        };

        let (archived_range, _) = day_range(date).split_at(cutoff);
        let range = archived_range.expect("rows_older_than_grouped_by_day only yields days with rows before cutoff");
        let rows_moved = self.hot.delete_range(site, range).await?;

        Ok(DayResult { date, rows_moved, new_chunk_size: meta.compressed_size })
    }
}
