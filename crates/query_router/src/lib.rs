//! Query router: given `(site, points, t_start, t_end)`, plan which
//! tier(s) to consult, fetch hot and/or cold in parallel, merge, and
//! cache. Public operation mirrors §4.4: `query`.

pub mod cache;
pub mod merge;
pub mod planner;

use std::{
    collections::BTreeMap,
    sync::Arc,
    time::{
        Duration,
        Instant,
    },
};

use cache::QueryCache;
use cold_store::{
    chunk,
    ColdStore,
    Storage,
};
use common::{
    knobs,
    runtime::Runtime,
    DataSource,
    PointName,
    QueryStrategy,
    Sample,
    SiteId,
    TimeRange,
};
use errors::ErrorMetadata;
use futures::{
    stream,
    StreamExt,
    TryFutureExt,
};
use hot_store::HotStore;
use planner::QueryPlan;
use serde::{
    Deserialize,
    Serialize,
};
use upstream_client::UpstreamApi;

/// Whether the returned payload came from the cache or was freshly
/// computed. Exposed as the `X-Cache-Status` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            CacheStatus::Hit => "HIT",
            CacheStatus::Miss => "MISS",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub series_by_point: BTreeMap<PointName, Vec<Sample>>,
    pub data_source: DataSource,
    pub strategy: QueryStrategy,
    pub processing_ms: u64,
    pub cache_status: CacheStatus,
}

/// Caller-supplied query options. `use_routing = false` is the
/// operational escape hatch of §4.4: bypass the planner/cache entirely
/// and proxy the upstream API directly.
#[derive(Debug, Clone, Default)]
pub struct QueryOptions {
    pub use_routing: bool,
    pub deadline: Option<Duration>,
}

impl QueryOptions {
    pub fn routed() -> Self {
        Self { use_routing: true, deadline: None }
    }
}

pub struct QueryRouter<S, RT: Runtime> {
    hot: HotStore,
    cold: ColdStore<S>,
    upstream: Option<Arc<dyn UpstreamApi>>,
    cache: QueryCache,
    runtime: RT,
}

impl<S: Storage, RT: Runtime> QueryRouter<S, RT> {
    pub fn new(hot: HotStore, cold: ColdStore<S>, upstream: Option<Arc<dyn UpstreamApi>>, runtime: RT) -> Self {
        Self { hot, cold, upstream, cache: QueryCache::new(*knobs::QUERY_CACHE_MAX_ENTRIES), runtime }
    }

    /// The query operation of §4.4.
    pub async fn query(
        &self,
        site: &SiteId,
        points: &[PointName],
        range: TimeRange,
        opts: QueryOptions,
    ) -> anyhow::Result<QueryResponse> {
        let started = Instant::now();

        let max_range_secs = *knobs::QUERY_MAX_RANGE_DAYS * 86_400;
        if range.end - range.start > max_range_secs {
            anyhow::bail!(ErrorMetadata::bad_request(
                "QueryRangeTooWide",
                format!("query range exceeds QUERY_MAX_RANGE_DAYS ({} days)", *knobs::QUERY_MAX_RANGE_DAYS),
            ));
        }

        if !opts.use_routing {
            return self.run_with_deadline(self.query_legacy_fallback(site, points, range), opts.deadline).await;
        }

        let key = cache::cache_key(site, points, range);
        let now = self.runtime.now_secs();
        if let Some(mut cached) = self.cache.get(key, now) {
            cached.cache_status = CacheStatus::Hit;
            cached.data_source = DataSource::Cache;
            return Ok(cached);
        }

        let mut response = self.run_with_deadline(self.query_uncached(site, points, range), opts.deadline).await?;
        response.processing_ms = started.elapsed().as_millis() as u64;

        let ttl = cache::ttl_for_age(now, range.end);
        self.cache.put(key, response.clone(), now, ttl);
        Ok(response)
    }

    async fn run_with_deadline<F, T>(&self, fut: F, deadline: Option<Duration>) -> anyhow::Result<T>
    where
        F: std::future::Future<Output = anyhow::Result<T>>,
    {
        match deadline {
            Some(d) => match tokio::time::timeout(d, fut).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("query deadline elapsed").context(ErrorMetadata::deadline_exceeded("QueryDeadlineExceeded"))),
            },
            None => fut.await,
        }
    }

    async fn query_uncached(&self, site: &SiteId, points: &[PointName], range: TimeRange) -> anyhow::Result<QueryResponse> {
        let hot_boundary = self.runtime.now_secs() - *knobs::HOT_RETENTION_DAYS * 86_400;
        let plan = planner::plan(range, hot_boundary);

        let (series_by_point, data_source) = match plan {
            QueryPlan::HotOnly(r) => {
                let rows = self.hot_query(site, points, r).await?;
                (merge::merge(rows, Vec::new()), DataSource::Hot)
            },
            QueryPlan::ColdOnly(r) => {
                let rows = self.cold_query(site, points, r).await?;
                (merge::merge(Vec::new(), rows), DataSource::Cold)
            },
            QueryPlan::Split { hot, cold } => {
                let (hot_rows, cold_rows) = futures::try_join!(self.hot_query(site, points, hot), self.cold_query(site, points, cold))?;
                (merge::merge(hot_rows, cold_rows), DataSource::Both)
            },
        };

        Ok(QueryResponse {
            series_by_point,
            data_source,
            strategy: plan.strategy(),
            processing_ms: 0,
            cache_status: CacheStatus::Miss,
        })
    }

    async fn hot_query(&self, site: &SiteId, points: &[PointName], range: TimeRange) -> anyhow::Result<Vec<Sample>> {
        self.hot.range_scan(site, points, range).await
    }

    /// Fetch every cold-tier chunk intersecting `range` with bounded
    /// concurrency (`COLD_FETCH_PARALLELISM`), stream-decoding and
    /// filtering each in place.
    async fn cold_query(&self, site: &SiteId, points: &[PointName], range: TimeRange) -> anyhow::Result<Vec<Sample>> {
        let dates = chunk::dates_intersecting(range);
        let parallelism = *knobs::COLD_FETCH_PARALLELISM;
        let results: Vec<anyhow::Result<Vec<Sample>>> = stream::iter(dates)
            .map(|date| self.cold.query_day(site, date, points, range))
            .buffer_unordered(parallelism)
            .collect()
            .await;
        let mut out = Vec::new();
        for r in results {
            out.extend(r?);
        }
        Ok(out)
    }

    /// `use_routing=false`: bypass the planner and proxy the upstream API
    /// directly, requesting 5-minute pre-aggregated buckets (not raw) --
    /// this is an operational escape hatch, not a data-path requirement,
    /// so it intentionally does not touch either tier or the cache.
    async fn query_legacy_fallback(&self, site: &SiteId, points: &[PointName], range: TimeRange) -> anyhow::Result<QueryResponse> {
        let upstream = self
            .upstream
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("legacy fallback requested but no upstream client configured").context(
                ErrorMetadata::unavailable("LegacyFallbackUnavailable", "use_routing=false requires an upstream client"),
            ))?;
        let start = chrono::DateTime::from_timestamp(range.start, 0).unwrap_or_default();
        let end = chrono::DateTime::from_timestamp(range.end, 0).unwrap_or_default();
        let samples = upstream_client::drain_all_pages(
            upstream.as_ref(),
            &self.runtime,
            site,
            start,
            end,
            *knobs::ETL_BATCH_SIZE,
            false,
            *knobs::ETL_MAX_PAGES_PER_SYNC,
        )
        .map_err(|e| e.context(ErrorMetadata::unavailable("UpstreamProxyFailed", "legacy fallback proxy request failed")))
        .await?;
        let filtered: Vec<Sample> =
            samples.into_iter().filter(|s| points.is_empty() || points.iter().any(|p| p == &s.point)).collect();
        Ok(QueryResponse {
            series_by_point: merge::merge(filtered, Vec::new()),
            data_source: DataSource::Hot,
            strategy: QueryStrategy::Legacy,
            processing_ms: 0,
            cache_status: CacheStatus::Miss,
        })
    }
}
