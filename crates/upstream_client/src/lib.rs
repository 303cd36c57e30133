//! Client for the upstream IoT API: cursor-paginated raw timeseries and
//! the configured-points listing. This is the single place upstream's
//! duck-typed JSON (mixed casing, millisecond timestamps) gets normalized
//! into this system's internal [`common::Sample`] representation -- every
//! other component in the tree only ever sees normalized samples.

mod retry;

use async_trait::async_trait;
use chrono::{
    DateTime,
    Utc,
};
use common::{
    knobs,
    runtime::Runtime,
    PointName,
    Sample,
    SiteId,
};
use errors::ErrorMetadata;
use serde::Deserialize;

pub use crate::retry::fetch_page_with_retry;

/// One page of raw upstream samples plus the cursor for the next page, if
/// any. `next_cursor` is empty (`None`) exactly when the upstream
/// pagination is exhausted.
#[derive(Debug, Clone)]
pub struct UpstreamPage {
    pub samples: Vec<Sample>,
    pub next_cursor: Option<String>,
}

/// Upstream's raw wire shape for one data point in a page. Kept private to
/// this crate; callers only ever see [`Sample`].
#[derive(Debug, Deserialize)]
struct RawPoint {
    point_name: String,
    timestamp_ms: i64,
    value: f64,
}

#[derive(Debug, Deserialize)]
struct PaginatedResponse {
    data: Vec<RawPoint>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfiguredPoint {
    pub name: String,
    pub display_name: Option<String>,
    pub unit: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfiguredPointsResponse {
    items: Vec<ConfiguredPoint>,
}

/// A fetch-one-page abstraction so `etl_sync` and `backfill` can be tested
/// against a stub without any network I/O, and so both components share
/// exactly one retry/backoff policy implementation.
#[async_trait]
pub trait UpstreamApi: Send + Sync {
    async fn fetch_page(
        &self,
        site: &SiteId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page_size: usize,
        cursor: Option<&str>,
        raw_data: bool,
    ) -> anyhow::Result<UpstreamPage>;

    async fn configured_points(&self, site: &SiteId) -> anyhow::Result<Vec<ConfiguredPoint>>;
}

/// Real HTTP-backed implementation.
pub struct HttpUpstreamApi {
    http: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl HttpUpstreamApi {
    pub fn new(base_url: impl Into<String>, bearer_token: impl Into<String>) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder().timeout(knobs::upstream_timeout()).build()?;
        Ok(Self { http, base_url: base_url.into(), bearer_token: bearer_token.into() })
    }

    /// Upstream's auth header is a known quirk: it must be the
    /// case-sensitive lowercase header name `authorization`, not the
    /// conventional `Authorization`. `reqwest`'s header map is
    /// case-insensitive for lookups but preserves whatever casing we set,
    /// so we set it explicitly by name here rather than relying on
    /// `bearer_auth`, whose casing is an implementation detail we don't
    /// want to depend on.
    fn auth_header_value(&self) -> String {
        format!("Bearer {}", self.bearer_token)
    }
}

#[async_trait]
impl UpstreamApi for HttpUpstreamApi {
    async fn fetch_page(
        &self,
        site: &SiteId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        page_size: usize,
        cursor: Option<&str>,
        raw_data: bool,
    ) -> anyhow::Result<UpstreamPage> {
        let url = format!("{}/api/sites/{}/timeseries/paginated", self.base_url, site.as_str());
        let mut req = self
            .http
            .get(&url)
            .header("authorization", self.auth_header_value())
            .query(&[
                ("start_time", start.to_rfc3339()),
                ("end_time", end.to_rfc3339()),
                ("page_size", page_size.to_string()),
                ("raw_data", raw_data.to_string()),
            ]);
        if let Some(cursor) = cursor {
            req = req.query(&[("cursor", cursor)]);
        }
        let resp = req.send().await.map_err(classify_reqwest_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(classify_http_status(status, "timeseries/paginated"));
        }
        let body: PaginatedResponse = resp.json().await.map_err(classify_reqwest_err)?;
        let samples = body
            .data
            .into_iter()
            .map(|p| Sample::new(PointName::new(p.point_name), p.timestamp_ms.div_euclid(1000), p.value))
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(UpstreamPage { samples, next_cursor: body.next_cursor.filter(|c| !c.is_empty()) })
    }

    async fn configured_points(&self, site: &SiteId) -> anyhow::Result<Vec<ConfiguredPoint>> {
        let url = format!("{}/api/sites/{}/configured_points", self.base_url, site.as_str());
        let resp = self
            .http
            .get(&url)
            .header("authorization", self.auth_header_value())
            .send()
            .await
            .map_err(classify_reqwest_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(classify_http_status(status, "configured_points"));
        }
        let body: ConfiguredPointsResponse = resp.json().await.map_err(classify_reqwest_err)?;
        Ok(body.items)
    }
}

fn classify_reqwest_err(e: reqwest::Error) -> anyhow::Error {
    if e.is_timeout() {
        anyhow::anyhow!(e).context(ErrorMetadata::unavailable("UpstreamTimeout", "upstream request timed out"))
    } else {
        anyhow::anyhow!(e).context(ErrorMetadata::unavailable("UpstreamUnreachable", "upstream request failed"))
    }
}

fn classify_http_status(status: reqwest::StatusCode, path: &str) -> anyhow::Error {
    if status.as_u16() == 401 || status.as_u16() == 403 {
        anyhow::anyhow!("upstream {path} returned {status}")
            .context(ErrorMetadata::unauthenticated("UpstreamAuthFailed", format!("upstream rejected credentials on {path}")))
    } else if status.as_u16() == 429 || status.is_server_error() {
        anyhow::anyhow!("upstream {path} returned {status}")
            .context(ErrorMetadata::overloaded("UpstreamTransient", format!("upstream {path} returned {status}")))
    } else {
        anyhow::anyhow!("upstream {path} returned {status}")
            .context(ErrorMetadata::internal("UpstreamPermanent", format!("upstream {path} returned {status}")))
    }
}

/// Test double serving preprogrammed pages, keyed by cursor. Lets
/// `etl_sync`/`backfill` tests exercise multi-page fetch loops, retryable
/// failures, and empty-first-page detection without any network access.
pub struct StubUpstreamApi {
    pages: std::sync::Mutex<std::collections::VecDeque<anyhow::Result<UpstreamPage>>>,
    configured: Vec<ConfiguredPoint>,
}

impl StubUpstreamApi {
    pub fn new(pages: Vec<anyhow::Result<UpstreamPage>>) -> Self {
        Self { pages: std::sync::Mutex::new(pages.into()), configured: Vec::new() }
    }
}

#[async_trait]
impl UpstreamApi for StubUpstreamApi {
    async fn fetch_page(
        &self,
        _site: &SiteId,
        _start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _page_size: usize,
        _cursor: Option<&str>,
        _raw_data: bool,
    ) -> anyhow::Result<UpstreamPage> {
        let mut pages = self.pages.lock().unwrap();
        match pages.pop_front() {
            Some(result) => result,
            None => Ok(UpstreamPage { samples: Vec::new(), next_cursor: None }),
        }
    }

    async fn configured_points(&self, _site: &SiteId) -> anyhow::Result<Vec<ConfiguredPoint>> {
        Ok(self.configured.clone())
    }
}

/// Window selection for an ETL sync, per the incremental-vs-first-sync
/// rule. `last_sync_ts` is `None` or older than
/// `ETL_FIRST_SYNC_THRESHOLD_DAYS` -> first sync (last 24h); otherwise ->
/// incremental sync from `last_sync_ts - buffer` to now.
pub fn sync_window(now: DateTime<Utc>, last_sync_ts: Option<DateTime<Utc>>) -> (DateTime<Utc>, DateTime<Utc>) {
    let threshold = now - chrono::Duration::days(*knobs::ETL_FIRST_SYNC_THRESHOLD_DAYS);
    match last_sync_ts {
        Some(ts) if ts >= threshold => {
            let buffer = chrono::Duration::minutes(*knobs::ETL_LOOKBACK_BUFFER_MINUTES);
            (ts - buffer, now)
        },
        _ => (now - chrono::Duration::hours(*knobs::ETL_FIRST_SYNC_LOOKBACK_HOURS), now),
    }
}

pub async fn drain_all_pages<RT: Runtime>(
    api: &dyn UpstreamApi,
    runtime: &RT,
    site: &SiteId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    page_size: usize,
    raw_data: bool,
    max_pages: usize,
) -> anyhow::Result<Vec<Sample>> {
    let mut out = Vec::new();
    let mut cursor: Option<String> = None;
    for _ in 0..max_pages {
        let page = fetch_page_with_retry(api, runtime, site, start, end, page_size, cursor.as_deref(), raw_data).await?;
        out.extend(page.samples);
        match page.next_cursor {
            Some(c) => cursor = Some(c),
            None => return Ok(out),
        }
    }
    tracing::warn!(site = %site, "hit max_pages safety cap while draining upstream pages");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use common::runtime::ProdRuntime;

    use super::*;

    #[test]
    fn sync_window_is_first_sync_when_no_watermark() {
        let now = Utc::now();
        let (start, end) = sync_window(now, None);
        assert_eq!(end, now);
        assert_eq!(start, now - chrono::Duration::hours(*knobs::ETL_FIRST_SYNC_LOOKBACK_HOURS));
    }

    #[test]
    fn sync_window_is_first_sync_when_watermark_stale() {
        let now = Utc::now();
        let stale = now - chrono::Duration::days(*knobs::ETL_FIRST_SYNC_THRESHOLD_DAYS + 1);
        let (start, _end) = sync_window(now, Some(stale));
        assert_eq!(start, now - chrono::Duration::hours(*knobs::ETL_FIRST_SYNC_LOOKBACK_HOURS));
    }

    #[test]
    fn sync_window_is_incremental_with_short_buffer_when_watermark_fresh() {
        let now = Utc::now();
        let recent = now - chrono::Duration::hours(1);
        let (start, end) = sync_window(now, Some(recent));
        assert_eq!(end, now);
        assert_eq!(start, recent - chrono::Duration::minutes(*knobs::ETL_LOOKBACK_BUFFER_MINUTES));
    }

    #[tokio::test]
    async fn drain_all_pages_stops_at_empty_cursor() {
        let p1 = UpstreamPage { samples: vec![Sample::new("p1", 1, 1.0).unwrap()], next_cursor: Some("c1".into()) };
        let p2 = UpstreamPage { samples: vec![Sample::new("p1", 2, 2.0).unwrap()], next_cursor: None };
        let api = StubUpstreamApi::new(vec![Ok(p1), Ok(p2)]);
        let rt = ProdRuntime;
        let samples = drain_all_pages(&api, &rt, &SiteId::new("site_a"), Utc::now(), Utc::now(), 100, true, 10)
            .await
            .unwrap();
        assert_eq!(samples.len(), 2);
    }
}
