//! Bounded exponential backoff with jitter around a single page fetch.
//! Transient failures (timeouts, 5xx, 429) are retried in place; permanent
//! failures (401/403, 400) propagate immediately so the caller doesn't
//! burn its retry budget on something a retry can't fix.

use std::time::Duration;

use chrono::{
    DateTime,
    Utc,
};
use common::{
    backoff::Backoff,
    knobs,
    runtime::Runtime,
    SiteId,
};
use errors::ErrorMetadataAnyhowExt;

use crate::{
    UpstreamApi,
    UpstreamPage,
};

pub async fn fetch_page_with_retry<RT: Runtime>(
    api: &dyn UpstreamApi,
    runtime: &RT,
    site: &SiteId,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    page_size: usize,
    cursor: Option<&str>,
    raw_data: bool,
) -> anyhow::Result<UpstreamPage> {
    let mut backoff = Backoff::new(
        Duration::from_millis(*knobs::UPSTREAM_RETRY_BASE_MS),
        Duration::from_millis(*knobs::UPSTREAM_RETRY_MAX_MS),
    );
    let attempts = *knobs::UPSTREAM_RETRY_ATTEMPTS;
    let mut last_err = None;
    for attempt in 1..=attempts {
        match api.fetch_page(site, start, end, page_size, cursor, raw_data).await {
            Ok(page) => return Ok(page),
            Err(e) if !e.is_retriable() => return Err(e),
            Err(e) => {
                tracing::warn!(site = %site, attempt, attempts, error = %e, "upstream page fetch failed, retrying");
                last_err = Some(e);
                if attempt < attempts {
                    let delay = runtime.with_rng(|rng| backoff.fail(rng));
                    runtime.wait(delay).await;
                }
            },
        }
    }
    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("upstream fetch failed with no recorded error")))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{
        AtomicUsize,
        Ordering,
    };

    use async_trait::async_trait;
    use common::runtime::TestRuntime;
    use errors::ErrorMetadata;

    use super::*;
    use crate::ConfiguredPoint;

    struct FlakyApi {
        fail_times: usize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl UpstreamApi for FlakyApi {
        async fn fetch_page(
            &self,
            _site: &SiteId,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _page_size: usize,
            _cursor: Option<&str>,
            _raw_data: bool,
        ) -> anyhow::Result<UpstreamPage> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(anyhow::anyhow!("timeout").context(ErrorMetadata::unavailable("UpstreamTimeout", "timed out")))
            } else {
                Ok(UpstreamPage { samples: vec![], next_cursor: None })
            }
        }

        async fn configured_points(&self, _site: &SiteId) -> anyhow::Result<Vec<ConfiguredPoint>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let api = FlakyApi { fail_times: 2, calls: AtomicUsize::new(0) };
        let rt = TestRuntime::new(Utc::now(), 1);
        let result = fetch_page_with_retry(&api, &rt, &SiteId::new("site_a"), Utc::now(), Utc::now(), 100, None, true)
            .await;
        assert!(result.is_ok());
        assert_eq!(api.calls.load(Ordering::SeqCst), 3);
    }

    struct PermanentFailApi;

    #[async_trait]
    impl UpstreamApi for PermanentFailApi {
        async fn fetch_page(
            &self,
            _site: &SiteId,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _page_size: usize,
            _cursor: Option<&str>,
            _raw_data: bool,
        ) -> anyhow::Result<UpstreamPage> {
            Err(anyhow::anyhow!("auth").context(ErrorMetadata::unauthenticated("UpstreamAuthFailed", "bad token")))
        }

        async fn configured_points(&self, _site: &SiteId) -> anyhow::Result<Vec<ConfiguredPoint>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn does_not_retry_permanent_failures() {
        let api = PermanentFailApi;
        let rt = TestRuntime::new(Utc::now(), 1);
        let result = fetch_page_with_retry(&api, &rt, &SiteId::new("site_a"), Utc::now(), Utc::now(), 100, None, true)
            .await;
        assert!(result.is_err());
    }
}
