//! Query result cache: an in-process, size-bounded LRU keyed by a stable
//! hash over `(site, sorted(points), t_start, t_end)`, with TTL tiering
//! by data age (§4.4). Read before planning, written after a successful
//! merge.
//!
//! `lru` (the crate) provides the eviction policy directly rather than
//! this module hand-rolling an intrusive linked list, matching the
//! ambient-stack decision in SPEC_FULL §4.4.1.

use std::num::NonZeroUsize;

use common::{
    PointName,
    SiteId,
    TimeRange,
    TimestampSecs,
};
use lru::LruCache;
use sha2::{
    Digest,
    Sha256,
};

use crate::QueryResponse;

/// Stable hash over the canonicalized query key. `u64` rather than the
/// full SHA-256 digest: collisions only cost a spurious cache miss (the
/// merge is re-run, never wrong), so 64 bits of a cryptographic hash is
/// ample headroom for a process-local cache.
pub fn cache_key(site: &SiteId, points: &[PointName], range: TimeRange) -> u64 {
    let mut sorted: Vec<&str> = points.iter().map(|p| p.as_str()).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    hasher.update(site.as_str().as_bytes());
    hasher.update(b"\0");
    for p in &sorted {
        hasher.update(p.as_bytes());
        hasher.update(b"\0");
    }
    hasher.update(range.start.to_le_bytes());
    hasher.update(range.end.to_le_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[0..8].try_into().expect("sha256 digest is at least 8 bytes"))
}

/// TTL tiering by data age (`age = now - t_end`), per §4.4: the more
/// stale the queried range, the less likely it is to be revised by a
/// late-arriving sample, so the cache can hold it longer.
pub fn ttl_for_age(now: TimestampSecs, t_end: TimestampSecs) -> i64 {
    let age = (now - t_end).max(0);
    const DAY: i64 = 86_400;
    if age < DAY {
        5 * 60
    } else if age < 7 * DAY {
        30 * 60
    } else if age < 30 * DAY {
        60 * 60
    } else {
        24 * 60 * 60
    }
}

struct Entry {
    response: QueryResponse,
    computed_at: TimestampSecs,
    ttl_seconds: i64,
}

pub struct QueryCache {
    inner: std::sync::Mutex<LruCache<u64, Entry>>,
}

impl QueryCache {
    pub fn new(max_entries: usize) -> Self {
        let cap = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::new(1).unwrap());
        Self { inner: std::sync::Mutex::new(LruCache::new(cap)) }
    }

    /// Returns a cached response if present and not yet past its TTL.
    /// An expired entry is evicted on read rather than left to linger
    /// until LRU pressure removes it.
    pub fn get(&self, key: u64, now: TimestampSecs) -> Option<QueryResponse> {
        let mut inner = self.inner.lock().unwrap();
        let expired = match inner.get(&key) {
            Some(entry) => now - entry.computed_at > entry.ttl_seconds,
            None => return None,
        };
        if expired {
            inner.pop(&key);
            return None;
        }
        inner.get(&key).map(|e| e.response.clone())
    }

    pub fn put(&self, key: u64, response: QueryResponse, now: TimestampSecs, ttl_seconds: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.put(key, Entry { response, computed_at: now, ttl_seconds });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cache_key_is_order_independent_over_points() {
        let site = SiteId::new("site_a");
        let range = TimeRange::new(0, 100).unwrap();
        let a = cache_key(&site, &[PointName::new("p1"), PointName::new("p2")], range);
        let b = cache_key(&site, &[PointName::new("p2"), PointName::new("p1")], range);
        assert_eq!(a, b);
    }

    #[test]
    fn cache_key_differs_on_range() {
        let site = SiteId::new("site_a");
        let points = [PointName::new("p1")];
        let a = cache_key(&site, &points, TimeRange::new(0, 100).unwrap());
        let b = cache_key(&site, &points, TimeRange::new(0, 200).unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn ttl_tiers_by_age() {
        let now = 1_000_000;
        assert_eq!(ttl_for_age(now, now), 300);
        assert_eq!(ttl_for_age(now, now - 2 * 86_400), 1800);
        assert_eq!(ttl_for_age(now, now - 10 * 86_400), 3600);
        assert_eq!(ttl_for_age(now, now - 40 * 86_400), 86_400);
    }

    #[test]
    fn get_returns_none_past_ttl() {
        let cache = QueryCache::new(10);
        let resp = QueryResponse {
            series_by_point: Default::default(),
            data_source: common::DataSource::Hot,
            strategy: common::QueryStrategy::HotOnly,
            processing_ms: 0,
            cache_status: crate::CacheStatus::Miss,
        };
        cache.put(1, resp, 1000, 60);
        assert!(cache.get(1, 1030).is_some());
        assert!(cache.get(1, 1200).is_none());
    }

    #[test]
    fn put_then_get_round_trips_within_ttl() {
        let cache = QueryCache::new(10);
        let resp = QueryResponse {
            series_by_point: Default::default(),
            data_source: common::DataSource::Cold,
            strategy: common::QueryStrategy::ColdOnly,
            processing_ms: 5,
            cache_status: crate::CacheStatus::Miss,
        };
        cache.put(42, resp.clone(), 1000, 300);
        let got = cache.get(42, 1100).unwrap();
        assert_eq!(got.data_source, common::DataSource::Cold);
    }
}
