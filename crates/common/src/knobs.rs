//! Tunable limits for the ETL/backfill/archival/query pipeline, per the
//! configuration list in the external interfaces spec. Every knob here is
//! overridable by environment variable without a code change or restart
//! of the build; see [`crate::env::env_config`].
//!
//! Whichever value governs the hot/cold tier boundary lives in exactly one
//! place ([`HOT_RETENTION_DAYS`]) -- the archival compactor and the query
//! planner both read this static, so they can never disagree about where
//! the boundary is.

use std::{
    sync::LazyLock,
    time::Duration,
};

use crate::env::env_config;

/// Tier boundary: the hot tier holds at most this many days of data after
/// a successful archival pass. Read by both the archival compactor (as
/// the cutoff it moves rows older than) and the query planner (as the
/// boundary between HOT_ONLY/COLD_ONLY/SPLIT).
pub static HOT_RETENTION_DAYS: LazyLock<i64> = LazyLock::new(|| env_config("HOT_RETENTION_DAYS", 20));

/// Grace window added on top of `HOT_RETENTION_DAYS` before the retention
/// invariant is considered violated -- approximately one archival
/// scheduling interval, to tolerate a pass that hasn't run yet today.
pub static RETENTION_GRACE_SECONDS: LazyLock<i64> = LazyLock::new(|| env_config("RETENTION_GRACE_SECONDS", 86_400));

/// How often the ETL synchronizer ticks.
pub static ETL_INTERVAL_SECONDS: LazyLock<u64> = LazyLock::new(|| env_config("ETL_INTERVAL_SECONDS", 300));

/// Overlap window subtracted from `last_sync_ts` on an incremental sync.
/// The reference implementation used a 24h overlap, which rewrites a full
/// day of hot-tier rows on every 5-minute tick; we default to a much
/// shorter overlap (see DESIGN.md for the rationale) while still covering
/// plausible upstream clock skew and late-arriving samples.
pub static ETL_LOOKBACK_BUFFER_MINUTES: LazyLock<i64> =
    LazyLock::new(|| env_config("ETL_LOOKBACK_BUFFER_MINUTES", 90));

/// Age past which `last_sync_ts` is considered stale enough to force a
/// first-sync (24h lookback) rather than an incremental sync.
pub static ETL_FIRST_SYNC_THRESHOLD_DAYS: LazyLock<i64> =
    LazyLock::new(|| env_config("ETL_FIRST_SYNC_THRESHOLD_DAYS", 7));

/// Lookback window used for a first sync (no prior watermark, or a
/// watermark older than `ETL_FIRST_SYNC_THRESHOLD_DAYS`).
pub static ETL_FIRST_SYNC_LOOKBACK_HOURS: LazyLock<i64> =
    LazyLock::new(|| env_config("ETL_FIRST_SYNC_LOOKBACK_HOURS", 24));

/// Max rows buffered before a batch upsert is flushed to the hot tier.
pub static ETL_BATCH_SIZE: LazyLock<usize> = LazyLock::new(|| env_config("ETL_BATCH_SIZE", 1000));

/// Safety cap on upstream pages fetched within one sync invocation, in
/// case an upstream bug returns a cursor that never terminates.
pub static ETL_MAX_PAGES_PER_SYNC: LazyLock<usize> = LazyLock::new(|| env_config("ETL_MAX_PAGES_PER_SYNC", 500));

/// How long a per-site ETL lease is held before it is considered expired
/// and eligible to be reclaimed by another invocation.
pub static ETL_LEASE_SECONDS: LazyLock<u64> = LazyLock::new(|| *ETL_INTERVAL_SECONDS);

/// Upstream pages fetched per `/backfill/tick` invocation, bounding each
/// invocation's CPU/time budget.
pub static BACKFILL_PAGES_PER_INVOCATION: LazyLock<usize> =
    LazyLock::new(|| env_config("BACKFILL_PAGES_PER_INVOCATION", 5));

/// Page size requested from upstream during backfill.
pub static BACKFILL_PAGE_SIZE: LazyLock<usize> = LazyLock::new(|| env_config("BACKFILL_PAGE_SIZE", 100_000));

/// Bounded history of backfill errors retained for diagnostics.
pub static BACKFILL_MAX_ERRORS: LazyLock<usize> = LazyLock::new(|| env_config("BACKFILL_MAX_ERRORS", 50));

/// Bounded history of ETL errors retained for diagnostics.
pub static ETL_MAX_ERRORS: LazyLock<usize> = LazyLock::new(|| env_config("ETL_MAX_ERRORS", 50));

/// TTL for entries in the ETL error log, independent of the bounded count.
pub static ETL_ERROR_TTL_SECONDS: LazyLock<i64> = LazyLock::new(|| env_config("ETL_ERROR_TTL_SECONDS", 7 * 86_400));

/// Widest range a single query is allowed to span.
pub static QUERY_MAX_RANGE_DAYS: LazyLock<i64> = LazyLock::new(|| env_config("QUERY_MAX_RANGE_DAYS", 365));

/// Bounded concurrency for fetching cold-tier daily chunks within one
/// query.
pub static COLD_FETCH_PARALLELISM: LazyLock<usize> = LazyLock::new(|| env_config("COLD_FETCH_PARALLELISM", 8));

/// Per-call upstream HTTP timeout.
pub static UPSTREAM_TIMEOUT_MS: LazyLock<u64> = LazyLock::new(|| env_config("UPSTREAM_TIMEOUT_MS", 30_000));

pub fn upstream_timeout() -> Duration {
    Duration::from_millis(*UPSTREAM_TIMEOUT_MS)
}

/// Retry attempts for a single upstream page fetch.
pub static UPSTREAM_RETRY_ATTEMPTS: LazyLock<u32> = LazyLock::new(|| env_config("UPSTREAM_RETRY_ATTEMPTS", 3));

/// Base delay for upstream page fetch backoff.
pub static UPSTREAM_RETRY_BASE_MS: LazyLock<u64> = LazyLock::new(|| env_config("UPSTREAM_RETRY_BASE_MS", 500));

/// Max delay for upstream page fetch backoff.
pub static UPSTREAM_RETRY_MAX_MS: LazyLock<u64> = LazyLock::new(|| env_config("UPSTREAM_RETRY_MAX_MS", 8_000));

/// Maximum number of entries retained in the query result cache before LRU
/// eviction kicks in.
pub static QUERY_CACHE_MAX_ENTRIES: LazyLock<usize> = LazyLock::new(|| env_config("QUERY_CACHE_MAX_ENTRIES", 10_000));

/// Every worker invocation persists state and exits cleanly after this
/// soft CPU budget, rather than running unbounded -- this is the design
/// basis for backfill's tick model and applies equally to ETL sync and
/// archival passes.
pub static WORKER_SOFT_BUDGET_SECONDS: LazyLock<u64> = LazyLock::new(|| env_config("WORKER_SOFT_BUDGET_SECONDS", 30));
