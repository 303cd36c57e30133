//! Coordination-store key builders, matching the persisted-state layout:
//! `etl:{site}:last_sync_ts`, `etl:{site}:errors`, `backfill:{job}:state`.
//! Centralized here so no caller hand-assembles a key string and risks a
//! typo'd prefix diverging between writer and reader.

use common::SiteId;

pub fn etl_last_sync_ts(site: &SiteId) -> String {
    format!("etl:{}:last_sync_ts", site.as_str())
}

pub fn etl_errors(site: &SiteId) -> String {
    format!("etl:{}:errors", site.as_str())
}

pub fn etl_lease(site: &SiteId) -> String {
    format!("etl:{}:lease", site.as_str())
}

pub fn archival_lease(site: &SiteId) -> String {
    format!("archival:{}:lease", site.as_str())
}

pub fn backfill_state(job_id: &str) -> String {
    format!("backfill:{job_id}:state")
}

pub fn backfill_lease(job_id: &str) -> String {
    format!("backfill:{job_id}:lease")
}
