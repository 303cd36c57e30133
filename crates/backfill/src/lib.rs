//! Backfill engine: long-horizon historical import to the cold tier, day
//! by day, across many short-lived `tick` invocations. Public operations
//! mirror §4.2: `start`, `status`, `tick`.
//!
//! The whole job state is a value ([`BackfillState`]) persisted atomically
//! to the coordination store after every invocation -- a crash or
//! restart between ticks resumes from exactly `(current_date,
//! current_cursor)`, nothing is held only in process memory.

use std::{
    collections::BTreeSet,
    sync::Arc,
};

use chrono::{
    Datelike,
    NaiveDate,
};
use cold_store::{
    ColdStore,
    Storage,
};
use common::{
    knobs,
    push_bounded_log,
    runtime::Runtime,
    ErrorLogEntry,
    SiteId,
};
use coord_store::{
    keys,
    CoordStore,
};
use errors::{
    ErrorMetadata,
    ErrorMetadataAnyhowExt,
};
use serde::{
    Deserialize,
    Serialize,
};
use upstream_client::{
    fetch_page_with_retry,
    UpstreamApi,
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BackfillStatus {
    Running,
    Complete,
    Error,
}

/// The full, atomically-persisted state of one backfill job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackfillState {
    pub job_id: String,
    pub site: SiteId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub current_date: NaiveDate,
    pub current_cursor: Option<String>,
    /// Pages already received for `current_date` in this or a prior
    /// invocation -- used to tell "first page of the day" (subject to the
    /// empty-first-page invariant check) from a legitimate end-of-cursor
    /// empty page after the day already has data.
    pub current_day_pages_received: usize,
    pub completed_dates: BTreeSet<NaiveDate>,
    /// Days an operator has explicitly confirmed are legitimately empty,
    /// bypassing the empty-first-page failure check for that day only.
    pub empty_day_markers: BTreeSet<NaiveDate>,
    pub samples_fetched: u64,
    pub errors: Vec<ErrorLogEntry>,
    pub status: BackfillStatus,
}

impl BackfillState {
    fn total_days(&self) -> i64 {
        (self.end_date - self.start_date).num_days() + 1
    }

    pub fn percent_complete(&self) -> f64 {
        let total = self.total_days();
        if total <= 0 {
            return 1.0;
        }
        self.completed_dates.len() as f64 / total as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackfillStatusSnapshot {
    #[serde(flatten)]
    pub state: BackfillState,
    pub percent_complete: f64,
}

pub struct BackfillEngine<S, RT: Runtime> {
    cold: ColdStore<S>,
    coord: CoordStore,
    upstream: Arc<dyn UpstreamApi>,
    runtime: RT,
}

impl<S: Storage, RT: Runtime> BackfillEngine<S, RT> {
    pub fn new(cold: ColdStore<S>, coord: CoordStore, upstream: Arc<dyn UpstreamApi>, runtime: RT) -> Self {
        Self { cold, coord, upstream, runtime }
    }

    /// `POST /backfill/start`: create a new job for `[start_date,
    /// end_date]` inclusive and persist its initial state.
    pub async fn start(&self, site: SiteId, start_date: NaiveDate, end_date: NaiveDate) -> anyhow::Result<String> {
        if start_date > end_date {
            anyhow::bail!(ErrorMetadata::bad_request("InvalidBackfillRange", "start_date must be <= end_date"));
        }
        let job_id = uuid::Uuid::new_v4().to_string();
        let state = BackfillState {
            job_id: job_id.clone(),
            site,
            start_date,
            end_date,
            current_date: start_date,
            current_cursor: None,
            current_day_pages_received: 0,
            completed_dates: BTreeSet::new(),
            empty_day_markers: BTreeSet::new(),
            samples_fetched: 0,
            errors: Vec::new(),
            status: BackfillStatus::Running,
        };
        self.coord.put_json(&keys::backfill_state(&job_id), &state, self.runtime.now_secs()).await?;
        Ok(job_id)
    }

    /// `GET /backfill/status`.
    pub async fn status(&self, job_id: &str) -> anyhow::Result<BackfillStatusSnapshot> {
        let state = self.load(job_id).await?;
        let percent_complete = state.percent_complete();
        Ok(BackfillStatusSnapshot { state, percent_complete })
    }

    /// Operator- or scheduler-invoked: mark `date` as a legitimately
    /// empty day, so the empty-first-page failure check doesn't keep
    /// retrying it forever.
    pub async fn mark_day_empty(&self, job_id: &str, date: NaiveDate) -> anyhow::Result<()> {
        let mut state = self.load(job_id).await?;
        state.empty_day_markers.insert(date);
        self.persist(&state).await
    }

    async fn load(&self, job_id: &str) -> anyhow::Result<BackfillState> {
        self.coord
            .get_json(&keys::backfill_state(job_id))
            .await?
            .ok_or_else(|| anyhow::anyhow!("unknown backfill job {job_id}").context(ErrorMetadata::not_found("BackfillJobNotFound", "no backfill job with that id")))
    }

    async fn persist(&self, state: &BackfillState) -> anyhow::Result<()> {
        self.coord.put_json(&keys::backfill_state(&state.job_id), state, self.runtime.now_secs()).await
    }

    /// `POST /backfill/tick`: process up to `BACKFILL_PAGES_PER_INVOCATION`
    /// upstream pages, then persist state unconditionally (success or
    /// failure) before returning. Idempotent and safe to call repeatedly,
    /// including after a restart.
    pub async fn tick(&self, job_id: &str) -> anyhow::Result<BackfillStatusSnapshot> {
        let mut state = self.load(job_id).await?;
        if state.status != BackfillStatus::Running {
            let percent_complete = state.percent_complete();
            return Ok(BackfillStatusSnapshot { state, percent_complete });
        }

        let mut pages_budget = *knobs::BACKFILL_PAGES_PER_INVOCATION;
        let holder = uuid::Uuid::new_v4().to_string();
        let lease_key = keys::backfill_lease(job_id);
        let now = self.runtime.now_secs();
        if !self.coord.acquire_lease(&lease_key, &holder, *knobs::WORKER_SOFT_BUDGET_SECONDS * 2, now).await? {
            tracing::info!(job_id, "backfill tick already in progress, suppressing overlapping invocation");
            let percent_complete = state.percent_complete();
            return Ok(BackfillStatusSnapshot { state, percent_complete });
        }

        while pages_budget > 0 && state.current_date <= state.end_date {
            if state.current_day_pages_received == 0 && state.empty_day_markers.contains(&state.current_date) {
                self.complete_current_day(&mut state);
                continue;
            }

            let page_result = self.fetch_one_page(&state).await;
            match page_result {
                Ok(page) => {
                    pages_budget -= 1;
                    state.current_day_pages_received += 1;
                    state.samples_fetched += page.samples.len() as u64;
                    if !page.samples.is_empty() {
                        self.cold.append_day(&state.site, state.current_date, &page.samples).await?;
                    }
                    match page.next_cursor {
                        Some(cursor) => {
                            state.current_cursor = Some(cursor);
                        },
                        None if state.current_day_pages_received == 1 && page.samples.is_empty() => {
                            // Invariant violation: zero samples on the day's very
                            // first page with no cursor at all. Don't mark
                            // complete -- retry the same day next tick.
                            let now = self.runtime.now_secs();
                            push_bounded_log(
                                &mut state.errors,
                                ErrorLogEntry::new(now, format!("{} yielded zero samples on first page, not marking complete", state.current_date)),
                                *knobs::BACKFILL_MAX_ERRORS,
                                30 * 86_400,
                                now,
                            );
                            state.current_cursor = None;
                            break;
                        },
                        None => {
                            self.complete_current_day(&mut state);
                        },
                    }
                },
                Err(e) => {
                    let now = self.runtime.now_secs();
                    push_bounded_log(&mut state.errors, ErrorLogEntry::new(now, e.msg()), *knobs::BACKFILL_MAX_ERRORS, 30 * 86_400, now);
                    tracing::warn!(job_id, site = %state.site, date = %state.current_date, error = %e, "backfill page fetch failed, will retry");
                    break;
                },
            }
        }

        if state.current_date > state.end_date {
            state.status = BackfillStatus::Complete;
        }

        self.persist(&state).await?;
        self.coord.release_lease(&lease_key, &holder).await?;

        let percent_complete = state.percent_complete();
        Ok(BackfillStatusSnapshot { state, percent_complete })
    }

    fn complete_current_day(&self, state: &mut BackfillState) {
        state.completed_dates.insert(state.current_date);
        state.current_date = state.current_date.succ_opt().unwrap_or(state.current_date + chrono::Duration::days(1));
        state.current_cursor = None;
        state.current_day_pages_received = 0;
    }

    async fn fetch_one_page(&self, state: &BackfillState) -> anyhow::Result<upstream_client::UpstreamPage> {
        let day_start = state.current_date.and_hms_opt(0, 0, 0).unwrap().and_utc();
        let day_end = state.current_date.and_hms_opt(23, 59, 59).unwrap().and_utc();
        fetch_page_with_retry(
            self.upstream.as_ref(),
            &self.runtime,
            &state.site,
            day_start,
            day_end,
            *knobs::BACKFILL_PAGE_SIZE,
            state.current_cursor.as_deref(),
            true,
        )
        .await
    }
}
