//! The hot tier: a SQLite-backed keyed store for recent samples. Primary
//! key `(site, point, timestamp)` makes every write an upsert, which is
//! the dedup/idempotency mechanism invariant 1 of the data model relies
//! on.
//!
//! `rusqlite` is synchronous, so every call here runs the actual query on
//! a blocking thread via `spawn_blocking` and only awaits the join --
//! matching the teacher's own note that a single SQLite connection can't
//! be queried concurrently, just wrapped so it doesn't stall the async
//! runtime.

use std::{
    collections::BTreeMap,
    path::Path,
    sync::{
        Arc,
        Mutex,
    },
};

use chrono::NaiveDate;
use common::{
    PointName,
    Sample,
    SiteId,
    TimeRange,
};
use rusqlite::{
    params,
    params_from_iter,
    Connection,
};

const INIT_SQL: &str = "
CREATE TABLE IF NOT EXISTS timeseries (
    site TEXT NOT NULL,
    point TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    value REAL NOT NULL,
    PRIMARY KEY (site, point, timestamp)
) WITHOUT ROWID;
CREATE INDEX IF NOT EXISTS timeseries_site_ts ON timeseries (site, timestamp);
";

#[derive(Clone)]
pub struct HotStore {
    inner: Arc<Mutex<Connection>>,
}

impl HotStore {
    pub fn open(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(INIT_SQL)?;
        Ok(Self { inner: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(INIT_SQL)?;
        Ok(Self { inner: Arc::new(Mutex::new(conn)) })
    }

    /// Upsert a batch of samples for `site` in one transaction. Returns
    /// the number of rows affected (inserts + replaces). Idempotent: an
    /// identical batch applied twice leaves the same final state
    /// (invariant 1).
    pub async fn upsert_batch(&self, site: &SiteId, samples: &[Sample]) -> anyhow::Result<usize> {
        let inner = self.inner.clone();
        let site = site.clone();
        let samples = samples.to_vec();
        tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
            let mut conn = inner.lock().unwrap();
            let tx = conn.transaction()?;
            let mut affected = 0;
            {
                let mut stmt = tx.prepare_cached(
                    "INSERT INTO timeseries (site, point, timestamp, value) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT (site, point, timestamp) DO UPDATE SET value = excluded.value",
                )?;
                for s in &samples {
                    affected += stmt.execute(params![site.as_str(), s.point.as_str(), s.timestamp, s.value.get()])?;
                }
            }
            tx.commit()?;
            Ok(affected)
        })
        .await?
    }

    /// Range scan over `(site, point in points, timestamp in range)`,
    /// ascending by timestamp. `points` empty means "all points."
    pub async fn range_scan(&self, site: &SiteId, points: &[PointName], range: TimeRange) -> anyhow::Result<Vec<Sample>> {
        let inner = self.inner.clone();
        let site = site.clone();
        let points: Vec<String> = points.iter().map(|p| p.as_str().to_string()).collect();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Vec<Sample>> {
            let conn = inner.lock().unwrap();
            let rows = if points.is_empty() {
                let mut stmt = conn.prepare_cached(
                    "SELECT point, timestamp, value FROM timeseries
                     WHERE site = ?1 AND timestamp >= ?2 AND timestamp < ?3
                     ORDER BY timestamp ASC",
                )?;
                query_samples(&mut stmt, params![site.as_str(), range.start, range.end])?
            } else {
                let placeholders = std::iter::repeat("?").take(points.len()).collect::<Vec<_>>().join(",");
                let sql = format!(
                    "SELECT point, timestamp, value FROM timeseries
                     WHERE site = ? AND timestamp >= ? AND timestamp < ? AND point IN ({placeholders})
                     ORDER BY timestamp ASC"
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut bound: Vec<Box<dyn rusqlite::ToSql>> = vec![
                    Box::new(site.as_str().to_string()),
                    Box::new(range.start),
                    Box::new(range.end),
                ];
                for p in &points {
                    bound.push(Box::new(p.clone()));
                }
                query_samples(&mut stmt, params_from_iter(bound.iter().map(|b| b.as_ref())))?
            };
            Ok(rows)
        })
        .await?
    }

    /// Delete all rows for `site` with `timestamp` in `range`. Used by the
    /// archival compactor, always called after the corresponding cold
    /// chunk write has succeeded (failure semantics in the archival
    /// design rely on this ordering).
    pub async fn delete_range(&self, site: &SiteId, range: TimeRange) -> anyhow::Result<usize> {
        let inner = self.inner.clone();
        let site = site.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
            let conn = inner.lock().unwrap();
            let n = conn.execute(
                "DELETE FROM timeseries WHERE site = ?1 AND timestamp >= ?2 AND timestamp < ?3",
                params![site.as_str(), range.start, range.end],
            )?;
            Ok(n)
        })
        .await?
    }

    /// Rows older than `cutoff`, grouped by UTC calendar day -- exactly
    /// the grouping the archival compactor needs to build one cold chunk
    /// per day.
    pub async fn rows_older_than_grouped_by_day(
        &self,
        site: &SiteId,
        cutoff: common::TimestampSecs,
    ) -> anyhow::Result<BTreeMap<NaiveDate, Vec<Sample>>> {
        let inner = self.inner.clone();
        let site = site.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<BTreeMap<NaiveDate, Vec<Sample>>> {
            let conn = inner.lock().unwrap();
            let mut stmt = conn.prepare_cached(
                "SELECT point, timestamp, value FROM timeseries WHERE site = ?1 AND timestamp < ?2 ORDER BY timestamp ASC",
            )?;
            let samples = query_samples(&mut stmt, params![site.as_str(), cutoff])?;
            let mut grouped: BTreeMap<NaiveDate, Vec<Sample>> = BTreeMap::new();
            for s in samples {
                let date = chrono::DateTime::from_timestamp(s.timestamp, 0)
                    .map(|dt| dt.date_naive())
                    .unwrap_or_default();
                grouped.entry(date).or_default().push(s);
            }
            Ok(grouped)
        })
        .await?
    }

    /// Count and min/max timestamp for `site`, for `/status` and tests.
    pub async fn bounds(&self, site: &SiteId) -> anyhow::Result<Option<(common::TimestampSecs, common::TimestampSecs, u64)>> {
        let inner = self.inner.clone();
        let site = site.clone();
        tokio::task::spawn_blocking(move || -> anyhow::Result<Option<(common::TimestampSecs, common::TimestampSecs, u64)>> {
            let conn = inner.lock().unwrap();
            let row = conn.query_row(
                "SELECT MIN(timestamp), MAX(timestamp), COUNT(*) FROM timeseries WHERE site = ?1",
                params![site.as_str()],
                |row| {
                    let min: Option<i64> = row.get(0)?;
                    let max: Option<i64> = row.get(1)?;
                    let count: i64 = row.get(2)?;
                    Ok(min.zip(max).map(|(mn, mx)| (mn, mx, count as u64)))
                },
            )?;
            Ok(row)
        })
        .await?
    }
}

fn query_samples<P: rusqlite::Params>(stmt: &mut rusqlite::Statement<'_>, params: P) -> anyhow::Result<Vec<Sample>> {
    let rows = stmt.query_map(params, |row| {
        let point: String = row.get(0)?;
        let timestamp: i64 = row.get(1)?;
        let value: f64 = row.get(2)?;
        Ok((point, timestamp, value))
    })?;
    let mut out = Vec::new();
    for row in rows {
        let (point, timestamp, value) = row?;
        out.push(Sample::new(point, timestamp, value)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn sample(point: &str, ts: i64, v: f64) -> Sample {
        Sample::new(point, ts, v).unwrap()
    }

    #[tokio::test]
    async fn upsert_is_idempotent() {
        let store = HotStore::open_in_memory().unwrap();
        let site = SiteId::new("site_a");
        let batch = vec![sample("p1", 100, 1.0), sample("p1", 200, 2.0)];
        store.upsert_batch(&site, &batch).await.unwrap();
        store.upsert_batch(&site, &batch).await.unwrap();
        let range = TimeRange::new(0, 1000).unwrap();
        let rows = store.range_scan(&site, &[], range).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn upsert_replaces_value_on_same_key() {
        let store = HotStore::open_in_memory().unwrap();
        let site = SiteId::new("site_a");
        store.upsert_batch(&site, &[sample("p1", 100, 1.0)]).await.unwrap();
        store.upsert_batch(&site, &[sample("p1", 100, 2.0)]).await.unwrap();
        let range = TimeRange::new(0, 1000).unwrap();
        let rows = store.range_scan(&site, &[], range).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value.get(), 2.0);
    }

    #[tokio::test]
    async fn range_scan_filters_by_point_set() {
        let store = HotStore::open_in_memory().unwrap();
        let site = SiteId::new("site_a");
        store
            .upsert_batch(&site, &[sample("p1", 100, 1.0), sample("p2", 100, 9.0)])
            .await
            .unwrap();
        let range = TimeRange::new(0, 1000).unwrap();
        let rows = store.range_scan(&site, &[PointName::new("p1")], range).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].point.as_str(), "p1");
    }

    #[tokio::test]
    async fn delete_range_removes_only_matching_rows() {
        let store = HotStore::open_in_memory().unwrap();
        let site = SiteId::new("site_a");
        store
            .upsert_batch(&site, &[sample("p1", 100, 1.0), sample("p1", 500, 2.0)])
            .await
            .unwrap();
        store.delete_range(&site, TimeRange::new(0, 200).unwrap()).await.unwrap();
        let rows = store.range_scan(&site, &[], TimeRange::new(0, 1000).unwrap()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, 500);
    }

    #[tokio::test]
    async fn rows_older_than_groups_by_utc_day() {
        let store = HotStore::open_in_memory().unwrap();
        let site = SiteId::new("site_a");
        // 2024-01-01T00:00:00Z and 2024-01-02T00:00:00Z
        store
            .upsert_batch(&site, &[sample("p1", 1_704_067_200, 1.0), sample("p1", 1_704_153_600, 2.0)])
            .await
            .unwrap();
        let grouped = store.rows_older_than_grouped_by_day(&site, 2_000_000_000).await.unwrap();
        assert_eq!(grouped.len(), 2);
    }

    proptest! {
        #[test]
        fn upsert_batch_applied_twice_matches_applied_once(
            timestamps in proptest::collection::hash_set(0i64..100_000, 1..50),
            value in -1000.0f64..1000.0,
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            let (once_len, twice_len, batch_len) = rt.block_on(async {
                let store = HotStore::open_in_memory().unwrap();
                let site = SiteId::new("site_a");
                let batch: Vec<Sample> = timestamps.iter().map(|ts| sample("p1", *ts, value)).collect();

                store.upsert_batch(&site, &batch).await.unwrap();
                let once = store.range_scan(&site, &[], TimeRange::new(0, 100_000).unwrap()).await.unwrap();

                store.upsert_batch(&site, &batch).await.unwrap();
                let twice = store.range_scan(&site, &[], TimeRange::new(0, 100_000).unwrap()).await.unwrap();

                (once.len(), twice.len(), batch.len())
            });
            prop_assert_eq!(once_len, twice_len);
            prop_assert_eq!(once_len, batch_len);
        }
    }
}
