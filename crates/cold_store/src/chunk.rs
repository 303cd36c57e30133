//! Chunk codec and the cold tier's read-decompress-merge-dedup-compress-write
//! append. A chunk is NDJSON+gzip: one JSON object per line,
//! `{"point":...,"timestamp_ms":...,"value":...}`, for every sample in one
//! `(site, UTC day)`. The in-chunk dedup key is `(point, timestamp)`.

use std::io::Write;

use bytes::Bytes;
use chrono::{
    Datelike,
    NaiveDate,
};
use common::{
    PointName,
    Sample,
    SiteId,
    TimeRange,
};
use flate2::{
    write::GzEncoder,
    Compression,
};
use serde::{
    Deserialize,
    Serialize,
};
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;

use crate::storage::{
    ObjectMetadata,
    Storage,
};

/// The chunk's wire row: deliberately distinct from [`Sample`] since its
/// `timestamp_ms` field is millisecond-precision (matching the upstream
/// wire shape this codec is modeled on), while `Sample::timestamp` is
/// second-precision internally.
#[derive(Debug, Serialize, Deserialize)]
struct ChunkRow {
    point: String,
    timestamp_ms: i64,
    value: f64,
}

impl From<&Sample> for ChunkRow {
    fn from(s: &Sample) -> Self {
        Self { point: s.point.as_str().to_string(), timestamp_ms: s.timestamp * 1000, value: s.value.get() }
    }
}

impl TryFrom<ChunkRow> for Sample {
    type Error = anyhow::Error;

    fn try_from(row: ChunkRow) -> anyhow::Result<Self> {
        Sample::new(row.point, row.timestamp_ms.div_euclid(1000), row.value)
    }
}

/// Metadata carried alongside a chunk object, per the persisted-state
/// layout: `sample_count`, `compressed_size`, `original_size`,
/// `created_at`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkMeta {
    pub sample_count: usize,
    pub compressed_size: usize,
    pub original_size: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl ChunkMeta {
    fn to_object_metadata(&self) -> ObjectMetadata {
        let mut m = ObjectMetadata::new();
        m.insert("sample_count".to_string(), self.sample_count.to_string());
        m.insert("compressed_size".to_string(), self.compressed_size.to_string());
        m.insert("original_size".to_string(), self.original_size.to_string());
        m.insert("created_at".to_string(), self.created_at.to_rfc3339());
        m
    }

    fn from_object_metadata(meta: &ObjectMetadata, compressed_size: usize) -> Self {
        Self {
            sample_count: meta.get("sample_count").and_then(|v| v.parse().ok()).unwrap_or(0),
            compressed_size,
            original_size: meta.get("original_size").and_then(|v| v.parse().ok()).unwrap_or(0),
            created_at: meta
                .get("created_at")
                .and_then(|v| chrono::DateTime::parse_from_rfc3339(v).ok())
                .map(|dt| dt.with_timezone(&chrono::Utc))
                .unwrap_or_else(chrono::Utc::now),
        }
    }
}

/// Deterministic object key for one day's chunk: `timeseries/{site}/{YYYY}/{MM}/{DD}.ndjson.gz`.
pub fn chunk_key(site: &SiteId, date: NaiveDate) -> String {
    format!("timeseries/{}/{:04}/{:02}/{:02}.ndjson.gz", site.as_str(), date.year(), date.month(), date.day())
}

/// All UTC calendar days whose `[00:00:00, 24:00:00)` window intersects
/// `range`, inclusive -- the set of chunk objects a cold query must fetch.
pub fn dates_intersecting(range: TimeRange) -> Vec<NaiveDate> {
    if range.is_empty() {
        return Vec::new();
    }
    let start_date = chrono::DateTime::from_timestamp(range.start, 0).map(|dt| dt.date_naive());
    // `range.end` is exclusive; the last relevant instant is `end - 1`.
    let end_date = chrono::DateTime::from_timestamp(range.end - 1, 0).map(|dt| dt.date_naive());
    let (Some(mut cur), Some(last)) = (start_date, end_date) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    while cur <= last {
        out.push(cur);
        cur = match cur.succ_opt() {
            Some(d) => d,
            None => break,
        };
    }
    out
}

fn day_range(date: NaiveDate) -> TimeRange {
    let start = date.and_hms_opt(0, 0, 0).unwrap().and_utc().timestamp();
    let end = start + 86_400;
    TimeRange::new(start, end).expect("day range is always valid")
}

fn encode(samples: &[Sample]) -> anyhow::Result<(Bytes, usize)> {
    let mut original_size = 0usize;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    for s in samples {
        let mut line = serde_json::to_vec(&ChunkRow::from(s))?;
        line.push(b'\n');
        original_size += line.len();
        encoder.write_all(&line)?;
    }
    let compressed = encoder.finish()?;
    Ok((Bytes::from(compressed), original_size))
}

async fn decode_all(body: Bytes) -> anyhow::Result<Vec<Sample>> {
    decode_filtered(body, &[], None).await
}

/// Stream-decode a gzip NDJSON chunk line-by-line, filtering by point set
/// (empty = all points) and an optional timestamp range, so a query
/// fetching many chunks in parallel has bounded peak memory per chunk
/// rather than buffering the whole decompressed body.
async fn decode_filtered(body: Bytes, points: &[PointName], range: Option<TimeRange>) -> anyhow::Result<Vec<Sample>> {
    let stream = futures::stream::once(async move { Ok::<_, std::io::Error>(body) });
    let reader = tokio::io::BufReader::new(StreamReader::new(stream));
    let gz = async_compression::tokio::bufread::GzipDecoder::new(reader);
    let mut lines = tokio::io::BufReader::new(gz).lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.is_empty() {
            continue;
        }
        let row: ChunkRow = serde_json::from_str(&line)?;
        if !points.is_empty() && !points.iter().any(|p| p.as_str() == row.point) {
            continue;
        }
        let sample = Sample::try_from(row)?;
        if let Some(range) = range {
            if !range.contains(sample.timestamp) {
                continue;
            }
        }
        out.push(sample);
    }
    Ok(out)
}

/// The cold tier, generic over any [`Storage`] backend. Owns the codec and
/// the append/read operations the archival compactor, backfill engine, and
/// query router call.
#[derive(Clone)]
pub struct ColdStore<S> {
    storage: S,
}

impl<S: Storage> ColdStore<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Full decode of one day's chunk, or `None` if it doesn't exist yet.
    pub async fn get_day(&self, site: &SiteId, date: NaiveDate) -> anyhow::Result<Option<Vec<Sample>>> {
        let key = chunk_key(site, date);
        match self.storage.get(&key).await? {
            Some((body, _meta)) => Ok(Some(decode_all(body).await?)),
            None => Ok(None),
        }
    }

    /// Stream-decode one day's chunk filtered to `points`/`range`; used by
    /// the query router's cold-query path. Returns an empty vec if the
    /// chunk doesn't exist (a query spanning days with no data is not an
    /// error).
    pub async fn query_day(
        &self,
        site: &SiteId,
        date: NaiveDate,
        points: &[PointName],
        range: TimeRange,
    ) -> anyhow::Result<Vec<Sample>> {
        let key = chunk_key(site, date);
        match self.storage.get(&key).await? {
            Some((body, _meta)) => decode_filtered(body, points, Some(range)).await,
            None => Ok(Vec::new()),
        }
    }

    /// Append `new_samples` (which must all fall on UTC `date`) to the
    /// day's chunk: read the existing chunk (if any), merge with
    /// `new_samples`, dedup on `(point, timestamp)` preferring the
    /// incoming sample on collision (last writer wins, per the
    /// shared-resource policy for same-day concurrent writers), and
    /// rewrite the whole object. Idempotent: appending the same batch
    /// twice leaves the chunk unchanged.
    pub async fn append_day(&self, site: &SiteId, date: NaiveDate, new_samples: &[Sample]) -> anyhow::Result<ChunkMeta> {
        let day = day_range(date);
        debug_assert!(
            new_samples.iter().all(|s| day.contains(s.timestamp)),
            "append_day received a sample outside the target UTC day"
        );
        let existing = self.get_day(site, date).await?.unwrap_or_default();

        let mut by_key: std::collections::BTreeMap<(String, common::TimestampSecs), Sample> = std::collections::BTreeMap::new();
        for s in existing {
            by_key.insert((s.point.as_str().to_string(), s.timestamp), s);
        }
        for s in new_samples {
            by_key.insert((s.point.as_str().to_string(), s.timestamp), s.clone());
        }
        let mut merged: Vec<Sample> = by_key.into_values().collect();
        merged.sort_by_key(|s| (s.point.as_str().to_string(), s.timestamp));

        let (body, original_size) = encode(&merged)?;
        let meta = ChunkMeta {
            sample_count: merged.len(),
            compressed_size: body.len(),
            original_size,
            created_at: chrono::Utc::now(),
        };
        let key = chunk_key(site, date);
        self.storage.put(&key, body, meta.to_object_metadata()).await?;
        Ok(meta)
    }

    /// Metadata for an existing chunk, without decoding the body.
    pub async fn chunk_meta(&self, site: &SiteId, date: NaiveDate) -> anyhow::Result<Option<ChunkMeta>> {
        let key = chunk_key(site, date);
        match self.storage.get(&key).await? {
            Some((body, meta)) => Ok(Some(ChunkMeta::from_object_metadata(&meta, body.len()))),
            None => Ok(None),
        }
    }

    pub async fn list_chunk_dates(&self, site: &SiteId) -> anyhow::Result<Vec<NaiveDate>> {
        let prefix = format!("timeseries/{}/", site.as_str());
        let keys = self.storage.list_prefix(&prefix).await?;
        let mut dates: Vec<NaiveDate> = keys.iter().filter_map(|k| parse_date_from_key(k)).collect();
        dates.sort();
        Ok(dates)
    }
}

fn parse_date_from_key(key: &str) -> Option<NaiveDate> {
    let rest = key.strip_suffix(".ndjson.gz")?;
    let mut parts = rest.rsplit('/');
    let day: u32 = parts.next()?.parse().ok()?;
    let month: u32 = parts.next()?.parse().ok()?;
    let year: i32 = parts.next()?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

#[cfg(test)]
mod tests {
    use common::TimeRange;

    use super::*;
    use crate::storage::LocalDiskStorage;

    fn sample(point: &str, ts: i64, v: f64) -> Sample {
        Sample::new(point, ts, v).unwrap()
    }

    #[test]
    fn chunk_key_is_deterministic() {
        let site = SiteId::new("site_a");
        let date = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        assert_eq!(chunk_key(&site, date), "timeseries/site_a/2024/01/05.ndjson.gz");
    }

    #[test]
    fn dates_intersecting_covers_inclusive_range() {
        let range = TimeRange::new(1_704_067_200, 1_704_240_000).unwrap(); // 2024-01-01 -> 2024-01-03
        let dates = dates_intersecting(range);
        assert_eq!(dates.len(), 3);
        assert_eq!(dates[0], NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        assert_eq!(dates[2], NaiveDate::from_ymd_opt(2024, 1, 3).unwrap());
    }

    #[test]
    fn dates_intersecting_empty_range_is_empty() {
        assert!(dates_intersecting(TimeRange::new(100, 100).unwrap()).is_empty());
    }

    #[tokio::test]
    async fn round_trip_encode_decode_preserves_samples() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ColdStore::new(LocalDiskStorage::new(tmp.path()));
        let site = SiteId::new("site_a");
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let day = day_range(date);
        let samples = vec![sample("p1", day.start, 1.0), sample("p1", day.start + 60, 2.0), sample("p2", day.start, 3.0)];
        store.append_day(&site, date, &samples).await.unwrap();
        let mut got = store.get_day(&site, date).await.unwrap().unwrap();
        got.sort_by_key(|s| (s.point.as_str().to_string(), s.timestamp));
        let mut want = samples.clone();
        want.sort_by_key(|s| (s.point.as_str().to_string(), s.timestamp));
        assert_eq!(got, want);
    }

    #[tokio::test]
    async fn append_day_dedupes_on_point_and_timestamp_preferring_incoming() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ColdStore::new(LocalDiskStorage::new(tmp.path()));
        let site = SiteId::new("site_a");
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let day = day_range(date);
        store.append_day(&site, date, &[sample("p1", day.start, 1.0)]).await.unwrap();
        let meta = store.append_day(&site, date, &[sample("p1", day.start, 2.0)]).await.unwrap();
        assert_eq!(meta.sample_count, 1);
        let got = store.get_day(&site, date).await.unwrap().unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].value.get(), 2.0);
    }

    #[tokio::test]
    async fn append_day_is_idempotent_for_identical_batches() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ColdStore::new(LocalDiskStorage::new(tmp.path()));
        let site = SiteId::new("site_a");
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let day = day_range(date);
        let batch = vec![sample("p1", day.start, 1.0), sample("p1", day.start + 120, 2.0)];
        store.append_day(&site, date, &batch).await.unwrap();
        let meta1 = store.append_day(&site, date, &batch).await.unwrap();
        assert_eq!(meta1.sample_count, 2);
    }

    #[tokio::test]
    async fn query_day_filters_by_point_and_range() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ColdStore::new(LocalDiskStorage::new(tmp.path()));
        let site = SiteId::new("site_a");
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let day = day_range(date);
        store
            .append_day(&site, date, &[sample("p1", day.start, 1.0), sample("p2", day.start + 60, 2.0)])
            .await
            .unwrap();
        let rows = store
            .query_day(&site, date, &[PointName::new("p1")], TimeRange::new(day.start, day.end).unwrap())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].point.as_str(), "p1");
    }

    #[tokio::test]
    async fn get_day_returns_none_for_missing_chunk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ColdStore::new(LocalDiskStorage::new(tmp.path()));
        let site = SiteId::new("site_a");
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert!(store.get_day(&site, date).await.unwrap().is_none());
    }
}
