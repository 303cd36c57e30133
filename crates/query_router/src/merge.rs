//! Merge hot- and cold-tier row streams for a split query into a
//! time-ordered, deduplicated, per-point series. Hot is authoritative on
//! overlap (§4.4 merge step 2), matching invariant 6: the merged value at
//! a colliding `(point, ts)` equals the hot-tier value.

use std::collections::BTreeMap;

use common::{
    PointName,
    Sample,
};

/// Concatenate `hot` and `cold` samples, dedup on `(point, timestamp)`
/// preferring `hot` on collision, sort ascending by timestamp, and group
/// by point. The per-point output is strictly increasing in timestamp
/// with no duplicate timestamps (invariant 5).
pub fn merge(hot: Vec<Sample>, cold: Vec<Sample>) -> BTreeMap<PointName, Vec<Sample>> {
    let mut by_key: BTreeMap<(PointName, common::TimestampSecs), Sample> = BTreeMap::new();
    // Cold first, then hot, so hot's `insert` overwrites any cold value at
    // the same key -- hot wins on tie.
    for s in cold {
        by_key.insert((s.point.clone(), s.timestamp), s);
    }
    for s in hot {
        by_key.insert((s.point.clone(), s.timestamp), s);
    }

    let mut grouped: BTreeMap<PointName, Vec<Sample>> = BTreeMap::new();
    for (_, sample) in by_key {
        grouped.entry(sample.point.clone()).or_default().push(sample);
    }
    for series in grouped.values_mut() {
        series.sort_by_key(|s| s.timestamp);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(p: &str, ts: i64, v: f64) -> Sample {
        Sample::new(p, ts, v).unwrap()
    }

    #[test]
    fn merge_dedupes_preferring_hot_on_collision() {
        let hot = vec![s("p1", 100, 2.0)];
        let cold = vec![s("p1", 100, 1.0)];
        let merged = merge(hot, cold);
        let series = &merged[&PointName::new("p1")];
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].value.get(), 2.0);
    }

    #[test]
    fn merge_sorts_ascending_and_groups_by_point() {
        let hot = vec![s("p1", 300, 3.0), s("p2", 100, 9.0)];
        let cold = vec![s("p1", 100, 1.0), s("p1", 200, 2.0)];
        let merged = merge(hot, cold);
        let p1 = &merged[&PointName::new("p1")];
        assert_eq!(p1.iter().map(|s| s.timestamp).collect::<Vec<_>>(), vec![100, 200, 300]);
        assert_eq!(merged[&PointName::new("p2")].len(), 1);
    }

    #[test]
    fn merge_of_empty_inputs_is_empty() {
        assert!(merge(Vec::new(), Vec::new()).is_empty());
    }

    #[test]
    fn merged_series_has_no_duplicate_timestamps() {
        let hot = vec![s("p1", 100, 1.0)];
        let cold = vec![s("p1", 100, 0.0), s("p1", 50, -1.0)];
        let merged = merge(hot, cold);
        let series = &merged[&PointName::new("p1")];
        let mut tss: Vec<_> = series.iter().map(|s| s.timestamp).collect();
        let before = tss.len();
        tss.dedup();
        assert_eq!(tss.len(), before);
    }
}
