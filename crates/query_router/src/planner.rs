//! Time-range analysis: decide which tier(s) a query must consult. The
//! hot boundary is the single `HOT_RETENTION_DAYS` knob shared with the
//! archival compactor (§9 open question 4) -- this module never carries
//! its own copy of that value.

use common::{
    QueryStrategy,
    TimeRange,
    TimestampSecs,
};

/// The planner's verdict for one query range, already split at the hot
/// boundary where applicable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryPlan {
    HotOnly(TimeRange),
    ColdOnly(TimeRange),
    Split { hot: TimeRange, cold: TimeRange },
}

impl QueryPlan {
    pub fn strategy(&self) -> QueryStrategy {
        match self {
            QueryPlan::HotOnly(_) => QueryStrategy::HotOnly,
            QueryPlan::ColdOnly(_) => QueryStrategy::ColdOnly,
            QueryPlan::Split { .. } => QueryStrategy::Split,
        }
    }
}

/// Plan `range` against `hot_boundary = now - HOT_RETENTION_DAYS`, per
/// §4.4: entirely within the hot window -> HOT_ONLY, entirely before it
/// -> COLD_ONLY, straddling it -> SPLIT at the boundary.
pub fn plan(range: TimeRange, hot_boundary: TimestampSecs) -> QueryPlan {
    if range.start >= hot_boundary {
        return QueryPlan::HotOnly(range);
    }
    if range.end <= hot_boundary {
        return QueryPlan::ColdOnly(range);
    }
    let (cold, hot) = range.split_at(hot_boundary);
    QueryPlan::Split {
        hot: hot.expect("straddling range must have a non-empty hot half"),
        cold: cold.expect("straddling range must have a non-empty cold half"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entirely_after_boundary_is_hot_only() {
        let range = TimeRange::new(200, 300).unwrap();
        assert_eq!(plan(range, 100), QueryPlan::HotOnly(range));
    }

    #[test]
    fn entirely_before_boundary_is_cold_only() {
        let range = TimeRange::new(10, 50).unwrap();
        assert_eq!(plan(range, 100), QueryPlan::ColdOnly(range));
    }

    #[test]
    fn straddling_boundary_is_split() {
        let range = TimeRange::new(50, 150).unwrap();
        let p = plan(range, 100);
        assert_eq!(p.strategy(), common::QueryStrategy::Split);
        match p {
            QueryPlan::Split { hot, cold } => {
                assert_eq!(hot, TimeRange::new(100, 150).unwrap());
                assert_eq!(cold, TimeRange::new(50, 100).unwrap());
            },
            _ => panic!("expected split"),
        }
    }

    #[test]
    fn query_spanning_exactly_the_hot_boundary_emits_split() {
        // t_start < boundary < t_end, boundary strictly interior.
        let range = TimeRange::new(99, 101).unwrap();
        assert_eq!(plan(range, 100).strategy(), common::QueryStrategy::Split);
    }

    #[test]
    fn boundary_equal_to_start_is_hot_only() {
        let range = TimeRange::new(100, 200).unwrap();
        assert_eq!(plan(range, 100), QueryPlan::HotOnly(range));
    }

    #[test]
    fn boundary_equal_to_end_is_cold_only() {
        let range = TimeRange::new(50, 100).unwrap();
        assert_eq!(plan(range, 100), QueryPlan::ColdOnly(range));
    }
}
