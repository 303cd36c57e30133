//! Types, configuration, and runtime abstractions shared by every
//! component of the tiered timeseries ingestion and query system.

pub mod backoff;
pub mod env;
pub mod knobs;
pub mod runtime;
pub mod types;

pub use types::{
    push_bounded_log,
    DataSource,
    ErrorLogEntry,
    PointName,
    QueryStrategy,
    Sample,
    SampleValue,
    SiteId,
    TimeRange,
    TimestampSecs,
};
