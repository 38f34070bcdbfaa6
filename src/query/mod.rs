//! Time-range queries over the day-partitioned metrics table.
//!
//! [`RangeQueryPlanner`] enumerates the buckets a range touches, reads them
//! concurrently and merges the results; [`format_rows`] maps the merged rows
//! to the dashboard's point shape.

pub mod format;
pub mod planner;

pub use format::{format_rows, DataPoint};
pub use planner::{BucketOutcome, RangeQueryPlanner, RangeQueryResult};
