//! Range query planning over daily partitions.
//!
//! A query for `[from, to]` becomes one bounded read per daily bucket,
//! issued concurrently. A bucket whose read fails or times out contributes
//! nothing and is reported as a [`BucketOutcome::Failed`]; the query itself
//! only fails on invalid input.

use crate::core::config::StorageConfig;
use crate::core::bucket::days_between;
use crate::core::{enumerate_buckets, MetricRow, PulseError, Result, TimeBucket};
use crate::monitoring::Monitor;
use crate::storage::{MetricStore, RangeRead};
use crate::topology::{Consistency, TopologyPolicy};
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// What happened to one bucket read.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketOutcome {
    /// The read succeeded and returned `count` rows
    Rows { bucket: TimeBucket, count: usize },
    /// The read failed; the bucket contributed no rows
    Failed { bucket: TimeBucket, error: String },
}

impl BucketOutcome {
    pub fn bucket(&self) -> TimeBucket {
        match self {
            BucketOutcome::Rows { bucket, .. } | BucketOutcome::Failed { bucket, .. } => *bucket,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, BucketOutcome::Failed { .. })
    }
}

/// Merged rows plus per-bucket outcomes.
#[derive(Debug, Clone, Default)]
pub struct RangeQueryResult {
    /// Rows sorted ascending by timestamp
    pub rows: Vec<MetricRow>,
    /// One entry per enumerated bucket, in calendar order
    pub outcomes: Vec<BucketOutcome>,
}

impl RangeQueryResult {
    /// At least one bucket could not be read.
    pub fn is_partial(&self) -> bool {
        self.outcomes.iter().any(BucketOutcome::is_failed)
    }

    /// Buckets whose reads failed, in calendar order.
    pub fn failed_buckets(&self) -> Vec<TimeBucket> {
        self.outcomes
            .iter()
            .filter(|o| o.is_failed())
            .map(BucketOutcome::bucket)
            .collect()
    }
}

/// Turns time-range queries into per-bucket reads.
pub struct RangeQueryPlanner {
    store: Arc<dyn MetricStore>,
    consistency: Consistency,
    concurrency: usize,
    request_timeout: Duration,
    max_buckets: usize,
    monitor: Arc<Monitor>,
}

impl RangeQueryPlanner {
    pub fn new(store: Arc<dyn MetricStore>, topology: &TopologyPolicy, config: &StorageConfig) -> Self {
        Self {
            store,
            consistency: topology.read_consistency(),
            concurrency: config.read_concurrency.max(1),
            request_timeout: config.request_timeout,
            max_buckets: config.max_query_buckets,
            monitor: Arc::new(Monitor::new()),
        }
    }

    /// Share a monitor with the rest of the process.
    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Rows of `metric_name` with `from <= timestamp <= to`, sorted by timestamp.
    ///
    /// `from > to` yields an empty result. Ranges spanning more than the
    /// configured number of buckets are rejected before any read.
    #[tracing::instrument(skip(self), fields(consistency = %self.consistency))]
    pub async fn query(
        &self,
        metric_name: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<RangeQueryResult> {
        if metric_name.is_empty() {
            return Err(PulseError::validation("metric name must not be empty"));
        }

        if from > to {
            return Ok(RangeQueryResult::default());
        }

        let span = days_between(from, to) + 1;
        if usize::try_from(span).map_or(true, |n| n > self.max_buckets) {
            return Err(PulseError::validation(format!(
                "range spans {} daily partitions, at most {} allowed",
                span, self.max_buckets
            )));
        }
        let buckets = enumerate_buckets(from, to);

        let reads = buckets.into_iter().map(|bucket| RangeRead {
            metric_name: metric_name.to_string(),
            bucket,
            from,
            to,
        });

        let mut results: Vec<(RangeRead, Result<Vec<MetricRow>>)> = stream::iter(reads)
            .map(|read| async move {
                let outcome = self.read_bucket(&read).await;
                (read, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;
        results.sort_by_key(|(read, _)| read.bucket);

        let mut merged = RangeQueryResult::default();
        for (read, outcome) in results {
            match outcome {
                Ok(rows) => {
                    let before = merged.rows.len();
                    merged.rows.extend(rows.into_iter().filter(|row| read.contains(row)));
                    merged.outcomes.push(BucketOutcome::Rows {
                        bucket: read.bucket,
                        count: merged.rows.len() - before,
                    });
                },
                Err(e) => {
                    tracing::warn!("Read of {} bucket {} failed: {}", metric_name, read.bucket, e);
                    merged.outcomes.push(BucketOutcome::Failed {
                        bucket: read.bucket,
                        error: e.to_string(),
                    });
                },
            }
        }

        // Stable: equal timestamps keep bucket order
        merged.rows.sort_by_key(|row| row.timestamp);

        let failed = merged.outcomes.iter().filter(|o| o.is_failed()).count();
        self.monitor.record_query(merged.outcomes.len() - failed, failed);
        tracing::debug!(
            "Query returned {} rows from {} buckets ({} failed)",
            merged.rows.len(),
            merged.outcomes.len(),
            failed
        );

        Ok(merged)
    }

    async fn read_bucket(&self, read: &RangeRead) -> Result<Vec<MetricRow>> {
        match tokio::time::timeout(self.request_timeout, self.store.select_range(read, self.consistency)).await {
            Ok(result) => result,
            Err(_) => Err(PulseError::Timeout {
                timeout_ms: u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}
