//! Ingest writer: partition stamping and bounded concurrent upserts.
//!
//! Every candidate is stamped with its daily bucket and written as an
//! independent, idempotent upsert at the topology's write consistency. A
//! batch never rolls back: rows that made it stay written and the report
//! says how many did.

use super::MetricStore;
use crate::core::config::StorageConfig;
use crate::core::{MetricRow, PulseError, Result, RowCandidate};
use crate::monitoring::Monitor;
use crate::topology::{Consistency, TopologyPolicy};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;

/// Outcome of one batch.
#[derive(Debug)]
pub struct WriteReport {
    /// Rows submitted
    pub attempted: usize,
    /// Rows acknowledged by the store
    pub inserted: usize,
    /// Rows that failed or timed out
    pub failed: usize,
    /// First failure observed, in completion order
    pub first_error: Option<PulseError>,
}

impl WriteReport {
    fn empty() -> Self {
        Self {
            attempted: 0,
            inserted: 0,
            failed: 0,
            first_error: None,
        }
    }

    /// Some rows were written and some were not.
    pub fn is_partial(&self) -> bool {
        self.failed > 0 && self.inserted > 0
    }

    /// The partial failure as an error value, for logging or transport mapping.
    pub fn partial_failure(&self) -> Option<PulseError> {
        if self.failed == 0 {
            return None;
        }
        Some(PulseError::PartialWriteFailure {
            inserted: self.inserted,
            failed: self.failed,
            first_error: self
                .first_error
                .as_ref()
                .map_or_else(|| "unknown".to_string(), ToString::to_string),
        })
    }
}

/// Writes flattened rows to the store.
pub struct IngestWriter {
    store: Arc<dyn MetricStore>,
    consistency: Consistency,
    concurrency: usize,
    request_timeout: Duration,
    monitor: Arc<Monitor>,
}

impl IngestWriter {
    /// Create a writer over `store` using the topology's write consistency.
    pub fn new(store: Arc<dyn MetricStore>, topology: &TopologyPolicy, config: &StorageConfig) -> Self {
        Self {
            store,
            consistency: topology.write_consistency(),
            concurrency: config.write_concurrency.max(1),
            request_timeout: config.request_timeout,
            monitor: Arc::new(Monitor::new()),
        }
    }

    /// Share a monitor with the rest of the process.
    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// Consistency every write is issued at.
    pub fn consistency(&self) -> Consistency {
        self.consistency
    }

    /// Write a batch, at most `write_concurrency` calls in flight.
    ///
    /// Returns `StorageUnavailable` only when every row failed; a mix of
    /// successes and failures is reported through [`WriteReport`].
    #[tracing::instrument(skip_all, fields(rows = candidates.len(), consistency = %self.consistency))]
    pub async fn write(&self, candidates: Vec<RowCandidate>) -> Result<WriteReport> {
        if candidates.is_empty() {
            return Ok(WriteReport::empty());
        }

        let attempted = candidates.len();
        let outcomes = stream::iter(candidates.into_iter().map(MetricRow::from))
            .map(|row| self.write_one(row))
            .buffer_unordered(self.concurrency);

        let report = outcomes
            .fold(
                WriteReport {
                    attempted,
                    ..WriteReport::empty()
                },
                |mut report, outcome| async move {
                    match outcome {
                        Ok(()) => report.inserted += 1,
                        Err(e) => {
                            report.failed += 1;
                            if report.first_error.is_none() {
                                report.first_error = Some(e);
                            }
                        },
                    }
                    report
                },
            )
            .await;

        self.monitor.record_write(report.inserted, report.failed);

        if report.failed == 0 {
            tracing::debug!("Wrote {} rows", report.inserted);
            return Ok(report);
        }

        if report.inserted == 0 {
            let cause = report
                .first_error
                .as_ref()
                .map_or_else(|| "no write succeeded".to_string(), ToString::to_string);
            tracing::error!("All {} writes failed: {}", report.failed, cause);
            return Err(PulseError::storage_unavailable(cause));
        }

        if let Some(partial) = report.partial_failure() {
            tracing::warn!("{}", partial);
        }
        Ok(report)
    }

    /// Run [`write`](Self::write) on its own task and wait for it.
    ///
    /// If the caller is dropped mid-request the batch still runs to
    /// completion and its outcome is still counted.
    pub async fn write_to_completion(self: &Arc<Self>, candidates: Vec<RowCandidate>) -> Result<WriteReport> {
        let writer = Arc::clone(self);
        tokio::spawn(async move { writer.write(candidates).await }).await?
    }

    async fn write_one(&self, row: MetricRow) -> Result<()> {
        match tokio::time::timeout(self.request_timeout, self.store.insert(&row, self.consistency)).await {
            Ok(result) => result,
            Err(_) => Err(PulseError::Timeout {
                timeout_ms: u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bucket::timestamp_from_millis;
    use crate::storage::{InMemoryStore, RangeRead};
    use crate::topology::TopologyPolicy;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn candidate(node: &str, millis: i64, value: f64) -> RowCandidate {
        RowCandidate {
            node_id: node.into(),
            metric_name: "system.cpu.percent".into(),
            timestamp: timestamp_from_millis(millis).unwrap(),
            value,
        }
    }

    /// Fails every `nth` insert.
    struct EveryNthFails {
        inner: InMemoryStore,
        nth: usize,
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MetricStore for EveryNthFails {
        fn name(&self) -> &'static str {
            "every-nth-fails"
        }
        async fn verify_schema(&self) -> Result<()> {
            Ok(())
        }
        async fn create_schema(&self, _topology: &TopologyPolicy) -> Result<()> {
            Ok(())
        }
        async fn insert(&self, row: &MetricRow, consistency: Consistency) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.nth > 0 && call % self.nth == 0 {
                return Err(PulseError::storage_unavailable("write timeout"));
            }
            self.inner.insert(row, consistency).await
        }
        async fn select_range(&self, read: &RangeRead, consistency: Consistency) -> Result<Vec<MetricRow>> {
            self.inner.select_range(read, consistency).await
        }
        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    fn writer(store: Arc<dyn MetricStore>) -> IngestWriter {
        IngestWriter::new(store, &TopologyPolicy::default(), &StorageConfig::default())
    }

    #[tokio::test]
    async fn test_all_rows_written() {
        let store = Arc::new(InMemoryStore::new());
        let writer = writer(store.clone());
        let rows = (0..100).map(|i| candidate("edge-1", 1_700_000_000_000 + i * 1000, i as f64)).collect();

        let report = writer.write(rows).await.unwrap();
        assert_eq!(report.attempted, 100);
        assert_eq!(report.inserted, 100);
        assert!(!report.is_partial());
        assert_eq!(store.row_count(), 100);
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_successes() {
        let store = Arc::new(EveryNthFails {
            inner: InMemoryStore::new(),
            nth: 4,
            calls: AtomicUsize::new(0),
        });
        let writer = writer(store.clone());
        let rows = (0..20).map(|i| candidate("edge-1", 1_700_000_000_000 + i, 1.0)).collect();

        let report = writer.write(rows).await.unwrap();
        assert_eq!(report.inserted, 15);
        assert_eq!(report.failed, 5);
        assert!(report.is_partial());
        assert_eq!(store.inner.row_count(), 15);
        assert_eq!(report.partial_failure().unwrap().category(), "partial_write");
    }

    #[tokio::test]
    async fn test_total_failure_is_storage_unavailable() {
        let store = Arc::new(EveryNthFails {
            inner: InMemoryStore::new(),
            nth: 1,
            calls: AtomicUsize::new(0),
        });
        let err = writer(store).write(vec![candidate("edge-1", 1_700_000_000_000, 1.0)]).await.unwrap_err();
        assert!(matches!(err, PulseError::StorageUnavailable(_)));
    }

    #[tokio::test]
    async fn test_empty_batch_touches_nothing() {
        let store = Arc::new(EveryNthFails {
            inner: InMemoryStore::new(),
            nth: 1,
            calls: AtomicUsize::new(0),
        });
        let report = writer(store.clone()).write(Vec::new()).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_detached_write_reports_outcome() {
        let store = Arc::new(InMemoryStore::new());
        let writer = Arc::new(writer(store.clone()));
        let report = writer
            .write_to_completion(vec![candidate("edge-1", 1_700_000_000_000, 1.0)])
            .await
            .unwrap();
        assert_eq!(report.inserted, 1);
        assert_eq!(store.row_count(), 1);
    }

    /// Inserts of `stalled_value` never answer in time.
    struct Stalling {
        inner: InMemoryStore,
        stalled_value: f64,
    }

    #[async_trait::async_trait]
    impl MetricStore for Stalling {
        fn name(&self) -> &'static str {
            "stalling"
        }
        async fn verify_schema(&self) -> Result<()> {
            Ok(())
        }
        async fn create_schema(&self, _topology: &TopologyPolicy) -> Result<()> {
            Ok(())
        }
        async fn insert(&self, row: &MetricRow, consistency: Consistency) -> Result<()> {
            if row.value == self.stalled_value {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            self.inner.insert(row, consistency).await
        }
        async fn select_range(&self, read: &RangeRead, consistency: Consistency) -> Result<Vec<MetricRow>> {
            self.inner.select_range(read, consistency).await
        }
        async fn shutdown(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_write_counts_as_failed() {
        let store = Arc::new(Stalling {
            inner: InMemoryStore::new(),
            stalled_value: 2.0,
        });
        let rows = (0..4).map(|i| candidate("edge-1", 1_700_000_000_000 + i, i as f64)).collect();

        let report = writer(store.clone()).write(rows).await.unwrap();
        assert_eq!(report.inserted, 3);
        assert_eq!(report.failed, 1);
        assert!(matches!(report.first_error, Some(PulseError::Timeout { timeout_ms: 30_000 })));
        assert_eq!(store.inner.row_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_writes_timed_out_is_unavailable() {
        let store = Arc::new(Stalling {
            inner: InMemoryStore::new(),
            stalled_value: 1.0,
        });
        let rows = (0..3).map(|i| candidate("edge-1", 1_700_000_000_000 + i, 1.0)).collect();

        let err = writer(store).write(rows).await.unwrap_err();
        assert!(matches!(err, PulseError::StorageUnavailable(_)));
    }
}
