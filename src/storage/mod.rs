//! Storage engine contract and backends.
//!
//! The engine is a replicated wide-column store exposed through a narrow
//! query interface: a keyed upsert and a bounded range read over a single
//! `(metric_name, time_bucket)` partition, both at a per-call consistency
//! level. [`writer::IngestWriter`] fans writes out over it.

pub mod memory;
pub mod writer;

#[cfg(feature = "cassandra")]
pub mod cassandra;

use crate::core::{Config, MetricRow, Result, StorageBackendKind, TimeBucket};
use crate::topology::{Consistency, TopologyPolicy};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub use memory::InMemoryStore;
pub use writer::{IngestWriter, WriteReport};

/// A bounded read of one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeRead {
    /// Partition key, first half
    pub metric_name: String,
    /// Partition key, second half
    pub bucket: TimeBucket,
    /// Inclusive lower timestamp bound
    pub from: DateTime<Utc>,
    /// Inclusive upper timestamp bound
    pub to: DateTime<Utc>,
}

impl RangeRead {
    /// True when `row` falls inside this read's partition and time range.
    pub fn contains(&self, row: &MetricRow) -> bool {
        row.metric_name == self.metric_name
            && row.time_bucket == self.bucket
            && row.timestamp >= self.from
            && row.timestamp <= self.to
    }
}

/// Trait for storage engine implementations.
#[async_trait::async_trait]
pub trait MetricStore: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// Confirm the keyspace and table exist. Failing here is fatal at startup.
    async fn verify_schema(&self) -> Result<()>;

    /// Create the keyspace and table if they are missing.
    async fn create_schema(&self, topology: &TopologyPolicy) -> Result<()>;

    /// Upsert one row keyed by `(metric_name, time_bucket, timestamp, node_id)`.
    async fn insert(&self, row: &MetricRow, consistency: Consistency) -> Result<()>;

    /// Rows of one partition within the read's time range. Order is unspecified.
    async fn select_range(&self, read: &RangeRead, consistency: Consistency) -> Result<Vec<MetricRow>>;

    /// Release connections once in-flight calls have drained.
    async fn shutdown(&self) -> Result<()>;
}

/// Connect to the configured backend.
#[cfg_attr(not(feature = "cassandra"), allow(unused_variables))]
pub async fn connect(config: &Config, topology: &TopologyPolicy) -> Result<Arc<dyn MetricStore>> {
    match config.storage.backend {
        StorageBackendKind::Memory => {
            tracing::info!("Using embedded in-memory metric store");
            Ok(Arc::new(InMemoryStore::new()))
        },
        #[cfg(feature = "cassandra")]
        StorageBackendKind::Cassandra => {
            let store = cassandra::CassandraStore::connect(&config.storage, topology).await?;
            Ok(Arc::new(store))
        },
        #[cfg(not(feature = "cassandra"))]
        StorageBackendKind::Cassandra => Err(crate::core::PulseError::config(
            "Cassandra backend requested but pulseops was built without the 'cassandra' feature",
        )),
    }
}
