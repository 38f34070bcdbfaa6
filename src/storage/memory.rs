//! Embedded in-memory metric store.
//!
//! Mirrors the wide-column layout: one sorted map per
//! `(metric_name, time_bucket)` partition, keyed by `(timestamp, node_id)`.
//! Writes to an existing key overwrite it, so re-ingesting a payload is
//! idempotent. Consistency levels are accepted and ignored; there is a
//! single replica.

use super::{MetricStore, RangeRead};
use crate::core::{MetricRow, PulseError, Result, TimeBucket};
use crate::topology::{Consistency, TopologyPolicy};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicBool, Ordering};

type PartitionKey = (String, TimeBucket);
type ClusteringKey = (DateTime<Utc>, String);

/// Process-local store with the same partitioning as the CQL table.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    partitions: DashMap<PartitionKey, BTreeMap<ClusteringKey, f64>>,
    closed: AtomicBool,
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Total rows across all partitions.
    pub fn row_count(&self) -> usize {
        self.partitions.iter().map(|p| p.value().len()).sum()
    }

    /// Number of non-empty partitions.
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PulseError::storage_unavailable("in-memory store is shut down"));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl MetricStore for InMemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn verify_schema(&self) -> Result<()> {
        self.ensure_open()
    }

    async fn create_schema(&self, topology: &TopologyPolicy) -> Result<()> {
        self.ensure_open()?;
        tracing::debug!("In-memory store needs no schema for keyspace {}", topology.keyspace());
        Ok(())
    }

    async fn insert(&self, row: &MetricRow, _consistency: Consistency) -> Result<()> {
        self.ensure_open()?;
        self.partitions
            .entry((row.metric_name.clone(), row.time_bucket))
            .or_default()
            .insert((row.timestamp, row.node_id.clone()), row.value);
        Ok(())
    }

    async fn select_range(&self, read: &RangeRead, _consistency: Consistency) -> Result<Vec<MetricRow>> {
        self.ensure_open()?;

        let Some(partition) = self.partitions.get(&(read.metric_name.clone(), read.bucket)) else {
            return Ok(Vec::new());
        };

        let lower = Bound::Included((read.from, String::new()));
        let rows = partition
            .range((lower, Bound::Unbounded))
            .take_while(|((timestamp, _), _)| *timestamp <= read.to)
            .map(|((timestamp, node_id), value)| MetricRow {
                node_id: node_id.clone(),
                metric_name: read.metric_name.clone(),
                time_bucket: read.bucket,
                timestamp: *timestamp,
                value: *value,
            })
            .collect();

        Ok(rows)
    }

    async fn shutdown(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        tracing::info!("In-memory metric store shut down ({} rows held)", self.row_count());
        Ok(())
    }
}
