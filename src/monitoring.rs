//! Operational counters for ingestion and querying.
//!
//! Lock-free counters shared by the writer, the planner and the transport
//! layers, surfaced through the `/health` endpoints.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Process-wide counters.
#[derive(Debug)]
pub struct Monitor {
    started: Instant,
    rows_written: AtomicU64,
    rows_failed: AtomicU64,
    requests_rejected: AtomicU64,
    bucket_reads_ok: AtomicU64,
    bucket_reads_failed: AtomicU64,
    queries_served: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MonitorSnapshot {
    pub uptime_seconds: u64,
    pub rows_written: u64,
    pub rows_failed: u64,
    pub requests_rejected: u64,
    pub bucket_reads_ok: u64,
    pub bucket_reads_failed: u64,
    pub queries_served: u64,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    /// Create a monitor with all counters at zero.
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            rows_written: AtomicU64::new(0),
            rows_failed: AtomicU64::new(0),
            requests_rejected: AtomicU64::new(0),
            bucket_reads_ok: AtomicU64::new(0),
            bucket_reads_failed: AtomicU64::new(0),
            queries_served: AtomicU64::new(0),
        }
    }

    /// Record the outcome of one ingest batch.
    pub fn record_write(&self, written: usize, failed: usize) {
        self.rows_written.fetch_add(written as u64, Ordering::Relaxed);
        self.rows_failed.fetch_add(failed as u64, Ordering::Relaxed);
    }

    /// Record a request refused before touching storage.
    pub fn record_rejected(&self) {
        self.requests_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the bucket outcomes of one range query.
    pub fn record_query(&self, buckets_ok: usize, buckets_failed: usize) {
        self.queries_served.fetch_add(1, Ordering::Relaxed);
        self.bucket_reads_ok.fetch_add(buckets_ok as u64, Ordering::Relaxed);
        self.bucket_reads_failed.fetch_add(buckets_failed as u64, Ordering::Relaxed);
    }

    /// Time since the monitor was created.
    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    /// Read every counter.
    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            uptime_seconds: self.uptime().as_secs(),
            rows_written: self.rows_written.load(Ordering::Relaxed),
            rows_failed: self.rows_failed.load(Ordering::Relaxed),
            requests_rejected: self.requests_rejected.load(Ordering::Relaxed),
            bucket_reads_ok: self.bucket_reads_ok.load(Ordering::Relaxed),
            bucket_reads_failed: self.bucket_reads_failed.load(Ordering::Relaxed),
            queries_served: self.queries_served.load(Ordering::Relaxed),
        }
    }
}
