//! Core domain models, configuration and errors for pulseops.
//!
//! This module contains the row model, the daily time bucketing that
//! every read and write is partitioned by, and the crate-wide error type.

pub mod bucket;
pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use bucket::{bucket, enumerate_buckets, TimeBucket};
pub use config::{Config, ConfigBuilder, StorageBackendKind};
pub use error::{PulseError, Result};
pub use types::{AttributeValue, MetricRow, ResourceContext, RowCandidate};
