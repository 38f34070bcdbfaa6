//! pulseops - edge metrics ingestion over day-partitioned wide-column storage.
//!
//! pulseops accepts OpenTelemetry metrics from edge nodes, flattens them into
//! one row per datapoint and writes them to a replicated wide-column store
//! partitioned by `(metric_name, day)`. A small query API reads time ranges
//! back by fanning out over the daily partitions a range touches.
//!
//! # Features
//!
//! - **OTLP Ingest**: OTLP/HTTP (JSON and protobuf, port 4318) and OTLP/gRPC (port 4317)
//! - **Daily Partitioning**: every read and write is confined to `(metric_name, day)` partitions
//! - **Partition Tolerance**: local-datacenter consistency keeps writes flowing when the WAN is down
//! - **Degraded Reads**: a failed partition shrinks the answer instead of failing the query
//!
//! # Architecture
//!
//! - `receiver`: OTLP decoding and flattening
//! - `storage`: storage engine contract, backends and the ingest writer
//! - `query`: range planning and response formatting
//! - `topology`: replication and consistency policy
//! - `api`: query HTTP endpoints
//! - `core`: domain models, bucketing, configuration and errors
//! - `cli`: command-line interface
//!
//! # Example
//!
//! ```no_run
//! use pulseops_lib::application::{shutdown_signal, Application, RunMode};
//! use pulseops_lib::core::Config;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let app = Application::start(Config::default()).await?;
//!     app.run(RunMode::All, shutdown_signal()).await?;
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod api;
pub mod application;
pub mod cli;
pub mod core;
pub mod monitoring;
pub mod query;
pub mod receiver;
pub mod storage;
pub mod topology;

// Re-export core types for convenience
pub use crate::application::Application;
pub use crate::core::{Config, PulseError, Result};
