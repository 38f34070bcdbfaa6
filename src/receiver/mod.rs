//! OTLP metrics receivers.
//!
//! OTLP/HTTP (JSON or protobuf) and OTLP/gRPC payloads are decoded into the
//! same protobuf request type, flattened into rows and handed to the
//! [`IngestWriter`]. Shape validation happens before any storage call.

pub mod flatten;
pub mod grpc;
pub mod http;
pub mod otlp_json;

use crate::core::{PulseError, Result};
use crate::monitoring::Monitor;
use crate::storage::{IngestWriter, WriteReport};
use flatten::FlattenStats;
use opentelemetry_proto::tonic::collector::metrics::v1::ExportMetricsServiceRequest;
use prost::Message;
use std::sync::Arc;

pub use flatten::flatten;
pub use grpc::create_metrics_service_server;
pub use http::create_http_router;
pub use otlp_json::decode_metrics_json;

/// Result of one accepted export.
#[derive(Debug)]
pub struct Ingested {
    /// Storage outcome of the flattened rows
    pub report: WriteReport,
    /// What flattening visited and skipped
    pub stats: FlattenStats,
}

/// Shared ingest path behind every transport.
pub struct MetricsIngestor {
    writer: Arc<IngestWriter>,
    monitor: Arc<Monitor>,
}

impl MetricsIngestor {
    pub fn new(writer: Arc<IngestWriter>, monitor: Arc<Monitor>) -> Self {
        Self { writer, monitor }
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    /// Flatten and write an already decoded request.
    pub async fn ingest(&self, request: ExportMetricsServiceRequest) -> Result<Ingested> {
        let flattened = flatten(&request);
        let report = self.writer.write_to_completion(flattened.rows).await?;
        Ok(Ingested {
            report,
            stats: flattened.stats,
        })
    }

    /// Decode an OTLP/JSON body, then ingest it.
    pub async fn ingest_json(&self, body: &[u8]) -> Result<Ingested> {
        let request = decode_metrics_json(body).map_err(|e| {
            self.monitor.record_rejected();
            e
        })?;
        self.ingest(request).await
    }

    /// Decode an OTLP/protobuf body, then ingest it.
    pub async fn ingest_protobuf(&self, body: &[u8]) -> Result<Ingested> {
        let request = ExportMetricsServiceRequest::decode(body).map_err(|e| {
            self.monitor.record_rejected();
            PulseError::protocol(format!("failed to decode protobuf: {}", e))
        })?;
        self.ingest(request).await
    }
}
