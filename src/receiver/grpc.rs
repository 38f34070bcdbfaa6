//! OTLP/gRPC metrics service.

use super::MetricsIngestor;
use opentelemetry_proto::tonic::collector::metrics::v1::{
    metrics_service_server::{MetricsService, MetricsServiceServer},
    ExportMetricsPartialSuccess, ExportMetricsServiceRequest, ExportMetricsServiceResponse,
};
use std::sync::Arc;
use tonic::{Request, Response, Status};

/// Create a metrics service server for gRPC
pub fn create_metrics_service_server(ingestor: Arc<MetricsIngestor>) -> MetricsServiceServer<OtlpMetricsService> {
    MetricsServiceServer::new(OtlpMetricsService { ingestor })
}

/// OTLP metrics export over gRPC.
pub struct OtlpMetricsService {
    ingestor: Arc<MetricsIngestor>,
}

impl OtlpMetricsService {
    pub fn new(ingestor: Arc<MetricsIngestor>) -> Self {
        Self { ingestor }
    }
}

#[tonic::async_trait]
impl MetricsService for OtlpMetricsService {
    async fn export(
        &self,
        request: Request<ExportMetricsServiceRequest>,
    ) -> Result<Response<ExportMetricsServiceResponse>, Status> {
        let ingested = self.ingestor.ingest(request.into_inner()).await.map_err(|e| {
            tracing::warn!("gRPC metrics export failed: {}", e);
            if e.is_client_error() {
                Status::invalid_argument(e.to_string())
            } else if e.is_unavailable() {
                Status::unavailable(e.to_string())
            } else {
                Status::internal(e.to_string())
            }
        })?;

        // Malformed datapoints are rejected alongside failed writes
        let rejected = ingested.report.failed + ingested.stats.skipped_points;
        let partial_success = (rejected > 0).then(|| ExportMetricsPartialSuccess {
            rejected_data_points: i64::try_from(rejected).unwrap_or(i64::MAX),
            error_message: ingested
                .report
                .first_error
                .as_ref()
                .map_or_else(|| "datapoints without a usable timestamp".to_string(), ToString::to_string),
        });

        tracing::debug!(
            "gRPC export: {} rows written, {} rejected",
            ingested.report.inserted,
            rejected
        );

        Ok(Response::new(ExportMetricsServiceResponse { partial_success }))
    }
}
