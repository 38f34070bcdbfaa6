//! OTLP/gRPC metrics service, called in-process.

mod common;

use common::*;
use opentelemetry_proto::tonic::collector::metrics::v1::metrics_service_server::MetricsService;
use pulseops_lib::receiver::grpc::OtlpMetricsService;
use pulseops_lib::storage::InMemoryStore;
use std::sync::Arc;
use tonic::{Code, Request};

#[tokio::test]
async fn test_export_writes_rows() {
    let store = Arc::new(InMemoryStore::new());
    let app = app_with(store.clone());
    let service = OtlpMetricsService::new(Arc::clone(app.ingestor()));

    let request = gauge_request("edge-3", "system.cpu.percent", &[(T0_MS, 12.0), (T0_MS + 1000, 13.0)]);
    let response = service.export(Request::new(request)).await.unwrap().into_inner();

    assert!(response.partial_success.is_none());
    assert_eq!(store.row_count(), 2);
}

#[tokio::test]
async fn test_unset_timestamps_reported_as_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let app = app_with(store.clone());
    let service = OtlpMetricsService::new(Arc::clone(app.ingestor()));

    let mut request = gauge_request("edge-3", "system.cpu.percent", &[(T0_MS, 1.0), (T0_MS + 1, 2.0)]);
    if let Some(opentelemetry_proto::tonic::metrics::v1::metric::Data::Gauge(gauge)) =
        &mut request.resource_metrics[0].scope_metrics[0].metrics[0].data
    {
        gauge.data_points[1].time_unix_nano = 0;
    }

    let response = service.export(Request::new(request)).await.unwrap().into_inner();
    let partial = response.partial_success.unwrap();
    assert_eq!(partial.rejected_data_points, 1);
    assert_eq!(store.row_count(), 1);
}

#[tokio::test]
async fn test_partial_write_reported() {
    let store = FlakyStore::new();
    store.fail_every_nth_write(2);
    let app = app_with(store.clone());
    let service = OtlpMetricsService::new(Arc::clone(app.ingestor()));

    let points: Vec<(i64, f64)> = (0..4).map(|i| (T0_MS + i, 1.0)).collect();
    let response = service
        .export(Request::new(gauge_request("edge-1", "m", &points)))
        .await
        .unwrap()
        .into_inner();

    let partial = response.partial_success.unwrap();
    assert_eq!(partial.rejected_data_points, 2);
    assert!(partial.error_message.contains("write timeout"));
}

#[tokio::test]
async fn test_storage_down_is_unavailable_status() {
    let store = FlakyStore::new();
    store.fail_all_writes();
    let app = app_with(store.clone());
    let service = OtlpMetricsService::new(Arc::clone(app.ingestor()));

    let status = service
        .export(Request::new(gauge_request("edge-1", "m", &[(T0_MS, 1.0)])))
        .await
        .unwrap_err();

    assert_eq!(status.code(), Code::Unavailable);
}
