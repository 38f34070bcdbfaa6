//! Common test utilities and fixtures.

#![allow(dead_code)]

use chrono::{DateTime, Utc};
use opentelemetry_proto::tonic::{
    collector::metrics::v1::ExportMetricsServiceRequest,
    common::v1::{any_value, AnyValue, KeyValue},
    metrics::v1::{metric::Data, number_data_point, Gauge, Metric, NumberDataPoint, ResourceMetrics, ScopeMetrics},
    resource::v1::Resource,
};
use pulseops_lib::core::bucket::timestamp_from_millis;
use pulseops_lib::core::{Config, MetricRow, PulseError, Result, TimeBucket};
use pulseops_lib::storage::{InMemoryStore, MetricStore, RangeRead};
use pulseops_lib::topology::{Consistency, TopologyPolicy};
use pulseops_lib::Application;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const T0_MS: i64 = 1_700_000_000_000;
pub const DAY_MS: i64 = 86_400_000;

pub fn ts(millis: i64) -> DateTime<Utc> {
    timestamp_from_millis(millis).unwrap()
}

/// OTLP/JSON gauge payload for one node; each point is `(epoch millis, value)`.
pub fn gauge_payload(node: &str, metric: &str, points: &[(i64, f64)]) -> Value {
    let data_points: Vec<Value> = points
        .iter()
        .map(|(millis, value)| {
            json!({
                "timeUnixNano": (i128::from(*millis) * 1_000_000).to_string(),
                "asDouble": value,
            })
        })
        .collect();

    json!({
        "resourceMetrics": [{
            "resource": {"attributes": [{"key": "node.id", "value": {"stringValue": node}}]},
            "scopeMetrics": [{
                "metrics": [{"name": metric, "gauge": {"dataPoints": data_points}}]
            }]
        }]
    })
}

/// Protobuf equivalent of [`gauge_payload`].
pub fn gauge_request(node: &str, metric: &str, points: &[(i64, f64)]) -> ExportMetricsServiceRequest {
    let data_points = points
        .iter()
        .map(|(millis, value)| NumberDataPoint {
            time_unix_nano: u64::try_from(*millis).unwrap() * 1_000_000,
            value: Some(number_data_point::Value::AsDouble(*value)),
            ..Default::default()
        })
        .collect();

    ExportMetricsServiceRequest {
        resource_metrics: vec![ResourceMetrics {
            resource: Some(Resource {
                attributes: vec![KeyValue {
                    key: "node.id".into(),
                    value: Some(AnyValue {
                        value: Some(any_value::Value::StringValue(node.into())),
                    }),
                }],
                ..Default::default()
            }),
            scope_metrics: vec![ScopeMetrics {
                metrics: vec![Metric {
                    name: metric.into(),
                    data: Some(Data::Gauge(Gauge { data_points })),
                    ..Default::default()
                }],
                ..Default::default()
            }],
            ..Default::default()
        }],
    }
}

/// In-memory store with injectable faults.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: InMemoryStore,
    failing_buckets: Mutex<HashSet<TimeBucket>>,
    fail_writes: AtomicBool,
    fail_every_nth_write: AtomicUsize,
    pub inserts: AtomicUsize,
    pub reads: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every read of `bucket` fails.
    pub fn fail_bucket(&self, bucket: TimeBucket) {
        self.failing_buckets.lock().unwrap().insert(bucket);
    }

    /// Every write fails.
    pub fn fail_all_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    /// Every `n`th write fails.
    pub fn fail_every_nth_write(&self, n: usize) {
        self.fail_every_nth_write.store(n, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl MetricStore for FlakyStore {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn verify_schema(&self) -> Result<()> {
        self.inner.verify_schema().await
    }

    async fn create_schema(&self, topology: &TopologyPolicy) -> Result<()> {
        self.inner.create_schema(topology).await
    }

    async fn insert(&self, row: &MetricRow, consistency: Consistency) -> Result<()> {
        let call = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        let nth = self.fail_every_nth_write.load(Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) || (nth > 0 && call % nth == 0) {
            return Err(PulseError::storage_unavailable("write timeout"));
        }
        self.inner.insert(row, consistency).await
    }

    async fn select_range(&self, read: &RangeRead, consistency: Consistency) -> Result<Vec<MetricRow>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.failing_buckets.lock().unwrap().contains(&read.bucket) {
            return Err(PulseError::storage_unavailable(format!("read timeout on {}", read.bucket)));
        }
        self.inner.select_range(read, consistency).await
    }

    async fn shutdown(&self) -> Result<()> {
        self.inner.shutdown().await
    }
}

/// Application over `store` with default configuration.
pub fn app_with(store: Arc<dyn MetricStore>) -> Application {
    Application::with_store(Config::default(), store).unwrap()
}
