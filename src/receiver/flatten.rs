//! Flattening of nested OTLP metrics into row candidates.
//!
//! resource → scope → metric → datapoint becomes one [`RowCandidate`] per
//! gauge or sum datapoint. The gauge/sum distinction is not carried into the
//! row, and cumulative sums are stored as reported, without differencing.

use crate::core::bucket::timestamp_from_unix_nanos;
use crate::core::{AttributeValue, ResourceContext, RowCandidate};
use opentelemetry_proto::tonic::{
    collector::metrics::v1::ExportMetricsServiceRequest,
    common::v1::{any_value, AnyValue},
    metrics::v1::{metric::Data, number_data_point, Metric, NumberDataPoint},
    resource::v1::Resource,
};

/// Counters describing one flattening pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlattenStats {
    /// Resource groups visited
    pub resources: usize,
    /// Metrics visited
    pub metrics: usize,
    /// Metrics skipped because they carry no gauge or sum data
    pub skipped_metrics: usize,
    /// Datapoints skipped because their timestamp is unusable
    pub skipped_points: usize,
}

/// Output of [`flatten`].
#[derive(Debug, Clone, Default)]
pub struct Flattened {
    /// One candidate per accepted datapoint, in payload order
    pub rows: Vec<RowCandidate>,
    /// What was visited and skipped
    pub stats: FlattenStats,
}

/// Walk an export request and produce one row candidate per gauge/sum datapoint.
pub fn flatten(request: &ExportMetricsServiceRequest) -> Flattened {
    let mut out = Flattened::default();

    for resource_metrics in &request.resource_metrics {
        out.stats.resources += 1;
        let context = resource_context(resource_metrics.resource.as_ref());
        let node_id = context.node_id();

        for scope_metrics in &resource_metrics.scope_metrics {
            for metric in &scope_metrics.metrics {
                out.stats.metrics += 1;
                flatten_metric(metric, &node_id, &mut out);
            }
        }
    }

    tracing::debug!(
        "Flattened {} resources, {} metrics into {} rows ({} metrics, {} points skipped)",
        out.stats.resources,
        out.stats.metrics,
        out.rows.len(),
        out.stats.skipped_metrics,
        out.stats.skipped_points
    );

    out
}

fn flatten_metric(metric: &Metric, node_id: &str, out: &mut Flattened) {
    let points = match &metric.data {
        Some(Data::Gauge(gauge)) => &gauge.data_points,
        Some(Data::Sum(sum)) => &sum.data_points,
        Some(Data::Histogram(_) | Data::ExponentialHistogram(_) | Data::Summary(_)) | None => {
            tracing::trace!("Skipping metric '{}': not a gauge or sum", metric.name);
            out.stats.skipped_metrics += 1;
            return;
        },
    };

    for point in points {
        let Some(timestamp) = point_timestamp(point) else {
            tracing::debug!(
                "Skipping datapoint of '{}' with unusable timeUnixNano {}",
                metric.name,
                point.time_unix_nano
            );
            out.stats.skipped_points += 1;
            continue;
        };

        out.rows.push(RowCandidate {
            node_id: node_id.to_string(),
            metric_name: metric.name.clone(),
            timestamp,
            value: number_value(point),
        });
    }
}

/// A zero `time_unix_nano` means the field was never set.
fn point_timestamp(point: &NumberDataPoint) -> Option<chrono::DateTime<chrono::Utc>> {
    if point.time_unix_nano == 0 {
        return None;
    }
    timestamp_from_unix_nanos(point.time_unix_nano)
}

/// Numeric value of a datapoint: double, else integer, else zero.
pub fn number_value(point: &NumberDataPoint) -> f64 {
    match point.value {
        Some(number_data_point::Value::AsDouble(v)) => v,
        #[allow(clippy::cast_precision_loss)]
        Some(number_data_point::Value::AsInt(v)) => v as f64,
        None => 0.0,
    }
}

/// Decode a resource's attributes into a [`ResourceContext`].
pub fn resource_context(resource: Option<&Resource>) -> ResourceContext {
    let Some(resource) = resource else {
        return ResourceContext::default();
    };

    ResourceContext::new(resource.attributes.iter().filter_map(|kv| {
        kv.value
            .as_ref()
            .and_then(attribute_value)
            .map(|value| (kv.key.clone(), value))
    }))
}

/// Keep scalar attribute values; arrays, maps, bytes and empty strings are dropped.
pub fn attribute_value(value: &AnyValue) -> Option<AttributeValue> {
    match value.value.as_ref()? {
        any_value::Value::StringValue(s) if s.is_empty() => None,
        any_value::Value::StringValue(s) => Some(AttributeValue::String(s.clone())),
        any_value::Value::IntValue(i) => Some(AttributeValue::Int(*i)),
        any_value::Value::DoubleValue(d) => Some(AttributeValue::Double(*d)),
        any_value::Value::BoolValue(b) => Some(AttributeValue::Bool(*b)),
        any_value::Value::ArrayValue(_)
        | any_value::Value::KvlistValue(_)
        | any_value::Value::BytesValue(_) => None,
    }
}
