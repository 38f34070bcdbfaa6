//! OTLP/JSON metrics decoding.
//!
//! Turns the JSON encoding of `ExportMetricsServiceRequest` into the protobuf
//! types, so both wire formats share one flattener. Field variants (gauge vs
//! sum, `asDouble` vs `asInt`, the four attribute value kinds) are decoded into
//! typed structs up front instead of being checked for presence later.
//!
//! Only the top-level shape is strict. A metric, datapoint or attribute that
//! does not decode is skipped and the rest of the payload is kept.

use crate::core::{PulseError, Result};
use opentelemetry_proto::tonic::{
    collector::metrics::v1::ExportMetricsServiceRequest,
    common::v1::{any_value, AnyValue, KeyValue},
    metrics::v1::{
        metric::Data, number_data_point, AggregationTemporality, Gauge, Metric, NumberDataPoint, ResourceMetrics,
        ScopeMetrics, Sum,
    },
    resource::v1::Resource,
};
use serde::Deserialize;
use serde_json::Value;

/// int64/uint64 fields may be sent as JSON numbers or decimal strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum IntRepr {
    Number(i64),
    Unsigned(u64),
    Text(String),
}

impl IntRepr {
    fn as_i64(&self) -> Option<i64> {
        match self {
            IntRepr::Number(n) => Some(*n),
            IntRepr::Unsigned(n) => i64::try_from(*n).ok(),
            IntRepr::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_u64(&self) -> Option<u64> {
        match self {
            IntRepr::Number(n) => u64::try_from(*n).ok(),
            IntRepr::Unsigned(n) => Some(*n),
            IntRepr::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Doubles may carry `"NaN"` / `"Infinity"` as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum DoubleRepr {
    Number(f64),
    Text(String),
}

impl DoubleRepr {
    fn as_f64(&self) -> Option<f64> {
        match self {
            DoubleRepr::Number(n) => Some(*n),
            DoubleRepr::Text(s) => s.trim().parse().ok(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct JsonAnyValue {
    string_value: Option<String>,
    int_value: Option<IntRepr>,
    double_value: Option<DoubleRepr>,
    bool_value: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct JsonKeyValue {
    key: String,
    #[serde(default)]
    value: JsonAnyValue,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct JsonNumberDataPoint {
    time_unix_nano: Option<IntRepr>,
    start_time_unix_nano: Option<IntRepr>,
    as_double: Option<DoubleRepr>,
    as_int: Option<IntRepr>,
}

/// Metric envelope. Point lists stay raw so one bad point cannot take its
/// siblings down with it.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct JsonMetric {
    name: String,
    description: Option<String>,
    unit: Option<String>,
    gauge: Option<Value>,
    sum: Option<Value>,
}

/// Decode an OTLP/JSON metrics body.
pub fn decode_metrics_json(body: &[u8]) -> Result<ExportMetricsServiceRequest> {
    let json: Value = serde_json::from_slice(body)
        .map_err(|e| PulseError::validation(format!("Invalid JSON: {}", e)))?;
    decode_metrics_value(&json)
}

/// Decode an already-parsed OTLP/JSON metrics document.
pub fn decode_metrics_value(json: &Value) -> Result<ExportMetricsServiceRequest> {
    let resource_metrics = json
        .get("resourceMetrics")
        .ok_or_else(|| PulseError::validation("Missing 'resourceMetrics' field"))?
        .as_array()
        .ok_or_else(|| PulseError::validation("'resourceMetrics' must be an array"))?;

    Ok(ExportMetricsServiceRequest {
        resource_metrics: resource_metrics.iter().map(decode_resource_metrics).collect(),
    })
}

fn decode_resource_metrics(json: &Value) -> ResourceMetrics {
    let resource = json.get("resource").map(|resource| Resource {
        attributes: decode_attributes(resource.get("attributes")),
        ..Default::default()
    });

    let scope_metrics = json
        .get("scopeMetrics")
        .and_then(Value::as_array)
        .map(|scopes| scopes.iter().map(decode_scope_metrics).collect())
        .unwrap_or_default();

    ResourceMetrics {
        resource,
        scope_metrics,
        ..Default::default()
    }
}

fn decode_scope_metrics(json: &Value) -> ScopeMetrics {
    let metrics = json
        .get("metrics")
        .and_then(Value::as_array)
        .map(|metrics| metrics.iter().flat_map(decode_metric).collect())
        .unwrap_or_default();

    ScopeMetrics {
        metrics,
        ..Default::default()
    }
}

/// One JSON metric may carry both a gauge and a sum; each becomes its own
/// protobuf metric since `data` is a oneof there.
fn decode_metric(json: &Value) -> Vec<Metric> {
    let metric = match JsonMetric::deserialize(json) {
        Ok(metric) => metric,
        Err(e) => {
            tracing::debug!("Skipping undecodable metric: {}", e);
            return Vec::new();
        },
    };

    let mut decoded = Vec::with_capacity(2);
    let make = |data: Data| Metric {
        name: metric.name.clone(),
        description: metric.description.clone().unwrap_or_default(),
        unit: metric.unit.clone().unwrap_or_default(),
        data: Some(data),
        ..Default::default()
    };

    if let Some(gauge) = &metric.gauge {
        decoded.push(make(Data::Gauge(Gauge {
            data_points: decode_data_points(&metric.name, gauge),
        })));
    }
    if let Some(sum) = &metric.sum {
        decoded.push(make(Data::Sum(Sum {
            data_points: decode_data_points(&metric.name, sum),
            aggregation_temporality: decode_temporality(sum.get("aggregationTemporality")),
            is_monotonic: sum.get("isMonotonic").and_then(Value::as_bool).unwrap_or(false),
        })));
    }

    if decoded.is_empty() {
        tracing::debug!("Skipping metric '{}' with neither gauge nor sum data", metric.name);
    }
    decoded
}

/// Decode `dataPoints` one element at a time, dropping only the points that fail.
fn decode_data_points(metric_name: &str, json: &Value) -> Vec<NumberDataPoint> {
    let Some(points) = json.get("dataPoints").and_then(Value::as_array) else {
        return Vec::new();
    };

    points
        .iter()
        .filter_map(|point| match JsonNumberDataPoint::deserialize(point) {
            Ok(point) => Some(decode_number_point(&point)),
            Err(e) => {
                tracing::debug!("Skipping undecodable point of '{}': {}", metric_name, e);
                None
            },
        })
        .collect()
}

/// Temporality arrives as the enum number or, in proto3 JSON, its name.
fn decode_temporality(json: Option<&Value>) -> i32 {
    match json {
        Some(Value::Number(n)) => n.as_i64().and_then(|n| i32::try_from(n).ok()).unwrap_or(0),
        Some(Value::String(name)) => AggregationTemporality::from_str_name(name)
            .map(|t| t as i32)
            .or_else(|| name.trim().parse().ok())
            .unwrap_or(0),
        _ => 0,
    }
}

/// `asDouble` wins unless it is zero, then `asInt`, then zero.
///
/// A genuine `asDouble: 0` next to an `asInt` is indistinguishable from an
/// absent double and yields the integer.
fn decode_number_point(json: &JsonNumberDataPoint) -> NumberDataPoint {
    let as_double = json.as_double.as_ref().and_then(DoubleRepr::as_f64);
    let as_int = json.as_int.as_ref().and_then(IntRepr::as_i64);

    let value = match (as_double, as_int) {
        (Some(d), _) if d != 0.0 => Some(number_data_point::Value::AsDouble(d)),
        (_, Some(i)) => Some(number_data_point::Value::AsInt(i)),
        (Some(d), None) => Some(number_data_point::Value::AsDouble(d)),
        (None, None) => None,
    };

    NumberDataPoint {
        time_unix_nano: json
            .time_unix_nano
            .as_ref()
            .and_then(IntRepr::as_u64)
            .unwrap_or(0),
        start_time_unix_nano: json
            .start_time_unix_nano
            .as_ref()
            .and_then(IntRepr::as_u64)
            .unwrap_or(0),
        value,
        ..Default::default()
    }
}

fn decode_attributes(json: Option<&Value>) -> Vec<KeyValue> {
    let Some(attributes) = json.and_then(Value::as_array) else {
        return Vec::new();
    };

    attributes
        .iter()
        .filter_map(|attr| JsonKeyValue::deserialize(attr).ok())
        .filter_map(|kv| {
            decode_any_value(&kv.value).map(|value| KeyValue {
                key: kv.key,
                value: Some(value),
            })
        })
        .collect()
}

/// First populated variant wins: string, int, double, bool.
fn decode_any_value(json: &JsonAnyValue) -> Option<AnyValue> {
    let value = if let Some(s) = json.string_value.as_ref().filter(|s| !s.is_empty()) {
        any_value::Value::StringValue(s.clone())
    } else if let Some(i) = json.int_value.as_ref().and_then(IntRepr::as_i64) {
        any_value::Value::IntValue(i)
    } else if let Some(d) = json.double_value.as_ref().and_then(DoubleRepr::as_f64) {
        any_value::Value::DoubleValue(d)
    } else if let Some(b) = json.bool_value {
        any_value::Value::BoolValue(b)
    } else {
        return None;
    };
    Some(AnyValue { value: Some(value) })
}
