//! Row-level domain types shared by ingestion and querying.

use chrono::{DateTime, Utc};
use opentelemetry_semantic_conventions::resource::SERVICE_INSTANCE_ID;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::core::bucket::{bucket, TimeBucket};

/// Resource attribute carrying the edge node identity.
pub const NODE_ID_ATTRIBUTE: &str = "node.id";

/// Node id recorded when a resource carries no usable identity.
pub const UNKNOWN_NODE: &str = "unknown";

/// A scalar attribute value. Only these four shapes survive decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    String(String),
    Int(i64),
    Double(f64),
    Bool(bool),
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::String(s) => f.write_str(s),
            AttributeValue::Int(i) => write!(f, "{}", i),
            AttributeValue::Double(d) => write!(f, "{}", d),
            AttributeValue::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Attributes of the resource that emitted a group of metrics.
///
/// Lives only for the duration of one payload; it annotates rows and is
/// never stored on its own.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceContext {
    attributes: HashMap<String, AttributeValue>,
}

impl ResourceContext {
    /// Build a context from already-decoded attributes. Later keys win.
    pub fn new(attributes: impl IntoIterator<Item = (String, AttributeValue)>) -> Self {
        Self {
            attributes: attributes.into_iter().collect(),
        }
    }

    /// Look up a single attribute.
    pub fn get(&self, key: &str) -> Option<&AttributeValue> {
        self.attributes.get(key)
    }

    /// Number of retained attributes.
    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    /// True when no attribute survived decoding.
    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Identity of the emitting node: `node.id`, then `service.instance.id`,
    /// then [`UNKNOWN_NODE`].
    pub fn node_id(&self) -> String {
        self.get(NODE_ID_ATTRIBUTE)
            .or_else(|| self.get(SERVICE_INSTANCE_ID))
            .map_or_else(|| UNKNOWN_NODE.to_string(), ToString::to_string)
    }
}

/// A flattened datapoint that has not been assigned a partition yet.
#[derive(Debug, Clone, PartialEq)]
pub struct RowCandidate {
    pub node_id: String,
    pub metric_name: String,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// The unit of storage.
///
/// `time_bucket` is always `bucket(timestamp)`; construct rows through
/// [`MetricRow::new`] or `From<RowCandidate>` so that holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub node_id: String,
    pub metric_name: String,
    pub time_bucket: TimeBucket,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

impl MetricRow {
    /// Create a row, deriving its partition from the timestamp.
    pub fn new(
        node_id: impl Into<String>,
        metric_name: impl Into<String>,
        timestamp: DateTime<Utc>,
        value: f64,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            metric_name: metric_name.into(),
            time_bucket: bucket(timestamp),
            timestamp,
            value,
        }
    }

    /// Logical identity: repeated writes with the same identity overwrite each other.
    pub fn identity(&self) -> (&str, &str, DateTime<Utc>) {
        (&self.node_id, &self.metric_name, self.timestamp)
    }
}

impl From<RowCandidate> for MetricRow {
    fn from(candidate: RowCandidate) -> Self {
        MetricRow::new(
            candidate.node_id,
            candidate.metric_name,
            candidate.timestamp,
            candidate.value,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bucket::timestamp_from_millis;

    #[test]
    fn test_node_id_prefers_node_attribute() {
        let ctx = ResourceContext::new([
            (SERVICE_INSTANCE_ID.to_string(), AttributeValue::String("instance-9".into())),
            (NODE_ID_ATTRIBUTE.to_string(), AttributeValue::String("edge-1".into())),
        ]);
        assert_eq!(ctx.node_id(), "edge-1");
    }

    #[test]
    fn test_node_id_falls_back_to_instance_then_unknown() {
        let ctx = ResourceContext::new([(
            "service.instance.id".to_string(),
            AttributeValue::String("instance-9".into()),
        )]);
        assert_eq!(SERVICE_INSTANCE_ID, "service.instance.id");
        assert_eq!(ctx.node_id(), "instance-9");
        assert_eq!(ResourceContext::default().node_id(), UNKNOWN_NODE);
    }

    #[test]
    fn test_non_string_node_id_is_rendered() {
        let ctx = ResourceContext::new([(NODE_ID_ATTRIBUTE.to_string(), AttributeValue::Int(42))]);
        assert_eq!(ctx.node_id(), "42");
    }

    #[test]
    fn test_row_bucket_derived_from_timestamp() {
        let ts = timestamp_from_millis(1_700_000_000_000).unwrap();
        let row = MetricRow::from(RowCandidate {
            node_id: "edge-1".into(),
            metric_name: "system.cpu.percent".into(),
            timestamp: ts,
            value: 42.5,
        });
        assert_eq!(row.time_bucket.to_string(), "2023-11-14");
        assert_eq!(row.identity(), ("edge-1", "system.cpu.percent", ts));
    }
}
