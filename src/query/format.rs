//! Response shape consumed by the dashboard.

use crate::core::MetricRow;
use serde::{Deserialize, Serialize};

/// One point as the visualization layer expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// Epoch milliseconds
    #[serde(rename = "Time")]
    pub time: i64,
    #[serde(rename = "Value")]
    pub value: f64,
    pub node_id: String,
}

impl From<&MetricRow> for DataPoint {
    fn from(row: &MetricRow) -> Self {
        Self {
            time: row.timestamp.timestamp_millis(),
            value: row.value,
            node_id: row.node_id.clone(),
        }
    }
}

/// Map rows one-to-one, keeping their order.
pub fn format_rows(rows: &[MetricRow]) -> Vec<DataPoint> {
    rows.iter().map(DataPoint::from).collect()
}
