//! Query HTTP API consumed by the dashboard.
//!
//! Every endpoint takes `from` and `to` as epoch-millisecond strings and
//! returns `[{Time, Value, node_id}]` sorted by `Time`. When some daily
//! partitions could not be read the body is still returned and the failed
//! buckets are listed in the `x-pulseops-partial-buckets` header.

use crate::core::bucket::timestamp_from_millis;
use crate::core::{PulseError, Result};
use crate::monitoring::Monitor;
use crate::query::{format_rows, RangeQueryPlanner};
use crate::receiver::http::HttpError;
use axum::{
    extract::{Path, Query, State},
    http::HeaderValue,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// Header listing buckets whose reads failed.
pub const PARTIAL_BUCKETS_HEADER: &str = "x-pulseops-partial-buckets";

/// Metric served by `/api/cpu`.
pub const CPU_METRIC: &str = "system.cpu.percent";

/// Metric served by `/api/memory`.
pub const MEMORY_METRIC: &str = "system.memory.percent";

/// API server state.
#[derive(Clone)]
struct ApiState {
    planner: Arc<RangeQueryPlanner>,
    monitor: Arc<Monitor>,
}

/// Query parameters for range endpoints.
#[derive(Debug, Deserialize)]
struct RangeParams {
    from: Option<String>,
    to: Option<String>,
}

/// Create the query router.
pub fn create_query_router(planner: Arc<RangeQueryPlanner>, monitor: Arc<Monitor>) -> Router {
    let state = ApiState { planner, monitor };

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/cpu", get(cpu_handler))
        .route("/api/memory", get(memory_handler))
        .route("/api/metrics/:metric_name", get(metric_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// GET /health
async fn health_handler(State(state): State<ApiState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "pulseops-query",
        "version": env!("CARGO_PKG_VERSION"),
        "counters": state.monitor.snapshot(),
    }))
}

/// GET /api/cpu
async fn cpu_handler(
    State(state): State<ApiState>,
    Query(params): Query<RangeParams>,
) -> std::result::Result<Response, HttpError> {
    range_query(&state, CPU_METRIC, &params).await
}

/// GET /api/memory
async fn memory_handler(
    State(state): State<ApiState>,
    Query(params): Query<RangeParams>,
) -> std::result::Result<Response, HttpError> {
    range_query(&state, MEMORY_METRIC, &params).await
}

/// GET /api/metrics/:metric_name
async fn metric_handler(
    State(state): State<ApiState>,
    Path(metric_name): Path<String>,
    Query(params): Query<RangeParams>,
) -> std::result::Result<Response, HttpError> {
    range_query(&state, &metric_name, &params).await
}

async fn range_query(
    state: &ApiState,
    metric_name: &str,
    params: &RangeParams,
) -> std::result::Result<Response, HttpError> {
    let bounds = parse_bound("from", params.from.as_deref())
        .and_then(|from| Ok((from, parse_bound("to", params.to.as_deref())?)));
    let (from, to) = match bounds {
        Ok(bounds) => bounds,
        Err(e) => {
            state.monitor.record_rejected();
            return Err(e.into());
        },
    };

    let result = state.planner.query(metric_name, from, to).await.map_err(|e| {
        if e.is_client_error() {
            state.monitor.record_rejected();
        }
        HttpError::from(e)
    })?;

    let mut response = Json(format_rows(&result.rows)).into_response();
    if result.is_partial() {
        let failed = result
            .failed_buckets()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        if let Ok(value) = HeaderValue::from_str(&failed) {
            response.headers_mut().insert(PARTIAL_BUCKETS_HEADER, value);
        }
    }
    Ok(response)
}

/// Parse an epoch-millisecond query parameter.
fn parse_bound(name: &str, raw: Option<&str>) -> Result<DateTime<Utc>> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| PulseError::validation(format!("query parameter '{}' is required", name)))?;
    let millis: i64 = raw.parse().map_err(|_| {
        PulseError::validation(format!("query parameter '{}' must be epoch milliseconds, got '{}'", name, raw))
    })?;
    timestamp_from_millis(millis)
        .ok_or_else(|| PulseError::validation(format!("query parameter '{}' is out of range", name)))
}
