//! HTTP OTLP receiver implementation.
//!
//! Implements OTLP/HTTP metrics export on port 4318. Protobuf bodies are
//! recognised by content type; anything else is treated as OTLP/JSON.

use super::{Ingested, MetricsIngestor};
use crate::core::PulseError;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

/// HTTP OTLP server state.
#[derive(Clone)]
pub struct HttpIngestState {
    pub ingestor: Arc<MetricsIngestor>,
}

/// Body returned by `POST /v1/metrics`.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum IngestResponse {
    Success {
        inserted: usize,
    },
    Partial {
        inserted: usize,
        failed: usize,
        error: String,
    },
}

impl From<&Ingested> for IngestResponse {
    fn from(ingested: &Ingested) -> Self {
        let report = &ingested.report;
        if report.failed == 0 {
            return IngestResponse::Success {
                inserted: report.inserted,
            };
        }
        IngestResponse::Partial {
            inserted: report.inserted,
            failed: report.failed,
            error: report
                .first_error
                .as_ref()
                .map_or_else(String::new, ToString::to_string),
        }
    }
}

/// Create HTTP router for OTLP endpoints.
pub fn create_http_router(ingestor: Arc<MetricsIngestor>, max_body_bytes: usize) -> Router {
    let state = HttpIngestState { ingestor };

    Router::new()
        .route("/v1/metrics", post(handle_metrics_v1))
        .route("/health", get(health_check))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(
                    CorsLayer::new()
                        .allow_origin(tower_http::cors::Any)
                        .allow_methods(tower_http::cors::Any)
                        .allow_headers(tower_http::cors::Any),
                ),
        )
        .with_state(state)
}

/// Handle OTLP metrics export requests.
async fn handle_metrics_v1(
    State(state): State<HttpIngestState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IngestResponse>, HttpError> {
    tracing::debug!("Received HTTP metrics export request, {} bytes", body.len());

    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/json");

    let ingested = if content_type.contains("application/x-protobuf")
        || content_type.contains("application/octet-stream")
    {
        state.ingestor.ingest_protobuf(&body).await?
    } else {
        state.ingestor.ingest_json(&body).await?
    };

    Ok(Json(IngestResponse::from(&ingested)))
}

async fn health_check(State(state): State<HttpIngestState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "pulseops-ingest",
        "version": env!("CARGO_PKG_VERSION"),
        "counters": state.ingestor.monitor().snapshot(),
    }))
}

/// HTTP error type, shared by the ingest and query routers.
#[derive(Debug)]
pub enum HttpError {
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl From<PulseError> for HttpError {
    fn from(err: PulseError) -> Self {
        if err.is_client_error() {
            HttpError::BadRequest(err.to_string())
        } else if err.is_unavailable() {
            HttpError::Unavailable(err.to_string())
        } else {
            tracing::error!("Request failed ({}): {}", err.category(), err);
            HttpError::Internal(err.to_string())
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            HttpError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            HttpError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            HttpError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(serde_json::json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl std::fmt::Display for HttpError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HttpError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            HttpError::Unavailable(msg) => write!(f, "Service Unavailable: {}", msg),
            HttpError::Internal(msg) => write!(f, "Internal Error: {}", msg),
        }
    }
}

impl std::error::Error for HttpError {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::flatten::FlattenStats;
    use crate::storage::WriteReport;

    fn ingested(inserted: usize, failed: usize) -> Ingested {
        Ingested {
            report: WriteReport {
                attempted: inserted + failed,
                inserted,
                failed,
                first_error: (failed > 0).then(|| PulseError::storage_unavailable("write timeout")),
            },
            stats: FlattenStats::default(),
        }
    }

    #[test]
    fn test_success_body() {
        let body = serde_json::to_value(IngestResponse::from(&ingested(3, 0))).unwrap();
        assert_eq!(body, serde_json::json!({"status": "success", "inserted": 3}));
    }

    #[test]
    fn test_partial_body_reports_counts() {
        let body = serde_json::to_value(IngestResponse::from(&ingested(7, 3))).unwrap();
        assert_eq!(body["status"], "partial");
        assert_eq!(body["inserted"], 7);
        assert_eq!(body["failed"], 3);
        assert_eq!(body["error"], "Storage unavailable: write timeout");
    }

    #[test]
    fn test_error_status_mapping() {
        let bad = HttpError::from(PulseError::validation("missing resourceMetrics")).into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        let down = HttpError::from(PulseError::storage_unavailable("no hosts")).into_response();
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
        let other = HttpError::from(PulseError::storage("bad row")).into_response();
        assert_eq!(other.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
