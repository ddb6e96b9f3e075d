//! HTTP API for on-demand detection, health checks and Prometheus metrics

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use outlier_lib::{
    checker::{DetectionService, ServiceError},
    health::{ComponentStatus, HealthRegistry},
    observability::PipelineMetrics,
};
use prometheus::{Encoder, TextEncoder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: PipelineMetrics,
    pub service: Arc<DetectionService>,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: PipelineMetrics,
        service: Arc<DetectionService>,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            service,
        }
    }
}

/// Error body returned by the detection endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: bool,
    pub code: u16,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn error_response(code: StatusCode, message: &str, error: impl ToString) -> Response {
    let body = ErrorResponse {
        status: false,
        code: code.as_u16(),
        message: message.to_string(),
        error: Some(error.to_string()),
    };
    (code, Json(body)).into_response()
}

#[derive(Debug, Deserialize)]
struct DetectParams {
    #[serde(rename = "siteId")]
    site_id: Option<String>,
}

/// Run detection for one site and return every metric's result
async fn detect_outliers(
    State(state): State<Arc<AppState>>,
    Query(params): Query<DetectParams>,
) -> Response {
    let Some(site_id) = params.site_id.filter(|s| !s.is_empty()) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Missing request parameter",
            "expected siteId parameter",
        );
    };

    match state.service.detect_site(&site_id).await {
        Ok(results) => (StatusCode::OK, Json(results)).into_response(),
        Err(e @ ServiceError::DatasetNotFound(_)) => {
            error_response(StatusCode::NOT_FOUND, "Dataset not found", e)
        }
        Err(ServiceError::Source(e)) => {
            warn!(site_id = %site_id, error = %e, "On-demand detection failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Detection failed",
                format!("{e:#}"),
            )
        }
    }
}

/// Health check response - returns 200 if healthy, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy => StatusCode::OK,
        ComponentStatus::Degraded => StatusCode::OK, // Still operational
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Prometheus metrics endpoint
async fn metrics() -> Response {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response();
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/detect_outliers", get(detect_outliers))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Start the API server
pub async fn serve(
    port: u16,
    state: Arc<AppState>,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}
