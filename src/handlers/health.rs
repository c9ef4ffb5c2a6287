//! Health and Infrastructure Handlers
//!
//! Kubernetes probes and Prometheus metrics.

use axum::{extract::State, http::StatusCode, response::Json};
use serde::Serialize;

use super::state::{run_blocking, AppState};
use crate::metrics;

/// Health response for main health endpoint
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub tests_total: u64,
    pub tests_running: u64,
}

/// Main health check endpoint
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    match run_blocking(&state, |svc| svc.status_counts()).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(HealthResponse {
                status: "healthy".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                uptime_secs: state.uptime_secs(),
                tests_total: summary.total,
                tests_running: summary.running,
            }),
        ),
        Err(e) => {
            tracing::warn!(error = %e, "Health check could not read the store");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "degraded".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    uptime_secs: state.uptime_secs(),
                    tests_total: 0,
                    tests_running: 0,
                }),
            )
        }
    }
}

/// Liveness probe - process is up and not deadlocked
pub async fn health_live() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "alive",
            "timestamp": chrono::Utc::now().to_rfc3339()
        })),
    )
}

/// Readiness probe - 200 when the store answers, 503 otherwise
pub async fn health_ready(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let readiness = run_blocking(&state, |svc| {
        svc.store()
            .get_test("__readiness_probe__")
            .map_err(Into::into)
    })
    .await;
    match readiness {
        Ok(_) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": chrono::Utc::now().to_rfc3339()
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "error": e.to_string(),
                "timestamp": chrono::Utc::now().to_rfc3339()
            })),
        ),
    }
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    use prometheus::Encoder;

    // First scrape seeds the tests-by-status gauge; transitions keep it current
    if let Err(e) = run_blocking(&state, |svc| svc.status_counts()).await {
        tracing::warn!(error = %e, "Could not read tests-by-status counts");
    }

    let encoder = prometheus::TextEncoder::new();
    let metric_families = metrics::METRICS_REGISTRY.gather();

    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
