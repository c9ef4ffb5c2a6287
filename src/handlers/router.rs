//! Router Configuration - Centralized route definitions
//!
//! Routes are split into public (health, metrics) and API routes. Rate limiting
//! is applied to API routes only, by the caller.

use axum::{
    routing::{get, post},
    Router,
};

use super::state::AppState;
use super::{experiments, health};

/// Build the public routes
///
/// These must always be reachable for Kubernetes probes and Prometheus scraping.
pub fn build_public_routes(state: AppState) -> Router {
    Router::new()
        // =================================================================
        // HEALTH & KUBERNETES PROBES
        // =================================================================
        .route("/health", get(health::health))
        .route("/health/live", get(health::health_live))
        .route("/health/ready", get(health::health_ready))
        // =================================================================
        // METRICS (PROMETHEUS)
        // =================================================================
        .route("/metrics", get(health::metrics_endpoint))
        .with_state(state)
}

/// Build the experiments API routes
pub fn build_api_routes(state: AppState) -> Router {
    Router::new()
        // =================================================================
        // TEST CRUD
        // =================================================================
        .route(
            "/api/tests",
            get(experiments::list_tests).post(experiments::create_test),
        )
        .route("/api/tests/summary", get(experiments::get_summary))
        .route(
            "/api/tests/{test_id}",
            get(experiments::get_test)
                .put(experiments::update_test)
                .delete(experiments::delete_test),
        )
        // =================================================================
        // LIFECYCLE
        // =================================================================
        .route("/api/tests/{test_id}/start", post(experiments::start_test))
        .route("/api/tests/{test_id}/pause", post(experiments::pause_test))
        .route("/api/tests/{test_id}/resume", post(experiments::resume_test))
        .route("/api/tests/{test_id}/stop", post(experiments::stop_test))
        // =================================================================
        // ASSIGNMENT, CONVERSION & RESULTS
        // =================================================================
        .route(
            "/api/tests/{test_id}/assign",
            post(experiments::assign_variant),
        )
        .route(
            "/api/tests/{test_id}/convert",
            post(experiments::record_conversion),
        )
        .route("/api/tests/{test_id}/results", get(experiments::get_results))
        .with_state(state)
}

/// Build the complete router with public and API routes
///
/// Note: does NOT apply rate limiting or other layers; main.rs does.
pub fn build_router(state: AppState) -> Router {
    let public = build_public_routes(state.clone());
    let api = build_api_routes(state);

    Router::new().merge(public).merge(api)
}
