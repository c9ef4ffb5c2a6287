//! Experiment Handlers
//!
//! Test CRUD, lifecycle transitions, assignment, conversion and results.
//! Every service call runs on the blocking pool via [`run_blocking`].

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

use super::state::{run_blocking, AppState};
use super::types::{
    AssignRequest, ConversionResponse, ConvertRequest, ListTestsQuery, ListTestsResponse,
    SummaryQuery,
};
use crate::errors::AppError;
use crate::experiments::{
    Assignment, CreateTest, Test, TestFilter, TestResults, TestStatus, TestSummary, TestUpdate,
};

/// GET /api/tests - List tests, optionally by organization and status
pub async fn list_tests(
    State(state): State<AppState>,
    Query(query): Query<ListTestsQuery>,
) -> Result<Json<ListTestsResponse>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<TestStatus>)
        .transpose()?;
    let filter = TestFilter {
        organization_id: query.organization_id,
        status,
    };

    let tests = run_blocking(&state, move |svc| svc.list_tests(&filter)).await?;
    Ok(Json(ListTestsResponse {
        count: tests.len(),
        tests,
    }))
}

/// POST /api/tests - Create a test in draft
pub async fn create_test(
    State(state): State<AppState>,
    Json(req): Json<CreateTest>,
) -> Result<(StatusCode, Json<Test>), AppError> {
    let test = run_blocking(&state, move |svc| svc.create_test(req)).await?;
    Ok((StatusCode::CREATED, Json(test)))
}

/// GET /api/tests/summary - Number of tests per status
pub async fn get_summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<TestSummary>, AppError> {
    let summary = run_blocking(&state, move |svc| {
        svc.summary(query.organization_id.as_deref())
    })
    .await?;
    Ok(Json(summary))
}

/// GET /api/tests/{test_id}
pub async fn get_test(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<Test>, AppError> {
    let test = run_blocking(&state, move |svc| svc.get_test(&test_id)).await?;
    Ok(Json(test))
}

/// PUT /api/tests/{test_id} - Update a draft test
pub async fn update_test(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
    Json(update): Json<TestUpdate>,
) -> Result<Json<Test>, AppError> {
    let test = run_blocking(&state, move |svc| svc.update_test(&test_id, update)).await?;
    Ok(Json(test))
}

/// DELETE /api/tests/{test_id}
pub async fn delete_test(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<StatusCode, AppError> {
    run_blocking(&state, move |svc| svc.delete_test(&test_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/tests/{test_id}/start
pub async fn start_test(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<Test>, AppError> {
    let test = run_blocking(&state, move |svc| svc.start_test(&test_id)).await?;
    Ok(Json(test))
}

/// POST /api/tests/{test_id}/pause
pub async fn pause_test(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<Test>, AppError> {
    let test = run_blocking(&state, move |svc| svc.pause_test(&test_id)).await?;
    Ok(Json(test))
}

/// POST /api/tests/{test_id}/resume
pub async fn resume_test(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<Test>, AppError> {
    let test = run_blocking(&state, move |svc| svc.resume_test(&test_id)).await?;
    Ok(Json(test))
}

/// POST /api/tests/{test_id}/stop - Complete the test; the body carries the frozen results
pub async fn stop_test(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<Test>, AppError> {
    let test = run_blocking(&state, move |svc| svc.stop_test(&test_id)).await?;
    Ok(Json(test))
}

/// POST /api/tests/{test_id}/assign - Sticky variant for a session
pub async fn assign_variant(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
    Json(req): Json<AssignRequest>,
) -> Result<Json<Assignment>, AppError> {
    let assignment = run_blocking(&state, move |svc| {
        svc.assign_variant(&test_id, &req.session_id, req.user_id.as_deref())
    })
    .await?;
    Ok(Json(assignment))
}

/// POST /api/tests/{test_id}/convert - Record a conversion for an assigned session
pub async fn record_conversion(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
    Json(req): Json<ConvertRequest>,
) -> Result<Json<ConversionResponse>, AppError> {
    let session = run_blocking(&state, move |svc| {
        svc.record_conversion(&test_id, &req.session_id, req.event.as_deref(), req.value)
    })
    .await?;
    Ok(Json(session.into()))
}

/// GET /api/tests/{test_id}/results
pub async fn get_results(
    State(state): State<AppState>,
    Path(test_id): Path<String>,
) -> Result<Json<TestResults>, AppError> {
    let results = run_blocking(&state, move |svc| svc.results(&test_id)).await?;
    Ok(Json(results))
}
