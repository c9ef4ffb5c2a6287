//! API error handling with structured error types and codes
//! Maps domain errors onto HTTP status codes and a stable JSON body

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::experiments::ExperimentError;
use crate::storage::StoreError;

/// Structured error response for API clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Additional error context
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

/// Application error types with proper categorization
#[derive(Debug)]
pub enum AppError {
    // Validation Errors (400)
    InvalidInput { field: String, reason: String },
    InvalidTrafficSplit(String),
    InvalidConfig(String),

    // Not Found Errors (404)
    TestNotFound(String),
    SessionNotFound { test_id: String, session_id: String },

    // Conflict Errors (409)
    TestAlreadyExists(String),
    TestNotRunning { test_id: String, status: String },
    InvalidTransition { test_id: String, action: String, status: String },

    // Internal Errors (500)
    StorageError(String),
    SerializationError(String),

    // Generic wrapper for external errors
    Internal(anyhow::Error),
}

impl AppError {
    /// Get error code for client identification
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::InvalidTrafficSplit(_) => "INVALID_TRAFFIC_SPLIT",
            Self::InvalidConfig(_) => "INVALID_CONFIG",
            Self::TestNotFound(_) => "TEST_NOT_FOUND",
            Self::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            Self::TestAlreadyExists(_) => "TEST_ALREADY_EXISTS",
            Self::TestNotRunning { .. } => "TEST_NOT_RUNNING",
            Self::InvalidTransition { .. } => "INVALID_TRANSITION",
            Self::StorageError(_) => "STORAGE_ERROR",
            Self::SerializationError(_) => "SERIALIZATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidInput { .. } | Self::InvalidTrafficSplit(_) | Self::InvalidConfig(_) => {
                StatusCode::BAD_REQUEST
            }

            Self::TestNotFound(_) | Self::SessionNotFound { .. } => StatusCode::NOT_FOUND,

            Self::TestAlreadyExists(_)
            | Self::TestNotRunning { .. }
            | Self::InvalidTransition { .. } => StatusCode::CONFLICT,

            Self::StorageError(_) | Self::SerializationError(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Get detailed error message
    pub fn message(&self) -> String {
        match self {
            Self::InvalidInput { field, reason } => {
                format!("Invalid input for field '{field}': {reason}")
            }
            Self::InvalidTrafficSplit(msg) => format!("Invalid traffic split: {msg}"),
            Self::InvalidConfig(msg) => format!("Invalid test configuration: {msg}"),
            Self::TestNotFound(id) => format!("Test not found: {id}"),
            Self::SessionNotFound {
                test_id,
                session_id,
            } => format!("Session {session_id} not found for test {test_id}"),
            Self::TestAlreadyExists(id) => format!("Test already exists: {id}"),
            Self::TestNotRunning { test_id, status } => {
                format!("Test {test_id} is not running (status: {status})")
            }
            Self::InvalidTransition {
                test_id,
                action,
                status,
            } => format!("Cannot {action} test {test_id} in {status} state"),
            Self::StorageError(msg) => format!("Storage error: {msg}"),
            Self::SerializationError(msg) => format!("Serialization error: {msg}"),
            Self::Internal(err) => format!("Internal error: {err}"),
        }
    }

    /// Convert to structured error response
    pub fn to_response(&self) -> ErrorResponse {
        let details = match self {
            Self::TestNotRunning { status, .. } | Self::InvalidTransition { status, .. } => {
                Some(format!("current status: {status}"))
            }
            _ => None,
        };

        ErrorResponse {
            code: self.code().to_string(),
            message: self.message(),
            details,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for AppError {}

/// Convert from anyhow::Error to AppError
impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Serialization(msg) => Self::SerializationError(msg),
            other => Self::StorageError(other.to_string()),
        }
    }
}

impl From<ExperimentError> for AppError {
    fn from(err: ExperimentError) -> Self {
        match err {
            ExperimentError::TestNotFound(id) => Self::TestNotFound(id),
            ExperimentError::TestAlreadyExists(id) => Self::TestAlreadyExists(id),
            ExperimentError::TestNotRunning { test_id, status } => Self::TestNotRunning {
                test_id,
                status: status.to_string(),
            },
            ExperimentError::SessionNotFound {
                test_id,
                session_id,
            } => Self::SessionNotFound {
                test_id,
                session_id,
            },
            ExperimentError::InvalidTrafficSplit(msg) => Self::InvalidTrafficSplit(msg),
            ExperimentError::InvalidConfig(msg) => Self::InvalidConfig(msg),
            ExperimentError::InvalidInput { field, reason } => Self::InvalidInput { field, reason },
            ExperimentError::InvalidTransition {
                test_id,
                action,
                status,
            } => Self::InvalidTransition {
                test_id,
                action: action.to_string(),
                status: status.to_string(),
            },
            ExperimentError::Storage(e) => e.into(),
        }
    }
}

/// Axum IntoResponse implementation for proper HTTP responses
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        crate::metrics::record_error(self.code());
        let body = self.to_response();

        (status, Json(body)).into_response()
    }
}
