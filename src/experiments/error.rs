//! Errors from experiment operations

use super::types::TestStatus;
use crate::storage::StoreError;

/// Errors from A/B testing operations
///
/// All variants are recoverable; callers decide whether to retry, surface the
/// error, or ignore it (a failed conversion record should never block the
/// user action that triggered it).
#[derive(Debug, thiserror::Error)]
pub enum ExperimentError {
    #[error("Test not found: {0}")]
    TestNotFound(String),

    #[error("Test already exists: {0}")]
    TestAlreadyExists(String),

    #[error("Test {test_id} is not running (status: {status})")]
    TestNotRunning { test_id: String, status: TestStatus },

    #[error("Session {session_id} not found for test {test_id}")]
    SessionNotFound { test_id: String, session_id: String },

    #[error("Invalid traffic split: {0}")]
    InvalidTrafficSplit(String),

    #[error("Invalid test configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input for field '{field}': {reason}")]
    InvalidInput { field: String, reason: String },

    #[error("Cannot {action} test {test_id} in {status} state")]
    InvalidTransition {
        test_id: String,
        action: &'static str,
        status: TestStatus,
    },

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl ExperimentError {
    pub(crate) fn invalid_input(field: &str, err: anyhow::Error) -> Self {
        Self::InvalidInput {
            field: field.to_string(),
            reason: err.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExperimentError>;
