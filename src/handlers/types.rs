//! Request and response bodies for the experiments API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::experiments::{Session, Test};

/// Query for GET /api/tests
#[derive(Debug, Default, Deserialize)]
pub struct ListTestsQuery {
    #[serde(default)]
    pub organization_id: Option<String>,
    /// draft | running | paused | completed
    #[serde(default)]
    pub status: Option<String>,
}

/// Query for GET /api/tests/summary
#[derive(Debug, Default, Deserialize)]
pub struct SummaryQuery {
    #[serde(default)]
    pub organization_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListTestsResponse {
    pub tests: Vec<Test>,
    pub count: usize,
}

/// Body for POST /api/tests/{test_id}/assign
#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub session_id: String,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Body for POST /api/tests/{test_id}/convert
#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    pub session_id: String,
    #[serde(default)]
    pub event: Option<String>,
    #[serde(default)]
    pub value: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ConversionResponse {
    pub test_id: String,
    pub session_id: String,
    pub variant_id: String,
    pub converted: bool,
    pub conversion_event: Option<String>,
    pub conversion_value: Option<f64>,
    pub converted_at: Option<DateTime<Utc>>,
}

impl From<Session> for ConversionResponse {
    fn from(session: Session) -> Self {
        Self {
            test_id: session.test_id,
            session_id: session.session_id,
            variant_id: session.variant_id,
            converted: session.converted,
            conversion_event: session.conversion_event,
            conversion_value: session.conversion_value,
            converted_at: session.converted_at,
        }
    }
}
