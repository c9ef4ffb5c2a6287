//! HTTP API Handlers
//!
//! Each submodule handles one area of the REST API.

// Core modules
pub mod router;
pub mod state;
pub mod types;

// Health and metrics
pub mod health;

// A/B tests
pub mod experiments;

// Re-export commonly used items
pub use router::{build_api_routes, build_public_routes, build_router};
pub use state::{AppContext, AppState};
pub use types::*;
