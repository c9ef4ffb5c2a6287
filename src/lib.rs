//! growth-ab library
//!
//! A/B testing core for a multi-tenant growth platform.
//!
//! # Key Features
//! - Sticky, weighted variant assignment per visitor session
//! - Idempotent conversion recording with optional event label and value
//! - Results with confidence intervals, chi-squared significance and
//!   sample-ratio-mismatch checks
//! - Test lifecycle: draft, running, paused, completed
//!
//! # Storage
//! - RocksDB embedded storage (no external database)
//! - In-memory store for tests and embedding

pub mod config;
pub mod errors;
pub mod experiments;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod storage;
pub mod tracing_setup;
pub mod validation;

// Re-export dependencies to ensure tests/benchmarks use the same version
pub use chrono;
pub use parking_lot;
pub use uuid;
