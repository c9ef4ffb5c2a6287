//! A/B testing: variant assignment, conversion recording, results analysis
//! and the test lifecycle.
//!
//! ```text
//! page load  -> assign_variant     (sticky per session)
//! conversion -> record_conversion  (idempotent flag)
//! dashboard  -> results            (chi-squared analysis)
//! ```

pub mod analysis;
pub mod assignment;
pub mod error;
pub mod service;
pub mod types;

pub use analysis::{
    aggregate, AnalysisConfig, PValueMethod, SampleRatioCheck, SignificanceTest, TestResults,
    VariantStats, Winner,
};
pub use assignment::{pick_variant, RandomSource, SeededRandomSource, ThreadRngSource};
pub use error::{ExperimentError, Result};
pub use service::{
    Assignment, CreateTest, ExperimentService, TestFilter, TestSummary, TestUpdate, VariantSpec,
};
pub use types::{LifecycleAction, Session, Test, TestBuilder, TestStatus, Variant};
