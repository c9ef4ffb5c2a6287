//! Experiment data model: tests, variants and sticky session assignments

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::analysis::TestResults;
use super::error::{ExperimentError, Result};
use crate::validation;

// =============================================================================
// CONSTANTS
// =============================================================================

/// Default confidence-level target (winner requires p < 1 - 0.95)
pub const DEFAULT_CONFIDENCE_LEVEL: f64 = 0.95;

/// Allowed deviation of the traffic-split sum from 100 (covers 33.33 x 3 style splits)
pub const TRAFFIC_SPLIT_TOLERANCE: f64 = 0.1;

/// Target metric used when none is configured
pub const DEFAULT_TARGET_METRIC: &str = "conversion";

// =============================================================================
// STATUS & LIFECYCLE
// =============================================================================

/// Status of a test
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestStatus {
    /// Being configured, no traffic assigned
    Draft,
    /// Assigning visitors and collecting conversions
    Running,
    /// No new assignments; existing sessions keep their variant
    Paused,
    /// Concluded, results frozen
    Completed,
}

impl TestStatus {
    pub const ALL: [TestStatus; 4] = [
        TestStatus::Draft,
        TestStatus::Running,
        TestStatus::Paused,
        TestStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatus::Draft => "draft",
            TestStatus::Running => "running",
            TestStatus::Paused => "paused",
            TestStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TestStatus {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "draft" => Ok(TestStatus::Draft),
            "running" => Ok(TestStatus::Running),
            "paused" => Ok(TestStatus::Paused),
            "completed" => Ok(TestStatus::Completed),
            other => Err(ExperimentError::InvalidInput {
                field: "status".to_string(),
                reason: format!(
                    "unknown status '{other}' (expected draft, running, paused or completed)"
                ),
            }),
        }
    }
}

/// Lifecycle actions that move a test between statuses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Start,
    Pause,
    Resume,
    Stop,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Start => "start",
            LifecycleAction::Pause => "pause",
            LifecycleAction::Resume => "resume",
            LifecycleAction::Stop => "stop",
        }
    }

    /// Status reached by applying this action from `from`, or `None` if the
    /// transition is not allowed.
    ///
    /// ```text
    /// draft --start--> running --stop--> completed
    /// running --pause--> paused --resume--> running
    /// ```
    pub fn transition(&self, from: TestStatus) -> Option<TestStatus> {
        match (self, from) {
            (LifecycleAction::Start, TestStatus::Draft) => Some(TestStatus::Running),
            (LifecycleAction::Pause, TestStatus::Running) => Some(TestStatus::Paused),
            (LifecycleAction::Resume, TestStatus::Paused) => Some(TestStatus::Running),
            (LifecycleAction::Stop, TestStatus::Running) => Some(TestStatus::Completed),
            _ => None,
        }
    }
}

// =============================================================================
// VARIANTS
// =============================================================================

/// A variant of a test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variant {
    /// Unique within its test
    pub id: String,
    /// Display name
    pub name: String,
    /// Target share of traffic, 0-100
    pub traffic_percentage: f64,
}

impl Variant {
    pub fn new(id: &str, name: &str, traffic_percentage: f64) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            traffic_percentage,
        }
    }
}

/// Default id for the variant at `index`: "a", "b", ... "z"
pub fn default_variant_id(index: usize) -> String {
    match u8::try_from(index) {
        Ok(i) if i < 26 => char::from(b'a' + i).to_string(),
        _ => format!("v{index}"),
    }
}

/// Check that traffic percentages are in range and sum to 100 (± tolerance)
pub fn validate_traffic_split(variants: &[Variant]) -> Result<()> {
    for variant in variants {
        validation::validate_traffic_percentage(variant.traffic_percentage).map_err(|e| {
            ExperimentError::InvalidTrafficSplit(format!("variant '{}': {e}", variant.id))
        })?;
    }

    let total: f64 = variants.iter().map(|v| v.traffic_percentage).sum();
    if (total - 100.0).abs() > TRAFFIC_SPLIT_TOLERANCE {
        return Err(ExperimentError::InvalidTrafficSplit(format!(
            "percentages sum to {total:.2}, expected 100"
        )));
    }

    Ok(())
}

/// Overwrite variant percentages from an explicit `variant id -> percentage` map.
///
/// The map must name every variant exactly once and nothing else.
pub fn apply_traffic_split(variants: &mut [Variant], split: &HashMap<String, f64>) -> Result<()> {
    let known: HashSet<&str> = variants.iter().map(|v| v.id.as_str()).collect();
    if let Some(unknown) = split.keys().find(|k| !known.contains(k.as_str())) {
        return Err(ExperimentError::InvalidTrafficSplit(format!(
            "unknown variant '{unknown}'"
        )));
    }

    for variant in variants.iter_mut() {
        let percentage = split.get(&variant.id).ok_or_else(|| {
            ExperimentError::InvalidTrafficSplit(format!(
                "no percentage for variant '{}'",
                variant.id
            ))
        })?;
        variant.traffic_percentage = *percentage;
    }

    Ok(())
}

// =============================================================================
// TEST
// =============================================================================

/// An A/B test owned by an organization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Test {
    pub id: String,
    pub organization_id: String,
    pub name: String,
    pub description: Option<String>,
    /// What a conversion means for this test (e.g. "signup", "checkout")
    pub target_metric: String,
    /// Variants in assignment order
    pub variants: Vec<Variant>,
    pub confidence_level: f64,
    pub status: TestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Results frozen when the test completed
    pub results: Option<TestResults>,
    pub winner_variant_id: Option<String>,
}

impl Test {
    /// Create a new test builder
    pub fn builder(organization_id: &str, name: &str) -> TestBuilder {
        TestBuilder::new(organization_id, name)
    }

    /// Traffic split as `variant id -> percentage`
    pub fn traffic_split(&self) -> BTreeMap<String, f64> {
        self.variants
            .iter()
            .map(|v| (v.id.clone(), v.traffic_percentage))
            .collect()
    }

    pub fn variant(&self, variant_id: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.id == variant_id)
    }

    pub fn is_running(&self) -> bool {
        self.status == TestStatus::Running
    }

    /// p-value threshold below which a difference counts as significant
    pub fn significance_level(&self) -> f64 {
        1.0 - self.confidence_level
    }

    /// Validate identifiers, variants and the traffic split
    pub fn validate(&self) -> Result<()> {
        validation::validate_identifier(&self.id, "id")
            .map_err(|e| ExperimentError::invalid_input("id", e))?;
        validation::validate_identifier(&self.organization_id, "organization_id")
            .map_err(|e| ExperimentError::invalid_input("organization_id", e))?;
        validation::validate_name(&self.name, "name")
            .map_err(|e| ExperimentError::invalid_input("name", e))?;
        validation::validate_name(&self.target_metric, "target_metric")
            .map_err(|e| ExperimentError::invalid_input("target_metric", e))?;
        if let Some(description) = &self.description {
            validation::validate_description(description)
                .map_err(|e| ExperimentError::invalid_input("description", e))?;
        }
        validation::validate_confidence_level(self.confidence_level)
            .map_err(|e| ExperimentError::InvalidConfig(e.to_string()))?;

        let count = self.variants.len();
        if !(validation::MIN_VARIANTS..=validation::MAX_VARIANTS).contains(&count) {
            return Err(ExperimentError::InvalidConfig(format!(
                "a test needs between {} and {} variants, got {count}",
                validation::MIN_VARIANTS,
                validation::MAX_VARIANTS
            )));
        }

        let mut seen = HashSet::with_capacity(count);
        for variant in &self.variants {
            validation::validate_identifier(&variant.id, "variant id")
                .map_err(|e| ExperimentError::InvalidConfig(e.to_string()))?;
            validation::validate_name(&variant.name, "variant name")
                .map_err(|e| ExperimentError::InvalidConfig(e.to_string()))?;
            if !seen.insert(variant.id.as_str()) {
                return Err(ExperimentError::InvalidConfig(format!(
                    "duplicate variant id '{}'",
                    variant.id
                )));
            }
        }

        validate_traffic_split(&self.variants)
    }

    /// Apply a lifecycle action, stamping start/end times
    pub fn apply(&mut self, action: LifecycleAction, now: DateTime<Utc>) -> Result<()> {
        let next = action
            .transition(self.status)
            .ok_or_else(|| ExperimentError::InvalidTransition {
                test_id: self.id.clone(),
                action: action.as_str(),
                status: self.status,
            })?;

        match action {
            LifecycleAction::Start => self.started_at = Some(now),
            LifecycleAction::Stop => self.ended_at = Some(now),
            LifecycleAction::Pause | LifecycleAction::Resume => {}
        }

        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Freeze a results snapshot and its winner into the test
    pub fn freeze_results(&mut self, results: TestResults) {
        self.winner_variant_id = results.winner.as_ref().map(|w| w.variant_id.clone());
        self.results = Some(results);
    }
}

/// Builder for creating tests
pub struct TestBuilder {
    test: Test,
    traffic_split: Option<HashMap<String, f64>>,
}

impl TestBuilder {
    pub fn new(organization_id: &str, name: &str) -> Self {
        let now = Utc::now();
        Self {
            test: Test {
                id: Uuid::new_v4().to_string(),
                organization_id: organization_id.to_string(),
                name: name.to_string(),
                description: None,
                target_metric: DEFAULT_TARGET_METRIC.to_string(),
                variants: Vec::new(),
                confidence_level: DEFAULT_CONFIDENCE_LEVEL,
                status: TestStatus::Draft,
                created_at: now,
                updated_at: now,
                started_at: None,
                ended_at: None,
                results: None,
                winner_variant_id: None,
            },
            traffic_split: None,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.test.id = id.to_string();
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.test.description = Some(description.to_string());
        self
    }

    pub fn with_target_metric(mut self, metric: &str) -> Self {
        self.test.target_metric = metric.to_string();
        self
    }

    pub fn with_variant(mut self, id: &str, name: &str, traffic_percentage: f64) -> Self {
        self.test
            .variants
            .push(Variant::new(id, name, traffic_percentage));
        self
    }

    pub fn with_variants(mut self, variants: Vec<Variant>) -> Self {
        self.test.variants = variants;
        self
    }

    /// Explicit split, overrides percentages given with the variants
    pub fn with_traffic_split(mut self, split: HashMap<String, f64>) -> Self {
        self.traffic_split = Some(split);
        self
    }

    pub fn with_confidence_level(mut self, level: f64) -> Self {
        self.test.confidence_level = level;
        self
    }

    /// Build and validate the test (always created in `draft`)
    pub fn build(self) -> Result<Test> {
        let mut test = self.test;
        if let Some(split) = &self.traffic_split {
            apply_traffic_split(&mut test.variants, split)?;
        }
        test.validate()?;
        Ok(test)
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Sticky assignment of one visitor session to a variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub test_id: String,
    pub session_id: String,
    pub user_id: Option<String>,
    pub variant_id: String,
    pub converted: bool,
    pub conversion_event: Option<String>,
    pub conversion_value: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub converted_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(test_id: &str, session_id: &str, user_id: Option<&str>, variant_id: &str) -> Self {
        Self {
            test_id: test_id.to_string(),
            session_id: session_id.to_string(),
            user_id: user_id.map(str::to_string),
            variant_id: variant_id.to_string(),
            converted: false,
            conversion_event: None,
            conversion_value: None,
            created_at: Utc::now(),
            converted_at: None,
        }
    }

    /// Mark as converted. Label and value are overwritten only when supplied;
    /// the first conversion time is kept.
    pub fn mark_converted(
        &mut self,
        event: Option<String>,
        value: Option<f64>,
        now: DateTime<Utc>,
    ) {
        self.converted = true;
        if event.is_some() {
            self.conversion_event = event;
        }
        if value.is_some() {
            self.conversion_value = value;
        }
        self.converted_at.get_or_insert(now);
    }
}
