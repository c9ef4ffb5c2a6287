//! Experiment service: the operations exposed to callers
//!
//! Wraps an [`ExperimentStore`] and a [`RandomSource`]. Assignment and analysis
//! stay pure; this layer loads, validates, persists, logs and counts.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use super::analysis::{self, AnalysisConfig, TestResults};
use super::assignment::{self, RandomSource, ThreadRngSource};
use super::error::{ExperimentError, Result};
use super::types::{
    apply_traffic_split, default_variant_id, LifecycleAction, Session, Test, TestStatus, Variant,
    DEFAULT_CONFIDENCE_LEVEL, DEFAULT_TARGET_METRIC,
};
use crate::metrics;
use crate::storage::{ExperimentStore, InMemoryExperimentStore, StoreError};
use crate::validation;

/// Variant definition in a create/update request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSpec {
    /// Defaults to "a", "b", ... by position
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub traffic_percentage: Option<f64>,
}

/// Request to create a test
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTest {
    /// Caller-chosen id; a UUID is generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub organization_id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_metric: Option<String>,
    pub variants: Vec<VariantSpec>,
    /// `variant id -> percentage`; overrides per-variant percentages
    #[serde(default)]
    pub traffic_split: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub confidence_level: Option<f64>,
}

/// Partial update of a draft test. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub target_metric: Option<String>,
    #[serde(default)]
    pub variants: Option<Vec<VariantSpec>>,
    #[serde(default)]
    pub traffic_split: Option<HashMap<String, f64>>,
    #[serde(default)]
    pub confidence_level: Option<f64>,
}

/// Filter for listing tests
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestFilter {
    pub organization_id: Option<String>,
    pub status: Option<TestStatus>,
}

/// Outcome of a variant assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub test_id: String,
    pub session_id: String,
    pub variant_id: String,
    pub variant_name: String,
    /// False when the session already had a sticky assignment
    pub is_new: bool,
}

/// Number of tests per status
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub total: u64,
    pub draft: u64,
    pub running: u64,
    pub paused: u64,
    pub completed: u64,
}

impl TestSummary {
    fn slot(&mut self, status: TestStatus) -> &mut u64 {
        match status {
            TestStatus::Draft => &mut self.draft,
            TestStatus::Running => &mut self.running,
            TestStatus::Paused => &mut self.paused,
            TestStatus::Completed => &mut self.completed,
        }
    }

    fn add(&mut self, status: TestStatus) {
        self.total += 1;
        *self.slot(status) += 1;
    }

    fn remove(&mut self, status: TestStatus) {
        self.total = self.total.saturating_sub(1);
        let slot = self.slot(status);
        *slot = slot.saturating_sub(1);
    }

    pub fn by_status(&self) -> [(TestStatus, u64); 4] {
        [
            (TestStatus::Draft, self.draft),
            (TestStatus::Running, self.running),
            (TestStatus::Paused, self.paused),
            (TestStatus::Completed, self.completed),
        ]
    }
}

/// Turn variant specs into variants, filling default ids and an even split
fn build_variants(specs: &[VariantSpec]) -> Vec<Variant> {
    let even = if specs.is_empty() {
        0.0
    } else {
        100.0 / specs.len() as f64
    };

    specs
        .iter()
        .enumerate()
        .map(|(i, spec)| {
            Variant::new(
                spec.id.as_deref().unwrap_or(&default_variant_id(i)),
                &spec.name,
                spec.traffic_percentage.unwrap_or(even),
            )
        })
        .collect()
}

fn validate_id(value: &str, field: &str) -> Result<()> {
    validation::validate_identifier(value, field)
        .map_err(|e| ExperimentError::invalid_input(field, e))
}

/// A/B testing service
pub struct ExperimentService {
    store: Arc<dyn ExperimentStore>,
    random: Arc<dyn RandomSource>,
    analysis: AnalysisConfig,
    /// Writers change test records; new-session inserts hold it shared so a
    /// test cannot leave `running` between the status check and the insert
    lifecycle_lock: RwLock<()>,
    /// Store-wide counts per status, filled on first use
    status_counts: Mutex<Option<TestSummary>>,
}

impl ExperimentService {
    pub fn new(store: Arc<dyn ExperimentStore>, analysis: AnalysisConfig) -> Self {
        Self::with_random_source(store, Arc::new(ThreadRngSource), analysis)
    }

    pub fn with_random_source(
        store: Arc<dyn ExperimentStore>,
        random: Arc<dyn RandomSource>,
        analysis: AnalysisConfig,
    ) -> Self {
        Self {
            store,
            random,
            analysis,
            lifecycle_lock: RwLock::new(()),
            status_counts: Mutex::new(None),
        }
    }

    /// Service over a fresh in-memory store with default analysis settings
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryExperimentStore::new()),
            AnalysisConfig::default(),
        )
    }

    pub fn store(&self) -> &Arc<dyn ExperimentStore> {
        &self.store
    }

    fn load_test(&self, test_id: &str) -> Result<Test> {
        self.store
            .get_test(test_id)?
            .ok_or_else(|| ExperimentError::TestNotFound(test_id.to_string()))
    }

    // =========================================================================
    // TEST CRUD
    // =========================================================================

    /// Create a test in `draft`
    pub fn create_test(&self, request: CreateTest) -> Result<Test> {
        let mut builder = Test::builder(&request.organization_id, &request.name)
            .with_variants(build_variants(&request.variants))
            .with_target_metric(
                request
                    .target_metric
                    .as_deref()
                    .unwrap_or(DEFAULT_TARGET_METRIC),
            )
            .with_confidence_level(request.confidence_level.unwrap_or(DEFAULT_CONFIDENCE_LEVEL));
        if let Some(id) = &request.id {
            builder = builder.with_id(id);
        }
        if let Some(description) = &request.description {
            builder = builder.with_description(description);
        }
        if let Some(split) = request.traffic_split {
            builder = builder.with_traffic_split(split);
        }
        let test = builder.build()?;

        let _guard = self.lifecycle_lock.write();
        self.store.insert_test(&test).map_err(|e| match e {
            StoreError::DuplicateTest(id) => ExperimentError::TestAlreadyExists(id),
            other => other.into(),
        })?;
        self.track_status(None, Some(test.status));

        tracing::info!(
            test_id = %test.id,
            organization_id = %test.organization_id,
            variants = test.variants.len(),
            "Created test"
        );
        Ok(test)
    }

    pub fn get_test(&self, test_id: &str) -> Result<Test> {
        self.load_test(test_id)
    }

    /// Tests matching the filter, newest first
    pub fn list_tests(&self, filter: &TestFilter) -> Result<Vec<Test>> {
        if let Some(org) = &filter.organization_id {
            validate_id(org, "organization_id")?;
        }

        let mut tests = self.store.list_tests(filter.organization_id.as_deref())?;
        if let Some(status) = filter.status {
            tests.retain(|t| t.status == status);
        }
        tests.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tests)
    }

    /// Update a draft test
    pub fn update_test(&self, test_id: &str, update: TestUpdate) -> Result<Test> {
        let _guard = self.lifecycle_lock.write();
        let mut test = self.load_test(test_id)?;
        if test.status != TestStatus::Draft {
            return Err(ExperimentError::InvalidTransition {
                test_id: test.id,
                action: "update",
                status: test.status,
            });
        }

        if let Some(name) = update.name {
            test.name = name;
        }
        if let Some(description) = update.description {
            test.description = Some(description);
        }
        if let Some(metric) = update.target_metric {
            test.target_metric = metric;
        }
        if let Some(level) = update.confidence_level {
            test.confidence_level = level;
        }
        if let Some(specs) = &update.variants {
            test.variants = build_variants(specs);
        }
        if let Some(split) = &update.traffic_split {
            apply_traffic_split(&mut test.variants, split)?;
        }
        test.validate()?;
        test.updated_at = Utc::now();

        self.store.update_test(&test)?;
        tracing::info!(test_id = %test.id, "Updated test");
        Ok(test)
    }

    /// Delete a test and its sessions. Running tests must be paused or stopped first.
    pub fn delete_test(&self, test_id: &str) -> Result<()> {
        let _guard = self.lifecycle_lock.write();
        let test = self.load_test(test_id)?;
        if test.is_running() {
            return Err(ExperimentError::InvalidTransition {
                test_id: test.id,
                action: "delete",
                status: test.status,
            });
        }

        self.store.delete_test(test_id)?;
        self.track_status(Some(test.status), None);
        tracing::info!(test_id, status = %test.status, "Deleted test");
        Ok(())
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    fn transition(&self, test_id: &str, action: LifecycleAction) -> Result<Test> {
        let _guard = self.lifecycle_lock.write();
        let mut test = self.load_test(test_id)?;
        let from = test.status;
        let now = Utc::now();
        test.apply(action, now)?;

        if action == LifecycleAction::Stop {
            let results = self.compute_results(&test)?;
            test.freeze_results(results);
        }

        self.store.update_test(&test)?;
        self.track_status(Some(from), Some(test.status));
        tracing::info!(
            test_id,
            action = action.as_str(),
            from = %from,
            to = %test.status,
            winner = test.winner_variant_id.as_deref().unwrap_or("none"),
            "Test transitioned"
        );
        Ok(test)
    }

    /// draft -> running
    pub fn start_test(&self, test_id: &str) -> Result<Test> {
        self.transition(test_id, LifecycleAction::Start)
    }

    /// running -> paused
    pub fn pause_test(&self, test_id: &str) -> Result<Test> {
        self.transition(test_id, LifecycleAction::Pause)
    }

    /// paused -> running
    pub fn resume_test(&self, test_id: &str) -> Result<Test> {
        self.transition(test_id, LifecycleAction::Resume)
    }

    /// running -> completed; freezes the results snapshot and winner
    pub fn stop_test(&self, test_id: &str) -> Result<Test> {
        self.transition(test_id, LifecycleAction::Stop)
    }

    // =========================================================================
    // ASSIGNMENT & CONVERSION
    // =========================================================================

    /// Assign a session to a variant. Idempotent per (test, session).
    ///
    /// An existing assignment is returned unchanged even after the test stops
    /// running; only new sessions require a running test.
    pub fn assign_variant(
        &self,
        test_id: &str,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Assignment> {
        validate_id(session_id, "session_id")?;
        if let Some(user_id) = user_id {
            validate_id(user_id, "user_id")?;
        }

        let result = self.assign_inner(test_id, session_id, user_id);
        let outcome = match &result {
            Ok(a) if a.is_new => "new",
            Ok(_) => "existing",
            Err(ExperimentError::TestNotRunning { .. }) => "not_running",
            Err(_) => "error",
        };
        metrics::record_assignment(outcome);
        result
    }

    fn assign_inner(
        &self,
        test_id: &str,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Assignment> {
        let test = self.load_test(test_id)?;

        if let Some(existing) = self.store.get_session(test_id, session_id)? {
            return Ok(self.to_assignment(&test, existing, false));
        }

        // Re-read under the shared lock: the status seen above may be stale
        let _guard = self.lifecycle_lock.read();
        let test = self.load_test(test_id)?;
        let session =
            assignment::assign_new_session(&test, session_id, user_id, self.random.as_ref())?;

        match self.store.insert_session(&session) {
            Ok(()) => {
                tracing::debug!(
                    test_id,
                    session_id,
                    variant_id = %session.variant_id,
                    "Assigned variant"
                );
                Ok(self.to_assignment(&test, session, true))
            }
            Err(StoreError::DuplicateSession { .. }) => {
                // Lost a race with a concurrent first request for this session
                let existing = self.store.get_session(test_id, session_id)?.ok_or_else(|| {
                    ExperimentError::SessionNotFound {
                        test_id: test_id.to_string(),
                        session_id: session_id.to_string(),
                    }
                })?;
                Ok(self.to_assignment(&test, existing, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn to_assignment(&self, test: &Test, session: Session, is_new: bool) -> Assignment {
        let variant_name = test
            .variant(&session.variant_id)
            .map(|v| v.name.clone())
            .unwrap_or_else(|| session.variant_id.clone());
        Assignment {
            test_id: session.test_id,
            session_id: session.session_id,
            variant_id: session.variant_id,
            variant_name,
            is_new,
        }
    }

    /// Mark a session's assignment as converted.
    ///
    /// Repeat conversions keep the session converted once; label and value are
    /// overwritten only when supplied. Recording is allowed in any status so
    /// late conversions from paused or completed tests are not lost.
    pub fn record_conversion(
        &self,
        test_id: &str,
        session_id: &str,
        event: Option<&str>,
        value: Option<f64>,
    ) -> Result<Session> {
        validate_id(session_id, "session_id")?;
        if let Some(event) = event {
            validation::validate_event_label(event)
                .map_err(|e| ExperimentError::invalid_input("event", e))?;
        }
        if let Some(value) = value {
            validation::validate_conversion_value(value)
                .map_err(|e| ExperimentError::invalid_input("value", e))?;
        }

        let result = self.convert_inner(test_id, session_id, event, value);
        let outcome = match &result {
            Ok((_, true)) => "repeat",
            Ok((_, false)) => "recorded",
            Err(ExperimentError::SessionNotFound { .. }) => "unknown_session",
            Err(_) => "error",
        };
        metrics::record_conversion(outcome);
        result.map(|(session, _)| session)
    }

    /// Returns the updated session and whether it had already converted
    fn convert_inner(
        &self,
        test_id: &str,
        session_id: &str,
        event: Option<&str>,
        value: Option<f64>,
    ) -> Result<(Session, bool)> {
        self.load_test(test_id)?;

        let mut session = self.store.get_session(test_id, session_id)?.ok_or_else(|| {
            ExperimentError::SessionNotFound {
                test_id: test_id.to_string(),
                session_id: session_id.to_string(),
            }
        })?;

        let repeat = session.converted;
        session.mark_converted(event.map(str::to_string), value, Utc::now());
        self.store.update_session(&session)?;

        tracing::debug!(
            test_id,
            session_id,
            variant_id = %session.variant_id,
            repeat,
            "Recorded conversion"
        );
        Ok((session, repeat))
    }

    // =========================================================================
    // RESULTS
    // =========================================================================

    fn compute_results(&self, test: &Test) -> Result<TestResults> {
        let _timer = metrics::Timer::new(metrics::ANALYSIS_DURATION.clone());
        let sessions = self.store.list_sessions(&test.id)?;
        Ok(analysis::aggregate(test, &sessions, &self.analysis))
    }

    /// Current results. Completed tests return the snapshot frozen at stop.
    pub fn results(&self, test_id: &str) -> Result<TestResults> {
        let mut test = self.load_test(test_id)?;
        if test.status == TestStatus::Completed {
            if let Some(frozen) = test.results.take() {
                return Ok(frozen);
            }
        }
        self.compute_results(&test)
    }

    /// Number of tests per status, optionally for one organization
    pub fn summary(&self, organization_id: Option<&str>) -> Result<TestSummary> {
        if let Some(org) = organization_id {
            validate_id(org, "organization_id")?;
        }

        let mut summary = TestSummary::default();
        for test in self.store.list_tests(organization_id)? {
            summary.add(test.status);
        }
        Ok(summary)
    }

    /// Store-wide counts per status.
    ///
    /// Scans the store once; afterwards create, delete and every transition
    /// keep the counts and the `growth_ab_tests` gauge current.
    pub fn status_counts(&self) -> Result<TestSummary> {
        let _guard = self.lifecycle_lock.read();
        let mut cached = self.status_counts.lock();
        if let Some(counts) = cached.as_ref() {
            return Ok(counts.clone());
        }

        let counts = self.summary(None)?;
        metrics::set_tests_by_status(&counts.by_status());
        *cached = Some(counts.clone());
        Ok(counts)
    }

    /// Caller holds the lifecycle write lock
    fn track_status(&self, from: Option<TestStatus>, to: Option<TestStatus>) {
        let mut cached = self.status_counts.lock();
        let Some(counts) = cached.as_mut() else {
            return;
        };
        if let Some(from) = from {
            counts.remove(from);
        }
        if let Some(to) = to {
            counts.add(to);
        }
        metrics::set_tests_by_status(&counts.by_status());
    }

    /// Persist buffered store writes
    pub fn flush(&self) -> Result<()> {
        Ok(self.store.flush()?)
    }
}
