//! Service-level tests for assignment, conversion, results and lifecycle.
//!
//! Every scenario runs against both the in-memory store and RocksDB.
//!
//! Run with: `cargo test --test experiment_tests`

use std::collections::HashMap;
use std::sync::Arc;

use tempfile::TempDir;

use growth_ab::experiments::{
    AnalysisConfig, CreateTest, ExperimentError, ExperimentService, SeededRandomSource,
    TestStatus, VariantSpec,
};
use growth_ab::storage::{
    ExperimentStore, InMemoryExperimentStore, RocksDbExperimentStore, WriteMode,
};

// ═══════════════════════════════════════════════════════════════════════
// Test infrastructure
// ═══════════════════════════════════════════════════════════════════════

/// Run `scenario` once per store backend with a seeded random source
fn with_each_store(seed: u64, scenario: impl Fn(&ExperimentService)) {
    let memory: Arc<dyn ExperimentStore> = Arc::new(InMemoryExperimentStore::new());
    scenario(&service_over(memory, seed));

    let dir = TempDir::new().expect("create temp dir");
    let rocks: Arc<dyn ExperimentStore> = Arc::new(
        RocksDbExperimentStore::new(dir.path(), WriteMode::Async).expect("open rocksdb"),
    );
    scenario(&service_over(rocks, seed));
}

fn service_over(store: Arc<dyn ExperimentStore>, seed: u64) -> ExperimentService {
    ExperimentService::with_random_source(
        store,
        Arc::new(SeededRandomSource::new(seed)),
        AnalysisConfig::default(),
    )
}

fn two_variant_test(id: &str, a_pct: f64, b_pct: f64) -> CreateTest {
    CreateTest {
        id: Some(id.to_string()),
        organization_id: "org_acme".to_string(),
        name: "Pricing page headline".to_string(),
        description: None,
        target_metric: Some("checkout".to_string()),
        variants: vec![
            VariantSpec {
                id: Some("a".to_string()),
                name: "Control".to_string(),
                traffic_percentage: Some(a_pct),
            },
            VariantSpec {
                id: Some("b".to_string()),
                name: "Benefit-led".to_string(),
                traffic_percentage: Some(b_pct),
            },
        ],
        traffic_split: None,
        confidence_level: None,
    }
}

fn running_test(svc: &ExperimentService, id: &str, a_pct: f64, b_pct: f64) {
    svc.create_test(two_variant_test(id, a_pct, b_pct))
        .expect("create test");
    svc.start_test(id).expect("start test");
}

/// Assign `n` sessions and return them grouped by variant
fn assign_many(svc: &ExperimentService, test_id: &str, n: usize) -> HashMap<String, Vec<String>> {
    let mut by_variant: HashMap<String, Vec<String>> = HashMap::new();
    for i in 0..n {
        let session_id = format!("visitor_{i}");
        let a = svc
            .assign_variant(test_id, &session_id, None)
            .expect("assign");
        by_variant.entry(a.variant_id).or_default().push(session_id);
    }
    by_variant
}

// ═══════════════════════════════════════════════════════════════════════
// ASSIGNMENT
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn assignment_is_idempotent_per_session() {
    with_each_store(7, |svc| {
        running_test(svc, "sticky", 50.0, 50.0);

        let first = svc.assign_variant("sticky", "visitor_1", Some("user_9")).unwrap();
        assert!(first.is_new);

        for _ in 0..20 {
            let again = svc.assign_variant("sticky", "visitor_1", None).unwrap();
            assert_eq!(again.variant_id, first.variant_id);
            assert!(!again.is_new);
        }

        assert_eq!(svc.store().count_sessions("sticky").unwrap(), 1);
    });
}

#[test]
fn assignment_follows_traffic_split() {
    with_each_store(42, |svc| {
        running_test(svc, "split", 70.0, 30.0);

        let n = 5_000;
        let groups = assign_many(svc, "split", n);
        let a_share = groups.get("a").map_or(0, Vec::len) as f64 / n as f64;

        assert!(
            (0.67..=0.73).contains(&a_share),
            "variant a share {a_share} far from 70%"
        );
    });
}

#[test]
fn zero_weight_variant_never_assigned() {
    with_each_store(3, |svc| {
        running_test(svc, "all_in", 100.0, 0.0);
        let groups = assign_many(svc, "all_in", 500);
        assert_eq!(groups.get("a").map_or(0, Vec::len), 500);
        assert!(!groups.contains_key("b"));
    });
}

#[test]
fn new_sessions_require_running_test() {
    with_each_store(1, |svc| {
        svc.create_test(two_variant_test("guarded", 50.0, 50.0))
            .unwrap();

        let err = svc.assign_variant("guarded", "early", None).unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::TestNotRunning {
                status: TestStatus::Draft,
                ..
            }
        ));

        svc.start_test("guarded").unwrap();
        let assigned = svc.assign_variant("guarded", "on_time", None).unwrap();
        svc.pause_test("guarded").unwrap();

        let err = svc.assign_variant("guarded", "late", None).unwrap_err();
        assert!(matches!(err, ExperimentError::TestNotRunning { .. }));

        // An existing assignment stays sticky while paused
        let again = svc.assign_variant("guarded", "on_time", None).unwrap();
        assert_eq!(again.variant_id, assigned.variant_id);

        svc.resume_test("guarded").unwrap();
        svc.stop_test("guarded").unwrap();
        let err = svc.assign_variant("guarded", "after", None).unwrap_err();
        assert!(matches!(
            err,
            ExperimentError::TestNotRunning {
                status: TestStatus::Completed,
                ..
            }
        ));
    });
}

#[test]
fn unknown_test_is_not_found() {
    with_each_store(1, |svc| {
        let err = svc.assign_variant("ghost", "visitor", None).unwrap_err();
        assert!(matches!(err, ExperimentError::TestNotFound(_)));
        let err = svc.results("ghost").unwrap_err();
        assert!(matches!(err, ExperimentError::TestNotFound(_)));
    });
}

// ═══════════════════════════════════════════════════════════════════════
// CONVERSION
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn conversion_is_idempotent() {
    with_each_store(11, |svc| {
        running_test(svc, "conv", 50.0, 50.0);
        svc.assign_variant("conv", "visitor_1", None).unwrap();

        let first = svc
            .record_conversion("conv", "visitor_1", Some("checkout"), Some(49.0))
            .unwrap();
        assert!(first.converted);
        let converted_at = first.converted_at;

        let second = svc
            .record_conversion("conv", "visitor_1", None, None)
            .unwrap();
        assert!(second.converted);
        assert_eq!(second.converted_at, converted_at);
        assert_eq!(second.conversion_event.as_deref(), Some("checkout"));
        assert_eq!(second.conversion_value, Some(49.0));

        let results = svc.results("conv").unwrap();
        assert_eq!(results.total_sessions, 1);
        assert_eq!(results.total_conversions, 1);
    });
}

#[test]
fn conversion_without_assignment_fails() {
    with_each_store(11, |svc| {
        running_test(svc, "conv", 50.0, 50.0);
        let err = svc
            .record_conversion("conv", "never_seen", None, None)
            .unwrap_err();
        assert!(matches!(err, ExperimentError::SessionNotFound { .. }));

        let err = svc
            .record_conversion("conv", "never_seen", None, Some(f64::NAN))
            .unwrap_err();
        assert!(matches!(err, ExperimentError::InvalidInput { .. }));
    });
}

// ═══════════════════════════════════════════════════════════════════════
// RESULTS
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn zero_sessions_give_empty_results() {
    with_each_store(5, |svc| {
        running_test(svc, "empty", 50.0, 50.0);
        let results = svc.results("empty").unwrap();

        assert_eq!(results.total_sessions, 0);
        assert_eq!(results.overall_conversion_rate, 0.0);
        assert!(results.best_variant_id.is_none());
        assert!(results.winner.is_none());
        assert!(results.insufficient_sample);
        for v in &results.variants {
            assert_eq!(v.conversion_rate, 0.0);
            assert_eq!(v.confidence_interval, (0.0, 0.0));
        }
    });
}

#[test]
fn rates_match_recorded_conversions() {
    with_each_store(21, |svc| {
        running_test(svc, "rates", 50.0, 50.0);
        let groups = assign_many(svc, "rates", 200);

        let mut expected = HashMap::new();
        for (variant, sessions) in &groups {
            let step = if variant == "a" { 4 } else { 2 };
            let converted: Vec<_> = sessions.iter().step_by(step).collect();
            for s in &converted {
                svc.record_conversion("rates", s, None, None).unwrap();
            }
            expected.insert(variant.clone(), (sessions.len(), converted.len()));
        }

        let results = svc.results("rates").unwrap();
        assert_eq!(results.total_sessions, 200);
        for (variant, (sessions, conversions)) in expected {
            let stats = results.variant(&variant).unwrap();
            assert_eq!(stats.sessions, sessions as u64);
            assert_eq!(stats.conversions, conversions as u64);
            let rate = conversions as f64 / sessions as f64;
            assert!((stats.conversion_rate - rate).abs() < 1e-12);
            let (lo, hi) = stats.confidence_interval;
            assert!(lo <= rate && rate <= hi);
        }
    });
}

#[test]
fn small_samples_skip_significance() {
    with_each_store(9, |svc| {
        running_test(svc, "small", 50.0, 50.0);
        let groups = assign_many(svc, "small", 40);
        for s in groups.get("b").into_iter().flatten() {
            svc.record_conversion("small", s, None, None).unwrap();
        }

        let results = svc.results("small").unwrap();
        assert!(results.insufficient_sample);
        assert!(results.significance.is_none());
        assert!(results.winner.is_none());
        assert!(results
            .recommendations
            .iter()
            .any(|r| r.starts_with("Continue collecting data")));
    });
}

#[test]
fn clear_difference_declares_winner() {
    with_each_store(99, |svc| {
        running_test(svc, "clear", 50.0, 50.0);
        let groups = assign_many(svc, "clear", 2_000);

        // Roughly 5% for a and 12.5% for b
        for s in groups["a"].iter().step_by(20) {
            svc.record_conversion("clear", s, None, None).unwrap();
        }
        for s in groups["b"].iter().step_by(8) {
            svc.record_conversion("clear", s, None, None).unwrap();
        }

        let results = svc.results("clear").unwrap();
        let significance = results.significance.as_ref().expect("significance test");
        assert!(significance.is_significant);
        assert!(significance.p_value < 0.05);

        let winner = results.winner.as_ref().expect("winner");
        assert_eq!(winner.variant_id, "b");
        assert!(winner.improvement_percent > 0.0);
        assert_eq!(results.best_variant_id.as_deref(), Some("b"));
        assert!(results
            .recommendations
            .iter()
            .any(|r| r.starts_with("Variant 'Benefit-led' is the winner")));
    });
}

#[test]
fn equal_rates_declare_no_winner() {
    with_each_store(17, |svc| {
        running_test(svc, "flat", 50.0, 50.0);
        let groups = assign_many(svc, "flat", 1_000);
        for sessions in groups.values() {
            for s in sessions.iter().step_by(10) {
                svc.record_conversion("flat", s, None, None).unwrap();
            }
        }

        let results = svc.results("flat").unwrap();
        assert!(!results.insufficient_sample);
        let significance = results.significance.as_ref().unwrap();
        assert!(!significance.is_significant);
        assert!(results.winner.is_none());
    });
}

// ═══════════════════════════════════════════════════════════════════════
// LIFECYCLE
// ═══════════════════════════════════════════════════════════════════════

#[test]
fn stop_freezes_results() {
    with_each_store(23, |svc| {
        running_test(svc, "frozen", 50.0, 50.0);
        assign_many(svc, "frozen", 50);
        svc.record_conversion("frozen", "visitor_0", None, None)
            .unwrap();

        let stopped = svc.stop_test("frozen").unwrap();
        assert_eq!(stopped.status, TestStatus::Completed);
        assert!(stopped.ended_at.is_some());
        let snapshot = stopped.results.clone().expect("frozen results");
        assert_eq!(snapshot.total_conversions, 1);

        // Late conversions are stored but the snapshot does not move
        svc.record_conversion("frozen", "visitor_1", None, None)
            .unwrap();
        let results = svc.results("frozen").unwrap();
        assert_eq!(results.total_conversions, 1);
        assert_eq!(results.analyzed_at, snapshot.analyzed_at);
    });
}

#[test]
fn invalid_transitions_are_rejected() {
    with_each_store(2, |svc| {
        svc.create_test(two_variant_test("flow", 50.0, 50.0))
            .unwrap();

        assert!(matches!(
            svc.pause_test("flow").unwrap_err(),
            ExperimentError::InvalidTransition { .. }
        ));
        assert!(matches!(
            svc.resume_test("flow").unwrap_err(),
            ExperimentError::InvalidTransition { .. }
        ));

        svc.start_test("flow").unwrap();
        assert!(matches!(
            svc.start_test("flow").unwrap_err(),
            ExperimentError::InvalidTransition { .. }
        ));
        assert!(matches!(
            svc.delete_test("flow").unwrap_err(),
            ExperimentError::InvalidTransition { .. }
        ));

        svc.stop_test("flow").unwrap();
        for err in [
            svc.start_test("flow").unwrap_err(),
            svc.pause_test("flow").unwrap_err(),
            svc.resume_test("flow").unwrap_err(),
            svc.stop_test("flow").unwrap_err(),
        ] {
            assert!(matches!(err, ExperimentError::InvalidTransition { .. }));
        }

        svc.delete_test("flow").unwrap();
        assert!(matches!(
            svc.get_test("flow").unwrap_err(),
            ExperimentError::TestNotFound(_)
        ));
    });
}

#[test]
fn delete_removes_sessions() {
    with_each_store(4, |svc| {
        running_test(svc, "gone", 50.0, 50.0);
        assign_many(svc, "gone", 10);
        svc.stop_test("gone").unwrap();

        svc.delete_test("gone").unwrap();
        assert_eq!(svc.store().count_sessions("gone").unwrap(), 0);
    });
}

#[test]
fn rocksdb_state_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let assigned = {
        let store: Arc<dyn ExperimentStore> =
            Arc::new(RocksDbExperimentStore::new(dir.path(), WriteMode::Sync).unwrap());
        let svc = service_over(store, 8);
        running_test(&svc, "durable", 50.0, 50.0);
        let a = svc.assign_variant("durable", "visitor_1", None).unwrap();
        svc.flush().unwrap();
        a
    };

    let store: Arc<dyn ExperimentStore> =
        Arc::new(RocksDbExperimentStore::new(dir.path(), WriteMode::Sync).unwrap());
    let svc = service_over(store, 8);
    let again = svc.assign_variant("durable", "visitor_1", None).unwrap();
    assert_eq!(again.variant_id, assigned.variant_id);
    assert!(!again.is_new);
    assert_eq!(svc.get_test("durable").unwrap().status, TestStatus::Running);
}
