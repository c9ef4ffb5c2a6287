//! Results aggregation and statistical analysis
//!
//! Computes, from the stored sessions of a test:
//!
//! - Per-variant session/conversion counts, conversion rate and a normal
//!   approximation 95% confidence interval
//! - The best performing variant
//! - A chi-squared test of independence on the 2x2 table (variant x converted)
//!   for two-variant tests with enough sessions, and a winner when significant
//! - A sample-ratio-mismatch check of observed traffic against the split
//! - Plain-language recommendations
//!
//! Everything here is a pure function of the test definition and its sessions.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::error::ExperimentError;
use super::types::{Session, Test};

// =============================================================================
// CONSTANTS
// =============================================================================

/// z-score for a two-sided 95% interval
pub const Z_95: f64 = 1.96;

/// Each variant needs strictly more sessions than this before significance is tested
pub const MIN_SAMPLE_FOR_SIGNIFICANCE: u64 = 30;

/// Below this many sessions per variant we advise collecting more data
pub const RECOMMENDED_SAMPLE_SIZE: u64 = 100;

/// p-value below which observed traffic is considered to deviate from the split
const SRM_SIGNIFICANCE: f64 = 0.01;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// How the chi-squared statistic is converted into a p-value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PValueMethod {
    /// Survival function of the chi-squared distribution with 1 degree of freedom
    #[default]
    ChiSquareDf1,
    /// `exp(-chi2 / 2)`; reproduces results stored by earlier versions
    LegacyExponential,
}

impl PValueMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PValueMethod::ChiSquareDf1 => "chi_square_df1",
            PValueMethod::LegacyExponential => "legacy_exponential",
        }
    }

    pub fn p_value(&self, chi_square: f64) -> f64 {
        match self {
            PValueMethod::ChiSquareDf1 => chi_square_survival(chi_square, 1),
            PValueMethod::LegacyExponential => {
                if chi_square <= 0.0 {
                    1.0
                } else {
                    (-chi_square / 2.0).exp()
                }
            }
        }
    }
}

impl fmt::Display for PValueMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PValueMethod {
    type Err = ExperimentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "chi_square_df1" | "chi_square" | "exact" => Ok(PValueMethod::ChiSquareDf1),
            "legacy_exponential" | "legacy" => Ok(PValueMethod::LegacyExponential),
            other => Err(ExperimentError::InvalidConfig(format!(
                "unknown p-value method '{other}'"
            ))),
        }
    }
}

/// Tunables for results aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    pub min_sample_for_significance: u64,
    pub recommended_sample_size: u64,
    pub p_value_method: PValueMethod,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_sample_for_significance: MIN_SAMPLE_FOR_SIGNIFICANCE,
            recommended_sample_size: RECOMMENDED_SAMPLE_SIZE,
            p_value_method: PValueMethod::default(),
        }
    }
}

// =============================================================================
// RESULT TYPES
// =============================================================================

/// Aggregated statistics for one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantStats {
    pub variant_id: String,
    pub name: String,
    pub traffic_percentage: f64,
    pub sessions: u64,
    pub conversions: u64,
    pub conversion_rate: f64,
    /// 95% interval for the conversion rate, clamped to [0, 1]
    pub confidence_interval: (f64, f64),
    /// Sum of recorded conversion values
    pub total_value: f64,
    /// Mean conversion value over conversions that carried a value
    pub average_value: f64,
}

/// Outcome of the chi-squared significance test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignificanceTest {
    pub chi_square: f64,
    pub p_value: f64,
    pub significance_level: f64,
    pub is_significant: bool,
    pub method: PValueMethod,
}

/// Declared winner of a two-variant test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Winner {
    pub variant_id: String,
    /// Relative improvement of the winner's rate over the other variant, in percent
    pub improvement_percent: f64,
    pub p_value: f64,
}

/// Sample ratio mismatch check (observed traffic vs configured split)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRatioCheck {
    pub chi_square: f64,
    pub p_value: f64,
    pub mismatch_detected: bool,
}

/// Results of a test
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResults {
    pub test_id: String,
    pub total_sessions: u64,
    pub total_conversions: u64,
    pub overall_conversion_rate: f64,
    pub variants: Vec<VariantStats>,
    /// Highest conversion rate so far (None without any sessions)
    pub best_variant_id: Option<String>,
    pub significance: Option<SignificanceTest>,
    pub winner: Option<Winner>,
    /// Set when a two-variant test lacks the sessions needed for a significance test
    pub insufficient_sample: bool,
    pub sample_ratio: Option<SampleRatioCheck>,
    pub recommendations: Vec<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl TestResults {
    pub fn variant(&self, variant_id: &str) -> Option<&VariantStats> {
        self.variants.iter().find(|v| v.variant_id == variant_id)
    }
}

// =============================================================================
// AGGREGATION
// =============================================================================

#[derive(Default)]
struct Tally {
    sessions: u64,
    conversions: u64,
    total_value: f64,
    valued_conversions: u64,
}

/// Aggregate the sessions of a test into results
pub fn aggregate(test: &Test, sessions: &[Session], config: &AnalysisConfig) -> TestResults {
    let mut tallies: HashMap<&str, Tally> = test
        .variants
        .iter()
        .map(|v| (v.id.as_str(), Tally::default()))
        .collect();

    for session in sessions {
        let Some(tally) = tallies.get_mut(session.variant_id.as_str()) else {
            tracing::debug!(
                test_id = %test.id,
                session_id = %session.session_id,
                variant_id = %session.variant_id,
                "Ignoring session assigned to unknown variant"
            );
            continue;
        };
        tally.sessions += 1;
        if session.converted {
            tally.conversions += 1;
            if let Some(value) = session.conversion_value {
                tally.total_value += value;
                tally.valued_conversions += 1;
            }
        }
    }

    let variants: Vec<VariantStats> = test
        .variants
        .iter()
        .map(|variant| {
            let tally = tallies.remove(variant.id.as_str()).unwrap_or_default();
            let rate = conversion_rate(tally.conversions, tally.sessions);
            VariantStats {
                variant_id: variant.id.clone(),
                name: variant.name.clone(),
                traffic_percentage: variant.traffic_percentage,
                sessions: tally.sessions,
                conversions: tally.conversions,
                conversion_rate: rate,
                confidence_interval: confidence_interval(tally.conversions, tally.sessions),
                total_value: tally.total_value,
                average_value: if tally.valued_conversions == 0 {
                    0.0
                } else {
                    tally.total_value / tally.valued_conversions as f64
                },
            }
        })
        .collect();

    let total_sessions: u64 = variants.iter().map(|v| v.sessions).sum();
    let total_conversions: u64 = variants.iter().map(|v| v.conversions).sum();

    let best_variant_id = if total_sessions == 0 {
        None
    } else {
        best_variant(&variants).map(|v| v.variant_id.clone())
    };

    let significance = significance_test(&variants, test.significance_level(), config);
    let insufficient_sample = variants.len() == 2 && significance.is_none();
    let winner = significance
        .as_ref()
        .filter(|s| s.is_significant)
        .and_then(|s| declare_winner(&variants, s.p_value));

    let sample_ratio = sample_ratio_check(&variants);

    let recommendations = generate_recommendations(
        test,
        &variants,
        winner.as_ref(),
        sample_ratio.as_ref(),
        config,
    );

    TestResults {
        test_id: test.id.clone(),
        total_sessions,
        total_conversions,
        overall_conversion_rate: conversion_rate(total_conversions, total_sessions),
        variants,
        best_variant_id,
        significance,
        winner,
        insufficient_sample,
        sample_ratio,
        recommendations,
        analyzed_at: Utc::now(),
    }
}

/// conversions / sessions, 0 when there are no sessions
pub fn conversion_rate(conversions: u64, sessions: u64) -> f64 {
    if sessions == 0 {
        0.0
    } else {
        conversions as f64 / sessions as f64
    }
}

/// 95% normal-approximation interval for a binomial proportion, clamped to [0, 1]
pub fn confidence_interval(conversions: u64, sessions: u64) -> (f64, f64) {
    if sessions == 0 {
        return (0.0, 0.0);
    }

    let p = conversion_rate(conversions, sessions);
    let margin = Z_95 * (p * (1.0 - p) / sessions as f64).sqrt();
    ((p - margin).max(0.0), (p + margin).min(1.0))
}

/// Highest conversion rate; ties go to the earlier variant
fn best_variant(variants: &[VariantStats]) -> Option<&VariantStats> {
    variants.iter().fold(None, |best: Option<&VariantStats>, v| match best {
        Some(b) if b.conversion_rate >= v.conversion_rate => Some(b),
        _ => Some(v),
    })
}

/// Chi-squared test, only for exactly two variants that both clear the sample gate
fn significance_test(
    variants: &[VariantStats],
    significance_level: f64,
    config: &AnalysisConfig,
) -> Option<SignificanceTest> {
    let [a, b] = variants else {
        return None;
    };

    let min = config.min_sample_for_significance;
    if a.sessions <= min || b.sessions <= min {
        return None;
    }

    let chi_square = chi_squared_2x2(a.sessions, a.conversions, b.sessions, b.conversions);
    let p_value = config.p_value_method.p_value(chi_square);

    Some(SignificanceTest {
        chi_square,
        p_value,
        significance_level,
        is_significant: p_value < significance_level,
        method: config.p_value_method,
    })
}

fn declare_winner(variants: &[VariantStats], p_value: f64) -> Option<Winner> {
    let [a, b] = variants else {
        return None;
    };

    let (winner, loser) = if a.conversion_rate >= b.conversion_rate {
        (a, b)
    } else {
        (b, a)
    };

    let improvement_percent = if loser.conversion_rate > 0.0 {
        (winner.conversion_rate - loser.conversion_rate) / loser.conversion_rate * 100.0
    } else {
        0.0
    };

    Some(Winner {
        variant_id: winner.variant_id.clone(),
        improvement_percent,
        p_value,
    })
}

/// Chi-squared statistic of the 2x2 table (variant x converted / not converted)
///
/// Returns 0 when a whole column is empty (nobody or everybody converted).
pub fn chi_squared_2x2(n1: u64, x1: u64, n2: u64, x2: u64) -> f64 {
    let total = (n1 + n2) as f64;
    let converted = (x1 + x2) as f64;
    let not_converted = total - converted;
    if total == 0.0 || converted == 0.0 || not_converted == 0.0 {
        return 0.0;
    }

    let observed = [
        (n1 as f64, x1 as f64),
        (n2 as f64, x2 as f64),
    ];

    observed
        .iter()
        .map(|&(n, x)| {
            let expected_yes = n * converted / total;
            let expected_no = n * not_converted / total;
            let mut cell = 0.0;
            if expected_yes > 0.0 {
                cell += (x - expected_yes).powi(2) / expected_yes;
            }
            if expected_no > 0.0 {
                cell += ((n - x) - expected_no).powi(2) / expected_no;
            }
            cell
        })
        .sum()
}

/// Goodness-of-fit of observed session counts against the configured split
fn sample_ratio_check(variants: &[VariantStats]) -> Option<SampleRatioCheck> {
    let weighted: Vec<&VariantStats> = variants
        .iter()
        .filter(|v| v.traffic_percentage > 0.0)
        .collect();
    let total: u64 = weighted.iter().map(|v| v.sessions).sum();
    if weighted.len() < 2 || total == 0 {
        return None;
    }

    let split_total: f64 = weighted.iter().map(|v| v.traffic_percentage).sum();
    let chi_square: f64 = weighted
        .iter()
        .map(|v| {
            let expected = total as f64 * v.traffic_percentage / split_total;
            (v.sessions as f64 - expected).powi(2) / expected
        })
        .sum();
    let p_value = chi_square_survival(chi_square, weighted.len() - 1);

    Some(SampleRatioCheck {
        chi_square,
        p_value,
        mismatch_detected: p_value < SRM_SIGNIFICANCE,
    })
}

fn generate_recommendations(
    test: &Test,
    variants: &[VariantStats],
    winner: Option<&Winner>,
    sample_ratio: Option<&SampleRatioCheck>,
    config: &AnalysisConfig,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    // Zero-weight variants never receive traffic
    let smallest = variants
        .iter()
        .filter(|v| v.traffic_percentage > 0.0)
        .min_by_key(|v| v.sessions);

    if let Some(winner) = winner {
        let name = variants
            .iter()
            .find(|v| v.variant_id == winner.variant_id)
            .map(|v| v.name.as_str())
            .unwrap_or(winner.variant_id.as_str());
        recommendations.push(format!(
            "Variant '{name}' is the winner with a {:.1}% improvement in {} rate (p = {:.4}). \
             Recommend rolling it out to all traffic.",
            winner.improvement_percent, test.target_metric, winner.p_value
        ));
    } else if let Some(v) = smallest.filter(|v| v.sessions < config.recommended_sample_size) {
        recommendations.push(format!(
            "Continue collecting data: variant '{}' has {} sessions; at least {} per variant \
             are recommended before drawing conclusions.",
            v.name, v.sessions, config.recommended_sample_size
        ));
    } else {
        recommendations.push(format!(
            "No statistically significant difference between variants on {}.",
            test.target_metric
        ));
    }

    if variants.len() > 2 {
        recommendations.push(
            "Significance is only tested for two-variant tests; compare variants pairwise \
             before picking a winner."
                .to_string(),
        );
    }

    if let Some(srm) = sample_ratio.filter(|s| s.mismatch_detected) {
        recommendations.push(format!(
            "Sample ratio mismatch: observed traffic deviates from the configured split \
             (p = {:.4}). Check assignment and tracking before trusting these results.",
            srm.p_value
        ));
    }

    recommendations
}

// =============================================================================
// DISTRIBUTIONS
// =============================================================================

/// Error function (Abramowitz & Stegun 7.1.26, max error 1.5e-7)
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();

    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();

    sign * y
}

/// P(X >= x) for X ~ chi-squared with `df` degrees of freedom (closed form for integer df)
pub fn chi_square_survival(x: f64, df: usize) -> f64 {
    if x.is_nan() || x <= 0.0 || df == 0 {
        return 1.0;
    }

    let half = x / 2.0;
    let p = if df % 2 == 0 {
        // e^{-x/2} * sum_{i < df/2} (x/2)^i / i!
        let mut term = 1.0;
        let mut sum = 1.0;
        for i in 1..df / 2 {
            term *= half / i as f64;
            sum += term;
        }
        (-half).exp() * sum
    } else {
        // erfc(sqrt(x/2)) + 2 phi(sqrt x) * sum_{i=1}^{(df-1)/2} x^{(2i-1)/2} / (1*3*...*(2i-1))
        let root = x.sqrt();
        let mut p = 1.0 - erf((half).sqrt());
        if df > 1 {
            let density = (-half).exp() / (2.0 * std::f64::consts::PI).sqrt();
            let mut term = root;
            let mut sum = term;
            for i in 1..(df - 1) / 2 {
                term *= x / (2 * i + 1) as f64;
                sum += term;
            }
            p += 2.0 * density * sum;
        }
        p
    };

    p.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiments::types::{Session, Test};

    fn test_with(split: &[(&str, f64)]) -> Test {
        let mut builder = Test::builder("org_1", "analysis");
        for (id, pct) in split {
            builder = builder.with_variant(id, &id.to_uppercase(), *pct);
        }
        builder.build().unwrap()
    }

    /// `sessions` sessions for `variant`, the first `conversions` of them converted
    fn sessions_for(test: &Test, variant: &str, sessions: usize, conversions: usize) -> Vec<Session> {
        (0..sessions)
            .map(|i| {
                let mut s = Session::new(&test.id, &format!("{variant}_{i}"), None, variant);
                if i < conversions {
                    s.mark_converted(None, None, Utc::now());
                }
                s
            })
            .collect()
    }

    fn fixture(a: (usize, usize), b: (usize, usize)) -> (Test, Vec<Session>) {
        let test = test_with(&[("a", 50.0), ("b", 50.0)]);
        let mut sessions = sessions_for(&test, "a", a.0, a.1);
        sessions.extend(sessions_for(&test, "b", b.0, b.1));
        (test, sessions)
    }

    #[test]
    fn test_rate_correctness() {
        let (test, sessions) = fixture((40, 10), (40, 20));
        let results = aggregate(&test, &sessions, &AnalysisConfig::default());

        let a = results.variant("a").unwrap();
        let b = results.variant("b").unwrap();
        assert_eq!(a.sessions, 40);
        assert_eq!(a.conversions, 10);
        assert!((a.conversion_rate - 0.25).abs() < 1e-12);
        assert!((b.conversion_rate - 0.50).abs() < 1e-12);
        assert_eq!(results.total_sessions, 80);
        assert_eq!(results.total_conversions, 30);
        assert!((results.overall_conversion_rate - 0.375).abs() < 1e-12);
        assert_eq!(results.best_variant_id.as_deref(), Some("b"));
    }

    #[test]
    fn test_zero_sessions_boundary() {
        let test = test_with(&[("a", 50.0), ("b", 50.0)]);
        let sessions = sessions_for(&test, "a", 10, 3);
        let results = aggregate(&test, &sessions, &AnalysisConfig::default());

        let b = results.variant("b").unwrap();
        assert_eq!(b.sessions, 0);
        assert_eq!(b.conversion_rate, 0.0);
        assert_eq!(b.confidence_interval, (0.0, 0.0));
        assert!(b.conversion_rate.is_finite());
    }

    #[test]
    fn test_empty_test_has_no_best_variant() {
        let test = test_with(&[("a", 50.0), ("b", 50.0)]);
        let results = aggregate(&test, &[], &AnalysisConfig::default());
        assert!(results.best_variant_id.is_none());
        assert!(results.winner.is_none());
        assert!(results.insufficient_sample);
        assert!(results.sample_ratio.is_none());
        assert_eq!(results.overall_conversion_rate, 0.0);
    }

    #[test]
    fn test_confidence_interval_clamped() {
        assert_eq!(confidence_interval(0, 0), (0.0, 0.0));

        let (low, high) = confidence_interval(1, 50);
        assert_eq!(low, 0.0);
        assert!(high > 0.02);

        let (low, high) = confidence_interval(50, 50);
        assert_eq!((low, high), (1.0, 1.0));

        let (low, high) = confidence_interval(100, 1000);
        let margin = 1.96 * (0.1f64 * 0.9 / 1000.0).sqrt();
        assert!((low - (0.1 - margin)).abs() < 1e-12);
        assert!((high - (0.1 + margin)).abs() < 1e-12);
    }

    #[test]
    fn test_minimum_sample_gate() {
        // Huge rate difference, but only 30 sessions each
        let (test, sessions) = fixture((30, 1), (30, 29));
        let results = aggregate(&test, &sessions, &AnalysisConfig::default());
        assert!(results.significance.is_none());
        assert!(results.winner.is_none());
        assert!(results.insufficient_sample);
        assert!(results.recommendations[0].starts_with("Continue collecting data"));
    }

    #[test]
    fn test_significant_difference_declares_winner() {
        let (test, sessions) = fixture((1000, 50), (1000, 120));
        let results = aggregate(&test, &sessions, &AnalysisConfig::default());

        let sig = results.significance.as_ref().unwrap();
        assert!(sig.is_significant);
        assert!(sig.p_value < 0.05);
        assert!(!results.insufficient_sample);

        let winner = results.winner.as_ref().unwrap();
        assert_eq!(winner.variant_id, "b");
        assert!((winner.improvement_percent - 140.0).abs() < 1e-9);
        assert!(winner.p_value < 0.05);
        assert!(results.recommendations[0].contains("Variant 'B' is the winner"));
    }

    #[test]
    fn test_near_identical_rates_have_no_winner() {
        let (test, sessions) = fixture((1000, 100), (1000, 102));
        let results = aggregate(&test, &sessions, &AnalysisConfig::default());

        let sig = results.significance.as_ref().unwrap();
        assert!(!sig.is_significant);
        assert!(sig.p_value > 0.5);
        assert!(results.winner.is_none());
        assert!(results.recommendations[0].starts_with("No statistically significant difference"));
    }

    #[test]
    fn test_control_can_win() {
        let (test, sessions) = fixture((1000, 150), (1000, 60));
        let results = aggregate(&test, &sessions, &AnalysisConfig::default());
        assert_eq!(results.winner.unwrap().variant_id, "a");
    }

    #[test]
    fn test_legacy_p_value_method() {
        let (test, sessions) = fixture((1000, 100), (1000, 102));
        let config = AnalysisConfig {
            p_value_method: PValueMethod::LegacyExponential,
            ..Default::default()
        };
        let results = aggregate(&test, &sessions, &config);
        let sig = results.significance.unwrap();
        assert_eq!(sig.method, PValueMethod::LegacyExponential);
        assert!((sig.p_value - (-sig.chi_square / 2.0).exp()).abs() < 1e-12);
    }

    #[test]
    fn test_stricter_confidence_level_raises_bar() {
        // p is roughly 0.03 here: significant at 95%, not at 99%
        let mut test = test_with(&[("a", 50.0), ("b", 50.0)]);
        let mut sessions = sessions_for(&test, "a", 1000, 100);
        sessions.extend(sessions_for(&test, "b", 1000, 130));

        let results = aggregate(&test, &sessions, &AnalysisConfig::default());
        assert!(results.winner.is_some());

        test.confidence_level = 0.99;
        let results = aggregate(&test, &sessions, &AnalysisConfig::default());
        assert!(results.significance.is_some());
        assert!(results.winner.is_none());
    }

    #[test]
    fn test_more_than_two_variants_never_declares_winner() {
        let test = test_with(&[("a", 34.0), ("b", 33.0), ("c", 33.0)]);
        let mut sessions = sessions_for(&test, "a", 500, 10);
        sessions.extend(sessions_for(&test, "b", 500, 200));
        sessions.extend(sessions_for(&test, "c", 500, 20));

        let results = aggregate(&test, &sessions, &AnalysisConfig::default());
        assert!(results.winner.is_none());
        assert!(results.significance.is_none());
        assert!(!results.insufficient_sample);
        assert_eq!(results.best_variant_id.as_deref(), Some("b"));
        assert!(results
            .recommendations
            .iter()
            .any(|r| r.contains("only tested for two-variant tests")));
    }

    #[test]
    fn test_conversion_values_aggregated() {
        let test = test_with(&[("a", 50.0), ("b", 50.0)]);
        let mut sessions = sessions_for(&test, "a", 4, 0);
        sessions[0].mark_converted(Some("purchase".into()), Some(20.0), Utc::now());
        sessions[1].mark_converted(Some("purchase".into()), Some(30.0), Utc::now());
        sessions[2].mark_converted(Some("signup".into()), None, Utc::now());

        let results = aggregate(&test, &sessions, &AnalysisConfig::default());
        let a = results.variant("a").unwrap();
        assert_eq!(a.conversions, 3);
        assert!((a.total_value - 50.0).abs() < 1e-12);
        assert!((a.average_value - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_variant_sessions_ignored() {
        let test = test_with(&[("a", 50.0), ("b", 50.0)]);
        let mut sessions = sessions_for(&test, "a", 5, 1);
        sessions.push(Session::new(&test.id, "ghost", None, "zzz"));
        let results = aggregate(&test, &sessions, &AnalysisConfig::default());
        assert_eq!(results.total_sessions, 5);
    }

    #[test]
    fn test_sample_ratio_mismatch() {
        let (test, sessions) = fixture((1000, 100), (600, 60));
        let results = aggregate(&test, &sessions, &AnalysisConfig::default());
        let srm = results.sample_ratio.as_ref().unwrap();
        assert!(srm.mismatch_detected);
        assert!(results
            .recommendations
            .iter()
            .any(|r| r.starts_with("Sample ratio mismatch")));

        let (test, sessions) = fixture((1000, 100), (1010, 100));
        let results = aggregate(&test, &sessions, &AnalysisConfig::default());
        assert!(!results.sample_ratio.unwrap().mismatch_detected);
    }

    #[test]
    fn test_chi_squared_2x2() {
        // Hand-computed: pooled 0.085, expected 85/915 per row
        let chi = chi_squared_2x2(1000, 50, 1000, 120);
        let expected = 2.0 * (35.0f64.powi(2) / 85.0 + 35.0f64.powi(2) / 915.0);
        assert!((chi - expected).abs() < 1e-9);

        assert_eq!(chi_squared_2x2(100, 0, 100, 0), 0.0);
        assert_eq!(chi_squared_2x2(100, 100, 100, 100), 0.0);
        assert_eq!(chi_squared_2x2(0, 0, 0, 0), 0.0);
        assert!(chi_squared_2x2(100, 10, 100, 10).abs() < 1e-12);
    }

    #[test]
    fn test_chi_square_survival_known_values() {
        // Critical values at p = 0.05
        assert!((chi_square_survival(3.841, 1) - 0.05).abs() < 1e-3);
        assert!((chi_square_survival(5.991, 2) - 0.05).abs() < 1e-3);
        assert!((chi_square_survival(7.815, 3) - 0.05).abs() < 1e-3);
        assert!((chi_square_survival(9.488, 4) - 0.05).abs() < 1e-3);
        // p = 0.01, df = 1
        assert!((chi_square_survival(6.635, 1) - 0.01).abs() < 1e-3);
        assert_eq!(chi_square_survival(0.0, 1), 1.0);
        assert!(chi_square_survival(200.0, 1) < 1e-12);
    }

    #[test]
    fn test_p_value_method_parsing() {
        assert_eq!(
            "legacy_exponential".parse::<PValueMethod>().unwrap(),
            PValueMethod::LegacyExponential
        );
        assert_eq!(
            "chi_square_df1".parse::<PValueMethod>().unwrap(),
            PValueMethod::ChiSquareDf1
        );
        assert!("bonferroni".parse::<PValueMethod>().is_err());
    }

    #[test]
    fn test_zero_weight_holdout_does_not_block_conclusions() {
        let test = test_with(&[("a", 50.0), ("b", 50.0), ("c", 0.0)]);
        let mut sessions = sessions_for(&test, "a", 200, 20);
        sessions.extend(sessions_for(&test, "b", 200, 21));
        let results = aggregate(&test, &sessions, &AnalysisConfig::default());

        assert_eq!(results.variant("c").unwrap().sessions, 0);
        assert!(results
            .recommendations
            .iter()
            .all(|r| !r.starts_with("Continue collecting data")));
        assert!(results.recommendations[0].starts_with("No statistically significant difference"));
    }
}
