//! Variant assignment: weighted bucketing of new sessions
//!
//! Assignment is random (not hashed) and made sticky by persisting a
//! [`Session`] per visitor; see `ExperimentService::assign_variant`.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::error::{ExperimentError, Result};
use super::types::{Session, Test, Variant};

/// Source of uniform draws in `[0, 100)`. Need not be cryptographically secure.
pub trait RandomSource: Send + Sync {
    fn next_percent(&self) -> f64;
}

/// Thread-local RNG, the production default
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
    fn next_percent(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..100.0)
    }
}

/// Deterministic seeded RNG for simulations and tests
pub struct SeededRandomSource {
    rng: Mutex<StdRng>,
}

impl SeededRandomSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandomSource {
    fn next_percent(&self) -> f64 {
        self.rng.lock().gen_range(0.0..100.0)
    }
}

/// Pick the variant for a draw in `[0, 100)`.
///
/// Walks variants in configured order accumulating their percentages and
/// returns the first whose cumulative threshold is >= `draw`. Zero-weight
/// variants never receive traffic. If rounding leaves the draw above every
/// threshold the last weighted variant is returned.
pub fn pick_variant(variants: &[Variant], draw: f64) -> Option<&Variant> {
    let mut cumulative = 0.0;
    for variant in variants {
        if variant.traffic_percentage <= 0.0 {
            continue;
        }
        cumulative += variant.traffic_percentage;
        if cumulative >= draw {
            return Some(variant);
        }
    }

    variants
        .iter()
        .rev()
        .find(|v| v.traffic_percentage > 0.0)
        .or_else(|| variants.last())
}

/// Create a fresh (unpersisted) assignment for a session of a running test
pub fn assign_new_session(
    test: &Test,
    session_id: &str,
    user_id: Option<&str>,
    random: &dyn RandomSource,
) -> Result<Session> {
    if !test.is_running() {
        return Err(ExperimentError::TestNotRunning {
            test_id: test.id.clone(),
            status: test.status,
        });
    }

    let draw = random.next_percent();
    let variant = pick_variant(&test.variants, draw).ok_or_else(|| {
        ExperimentError::InvalidConfig(format!("test {} has no variants", test.id))
    })?;

    Ok(Session::new(&test.id, session_id, user_id, &variant.id))
}
