//! Jitter applied to backoff delays to avoid synchronized retry storms.
//!
//! - `None`: deterministic delays, the schedule is exactly the backoff.
//! - `Proportional`: the delay is scaled by a factor drawn uniformly from `[0.5, 1.5)`.
//!
//! RNG: callers pass the generator explicitly so a seeded [`StdRng`] makes the schedule
//! reproducible. [`JitterRng`] wraps one for sharing across concurrent calls.

use crate::backoff::MAX_BACKOFF;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LOWER: f64 = 0.5;
const UPPER: f64 = 1.5;

/// Jitter strategy for randomizing retry delays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Jitter {
    /// No jitter - use exact backoff delay
    #[default]
    None,
    /// Scale the delay by `uniform(0.5, 1.5)`
    Proportional,
}

impl Jitter {
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            Jitter::Proportional
        } else {
            Jitter::None
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Jitter::Proportional)
    }

    /// Apply jitter with the given RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        match self {
            Jitter::None => delay,
            Jitter::Proportional => {
                if delay.is_zero() {
                    return delay;
                }
                let scale = rng.random_range(LOWER..UPPER);
                let nanos = delay.as_nanos() as f64 * scale;
                if nanos.is_finite() && nanos < MAX_BACKOFF.as_nanos() as f64 {
                    Duration::from_nanos(nanos as u64)
                } else {
                    MAX_BACKOFF
                }
            }
        }
    }
}

/// Shared, optionally seeded RNG used by the retry engine.
#[derive(Debug, Clone)]
pub struct JitterRng {
    inner: Arc<Mutex<StdRng>>,
}

impl JitterRng {
    /// Seed from the thread-local generator.
    pub fn from_entropy() -> Self {
        Self::wrap(StdRng::from_rng(&mut rand::rng()))
    }

    /// Deterministic generator; the same seed yields the same jitter sequence.
    pub fn seeded(seed: u64) -> Self {
        Self::wrap(StdRng::seed_from_u64(seed))
    }

    fn wrap(rng: StdRng) -> Self {
        Self { inner: Arc::new(Mutex::new(rng)) }
    }

    pub fn apply(&self, jitter: Jitter, delay: Duration) -> Duration {
        if !jitter.is_enabled() {
            return delay;
        }
        let mut rng = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        jitter.apply_with_rng(delay, &mut *rng)
    }
}

impl Default for JitterRng {
    fn default() -> Self {
        Self::from_entropy()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_jitter_returns_exact_delay() {
        let rng = JitterRng::seeded(1);
        let delay = Duration::from_secs(1);
        assert_eq!(rng.apply(Jitter::None, delay), delay);
    }

    #[test]
    fn proportional_jitter_stays_within_bounds() {
        let rng = JitterRng::from_entropy();
        let delay = Duration::from_millis(1000);
        for _ in 0..200 {
            let jittered = rng.apply(Jitter::Proportional, delay);
            assert!(jittered >= Duration::from_millis(500));
            assert!(jittered < Duration::from_millis(1500));
        }
    }

    #[test]
    fn same_seed_same_sequence() {
        let a = JitterRng::seeded(42);
        let b = JitterRng::seeded(42);
        let delay = Duration::from_millis(250);
        let left: Vec<_> = (0..10).map(|_| a.apply(Jitter::Proportional, delay)).collect();
        let right: Vec<_> = (0..10).map(|_| b.apply(Jitter::Proportional, delay)).collect();
        assert_eq!(left, right);
    }

    #[test]
    fn jitter_handles_zero_delay() {
        let rng = JitterRng::seeded(7);
        assert_eq!(rng.apply(Jitter::Proportional, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn saturates_large_durations_without_panicking() {
        let rng = JitterRng::seeded(999);
        let jittered = rng.apply(Jitter::Proportional, MAX_BACKOFF);
        assert!(jittered <= MAX_BACKOFF);
    }

    #[test]
    fn flag_maps_to_variant() {
        assert_eq!(Jitter::from_flag(true), Jitter::Proportional);
        assert_eq!(Jitter::from_flag(false), Jitter::None);
    }
}
