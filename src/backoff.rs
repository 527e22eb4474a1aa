//! Backoff schedule for the retry engine.
//!
//! Attempt semantics: attempt `0` is the initial call (no delay). After attempt `n` fails the
//! engine waits `delay(n) = min(base * factor^(n-1), max)` before attempt `n + 1`.
//! Delays saturate at [`MAX_BACKOFF`] instead of overflowing.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use taskwire::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100))
//!     .with_max(Duration::from_secs(2))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO); // initial call
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(2), Duration::from_millis(200));
//! assert_eq!(backoff.delay(6), Duration::from_secs(2)); // capped
//! ```

use std::fmt;
use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Default growth factor between consecutive delays.
pub const DEFAULT_FACTOR: f64 = 2.0;

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum BackoffError {
    MaxMustBePositive,
    MaxLessThanBase { base: Duration, max: Duration },
    InvalidFactor(f64),
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::MaxMustBePositive => write!(f, "max must be greater than zero"),
            BackoffError::MaxLessThanBase { base, max } => {
                write!(f, "max ({:?}) must be >= base ({:?})", max, base)
            }
            BackoffError::InvalidFactor(factor) => {
                write!(f, "growth factor must be finite and >= 1.0 (got {})", factor)
            }
        }
    }
}

impl std::error::Error for BackoffError {}

/// Exponential backoff with a configurable growth factor and optional cap.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    factor: f64,
    max: Option<Duration>,
}

impl Backoff {
    /// Doubling backoff starting at `base`.
    pub fn exponential(base: Duration) -> Self {
        Self { base, factor: DEFAULT_FACTOR, max: None }
    }

    /// Replace the growth factor. Must be finite and at least 1.0 so delays never shrink.
    pub fn with_factor(mut self, factor: f64) -> Result<Self, BackoffError> {
        if !factor.is_finite() || factor < 1.0 {
            return Err(BackoffError::InvalidFactor(factor));
        }
        self.factor = factor;
        Ok(self)
    }

    /// Cap every delay at `max`. Rejects zero and caps below `base`.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        if max < self.base {
            return Err(BackoffError::MaxLessThanBase { base: self.base, max });
        }
        self.max = Some(max);
        Ok(self)
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn max(&self) -> Option<Duration> {
        self.max
    }

    /// Upper bound applied to every delay.
    pub fn ceiling(&self) -> Duration {
        self.max.unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF)
    }

    /// Delay to wait after attempt `attempt` failed (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let nanos = self.base.as_nanos() as f64 * self.factor.powi(exponent);
        let raw = if nanos.is_finite() && nanos < MAX_BACKOFF.as_nanos() as f64 {
            Duration::from_nanos(nanos as u64)
        } else {
            MAX_BACKOFF
        };
        raw.min(self.ceiling())
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(Duration::from_secs(1))
    }
}
