//! Retry policy engine.
//!
//! Semantics:
//! - `max_attempts` counts total attempts (initial try + retries) and is at least 1.
//! - Attempt 1 runs immediately. After a failure the error's own
//!   [`ClientError::is_retryable`] decides whether another attempt may follow; non-retryable
//!   errors and the error of the final attempt are returned as-is, never wrapped.
//! - The wait after failed attempt `n` is `min(base * factor^(n-1), max)`, optionally scaled by
//!   `uniform(0.5, 1.5)` jitter. A `Retry-After` hint on the error raises the wait to at least the
//!   hinted value (bounded by the cap, or [`MAX_RETRY_AFTER`] without one).
//! - A cancellation token stops the engine before the next attempt and interrupts a backoff wait;
//!   the call then fails with `ClientError::Timeout { cancelled: true, .. }`.
//!
//! Invariants:
//! - Attempts never exceed `max_attempts`.
//! - The sleeper is invoked exactly `attempts - 1` times when every attempt fails retryably.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use taskwire::{ClientError, InstantSleeper, RetryConfig, RetryPolicy};
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::from_config(&RetryConfig::standard())
//!     .unwrap()
//!     .with_sleeper(InstantSleeper);
//! let result: Result<(), ClientError> =
//!     policy.execute(|| async { Err(ClientError::network("connection reset")) }).await;
//! assert!(result.is_err());
//! # });
//! ```

use crate::backoff::{Backoff, BackoffError};
use crate::config::{serde_millis, serde_opt_millis};
use crate::jitter::{Jitter, JitterRng};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::ClientError;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Ceiling for server `Retry-After` hints when the config has no cap of its own.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(60);

/// Retry settings for one logical call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, initial try included.
    pub max_attempts: u32,
    #[serde(with = "serde_millis", rename = "base_delay_ms")]
    pub base_delay: Duration,
    /// Multiplier between consecutive delays.
    pub factor: f64,
    #[serde(with = "serde_opt_millis", rename = "max_delay_ms")]
    pub max_delay: Option<Duration>,
    pub jitter: bool,
    pub honor_retry_after: bool,
}

/// Invalid retry settings.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RetryConfigError {
    #[error("max_attempts must be > 0 (got {0})")]
    InvalidMaxAttempts(u32),
    #[error(transparent)]
    Backoff(#[from] BackoffError),
}

impl RetryConfig {
    /// Idempotent reads: more attempts, short backoff.
    pub fn standard() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            factor: 2.0,
            max_delay: Some(Duration::from_secs(5)),
            jitter: true,
            honor_retry_after: true,
        }
    }

    /// Mutating writes: fewer attempts, longer backoff.
    pub fn critical() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_secs(2),
            factor: 2.0,
            max_delay: Some(Duration::from_secs(10)),
            jitter: true,
            honor_retry_after: true,
        }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self { max_attempts: 1, ..Self::standard() }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = factor;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Option<Duration>) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn with_honor_retry_after(mut self, honor: bool) -> Self {
        self.honor_retry_after = honor;
        self
    }

    /// Backoff schedule described by this config.
    pub fn backoff(&self) -> Result<Backoff, RetryConfigError> {
        let backoff = Backoff::exponential(self.base_delay).with_factor(self.factor)?;
        Ok(match self.max_delay {
            Some(max) => backoff.with_max(max)?,
            None => backoff,
        })
    }

    pub fn validate(&self) -> Result<(), RetryConfigError> {
        if self.max_attempts == 0 {
            return Err(RetryConfigError::InvalidMaxAttempts(0));
        }
        self.backoff().map(|_| ())
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// One entry of a call's retry audit trail.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryAttempt {
    /// 1-based attempt index.
    pub attempt: u32,
    /// Wait applied before this attempt.
    pub delay: Duration,
    /// Error that triggered this attempt; `None` for attempt 1.
    pub previous_error: Option<ClientError>,
}

/// Result of a traced execution together with its audit trail.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: Result<T, ClientError>,
    pub attempts: Vec<RetryAttempt>,
}

/// Retry policy combining backoff, jitter and sleeper.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Backoff,
    jitter: Jitter,
    honor_retry_after: bool,
    /// Per-attempt deadline reported on cancellation errors.
    attempt_timeout: Duration,
    rng: JitterRng,
    sleeper: Arc<dyn Sleeper>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("honor_retry_after", &self.honor_retry_after)
            .field("attempt_timeout", &self.attempt_timeout)
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl RetryPolicy {
    /// Build a policy from a validated config, using the tokio timer and an entropy-seeded RNG.
    pub fn from_config(config: &RetryConfig) -> Result<Self, RetryConfigError> {
        config.validate()?;
        Ok(Self {
            max_attempts: config.max_attempts,
            backoff: config.backoff()?,
            jitter: Jitter::from_flag(config.jitter),
            honor_retry_after: config.honor_retry_after,
            attempt_timeout: Duration::ZERO,
            rng: JitterRng::from_entropy(),
            sleeper: Arc::new(TokioSleeper),
        })
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.with_shared_sleeper(Arc::new(sleeper))
    }

    pub fn with_shared_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Share a (possibly seeded) jitter RNG.
    pub fn with_rng(mut self, rng: JitterRng) -> Self {
        self.rng = rng;
        self
    }

    /// Deadline each attempt runs under; carried into the error when the call is cancelled.
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait to apply after `failed_attempt` (1-based) failed with `error`.
    pub fn delay_for(&self, failed_attempt: u32, error: &ClientError) -> Duration {
        let scheduled = self.rng.apply(self.jitter, self.backoff.delay(failed_attempt as usize));
        match error.retry_after() {
            Some(hint) if self.honor_retry_after => {
                let ceiling = self.backoff.max().unwrap_or(MAX_RETRY_AFTER);
                scheduled.max(hint.min(ceiling))
            }
            _ => scheduled,
        }
    }

    fn cancelled(&self, started: Instant) -> ClientError {
        ClientError::cancelled(self.attempt_timeout, started.elapsed())
    }

    /// Execute an async operation with retry semantics.
    pub async fn execute<T, Fut, Op>(&self, operation: Op) -> Result<T, ClientError>
    where
        Fut: Future<Output = Result<T, ClientError>>,
        Op: FnMut() -> Fut,
    {
        self.execute_traced(operation, None).await.result
    }

    /// Execute with an optional cancellation token, returning the audit trail as well.
    pub async fn execute_traced<T, Fut, Op>(
        &self,
        mut operation: Op,
        cancellation: Option<&CancellationToken>,
    ) -> RetryOutcome<T>
    where
        Fut: Future<Output = Result<T, ClientError>>,
        Op: FnMut() -> Fut,
    {
        let started = Instant::now();
        let mut attempts = Vec::new();
        let mut pending = RetryAttempt { attempt: 1, delay: Duration::ZERO, previous_error: None };

        loop {
            if cancellation.is_some_and(CancellationToken::is_cancelled) {
                return RetryOutcome {
                    result: Err(self.cancelled(started)),
                    attempts,
                };
            }

            let attempt = pending.attempt;
            attempts.push(pending);

            let error = match operation().await {
                Ok(value) => return RetryOutcome { result: Ok(value), attempts },
                Err(error) => error,
            };

            if !error.is_retryable() || attempt >= self.max_attempts {
                if attempt > 1 && error.is_retryable() {
                    tracing::debug!(attempts = attempt, error = %error, "retries exhausted");
                }
                return RetryOutcome { result: Err(error), attempts };
            }

            let delay = self.delay_for(attempt, &error);
            tracing::debug!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                error_kind = %error.kind(),
                "scheduling retry"
            );

            match cancellation {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            return RetryOutcome {
                                result: Err(self.cancelled(started)),
                                attempts,
                            };
                        }
                        _ = self.sleeper.sleep(delay) => {}
                    }
                }
                None => self.sleeper.sleep(delay).await,
            }

            pending = RetryAttempt { attempt: attempt + 1, delay, previous_error: Some(error) };
        }
    }
}
