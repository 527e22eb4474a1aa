//! Per-attempt deadline and caller cancellation.

use crate::error::{classify, RawFailure};
use crate::ClientError;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Races one attempt against its deadline and an optional cancellation token.
///
/// The deadline applies to a single attempt; retries get a fresh one. Whichever of the three
/// settles first wins and the losers are dropped, so the underlying transport future is
/// abandoned on expiry.
#[derive(Debug, Clone)]
pub struct TimeoutGuard {
    duration: Duration,
    cancellation: Option<CancellationToken>,
}

impl TimeoutGuard {
    /// Returns `None` for a zero duration.
    pub fn new(duration: Duration) -> Option<Self> {
        (!duration.is_zero()).then_some(Self { duration, cancellation: None })
    }

    pub fn with_cancellation(mut self, token: Option<CancellationToken>) -> Self {
        self.cancellation = token;
        self
    }

    /// Inspect the configured timeout duration.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    pub async fn run<T, Fut>(&self, operation: Fut) -> Result<T, ClientError>
    where
        Fut: Future<Output = Result<T, ClientError>>,
    {
        let start = Instant::now();
        let cancelled = async {
            match &self.cancellation {
                Some(token) => token.cancelled().await,
                None => futures::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancelled => Err(classify(RawFailure::Cancelled {
                timeout: self.duration,
                elapsed: start.elapsed(),
            })),
            result = tokio::time::timeout(self.duration, operation) => match result {
                Ok(result) => result,
                Err(_) => Err(classify(RawFailure::Deadline {
                    timeout: self.duration,
                    elapsed: start.elapsed(),
                })),
            },
        }
    }
}
