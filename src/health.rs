//! Background health monitoring.
//!
//! A [`HealthMonitor`] owns one tokio task that periodically derives a [`HealthReport`] from the
//! client's [`StatsRecorder`], publishes it on a `watch` channel, and reports transitions. The
//! task lives exactly as long as its monitor: [`HealthMonitor::stop`] or dropping the monitor
//! ends it, so independent clients never share a timer.

use crate::config::Environment;
use crate::stats::{HealthReport, HealthStatus, StatsRecorder};
use crate::telemetry::{ClientEvent, SinkHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Everything a monitor tick needs.
#[derive(Debug, Clone)]
pub(crate) struct HealthInputs {
    pub stats: Arc<StatsRecorder>,
    pub publisher: Arc<watch::Sender<HealthReport>>,
    pub sink: SinkHandle,
    pub environment: Environment,
}

impl HealthInputs {
    /// Recompute, publish and report a transition. Returns the new status.
    pub(crate) async fn tick(&self, previous: HealthStatus) -> HealthStatus {
        let report = self.stats.health_report();
        let current = report.health_status;
        self.publisher.send_replace(report.clone());

        if current != previous {
            match transition_level(previous, current, self.environment) {
                TransitionLevel::Warn => tracing::warn!(
                    from = %previous,
                    to = %current,
                    error_rate = report.error_rate,
                    average_response_time_ms = report.average_response_time_ms,
                    response_time_bucket = %report.response_time_bucket,
                    "api health degraded"
                ),
                TransitionLevel::Info => {
                    tracing::info!(from = %previous, to = %current, "api health improved")
                }
                TransitionLevel::Debug => {
                    tracing::debug!(from = %previous, to = %current, "api health changed")
                }
            }
            self.sink.emit(ClientEvent::HealthChanged { from: previous, to: current }).await;
        }
        current
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransitionLevel {
    Warn,
    Info,
    Debug,
}

/// Worsening transitions warn where the environment asks for it; recoveries log at info.
fn transition_level(
    previous: HealthStatus,
    current: HealthStatus,
    environment: Environment,
) -> TransitionLevel {
    if current <= previous {
        TransitionLevel::Info
    } else if environment.reports_health_warnings() {
        TransitionLevel::Warn
    } else {
        TransitionLevel::Debug
    }
}

/// Handle to a running health-check task.
#[derive(Debug)]
pub struct HealthMonitor {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl HealthMonitor {
    /// Spawn the task on the current tokio runtime. The first check runs immediately.
    pub(crate) fn spawn(inputs: HealthInputs, interval: Duration) -> Self {
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut status = inputs.publisher.borrow().health_status;
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        status = inputs.tick(status).await;
                    }
                }
            }
            tracing::debug!("health monitor stopped");
        });
        Self { token, handle: Some(handle) }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the task and wait for it to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
