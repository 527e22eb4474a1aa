//! Running call statistics and the health report derived from them.
//!
//! [`StatsRecorder`] is the only state shared across calls. Every update runs under one mutex,
//! so counters, the running mean and the histogram always move together and a
//! [`StatsRecorder::snapshot`] never observes a half-applied update.

use crate::ClientError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

/// Error rate at or below which the client may be `healthy`.
pub const HEALTHY_MAX_ERROR_RATE: f64 = 0.05;
/// Average response time at or below which the client may be `healthy`.
pub const HEALTHY_MAX_AVG: Duration = Duration::from_millis(1000);
/// Error rate at or below which the client may be `degraded` rather than `unhealthy`.
pub const DEGRADED_MAX_ERROR_RATE: f64 = 0.10;
/// Average response time at or below which the client may be `degraded`.
pub const DEGRADED_MAX_AVG: Duration = Duration::from_millis(2000);

/// Accumulated counters for one client instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ApiStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Running mean over successful calls, in milliseconds.
    pub average_response_time_ms: f64,
    /// Occurrences per HTTP status of terminal outcomes.
    pub status_codes: BTreeMap<u16, u64>,
}

impl ApiStats {
    pub fn average_response_time(&self) -> Duration {
        Duration::from_secs_f64(self.average_response_time_ms.max(0.0) / 1000.0)
    }

    /// Failed over total; zero when nothing was recorded.
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            1.0
        } else {
            self.successful_requests as f64 / self.total_requests as f64
        }
    }

    fn record_success(&mut self, duration: Duration, status: u16) {
        self.total_requests += 1;
        self.successful_requests += 1;
        let n = self.successful_requests as f64;
        let sample = duration.as_secs_f64() * 1000.0;
        self.average_response_time_ms = (self.average_response_time_ms * (n - 1.0) + sample) / n;
        *self.status_codes.entry(status).or_insert(0) += 1;
    }

    fn record_failure(&mut self, status: Option<u16>) {
        self.total_requests += 1;
        self.failed_requests += 1;
        if let Some(status) = status {
            *self.status_codes.entry(status).or_insert(0) += 1;
        }
    }
}

/// Guarded accumulator behind [`ApiStats`].
#[derive(Debug, Default)]
pub struct StatsRecorder {
    inner: Mutex<ApiStats>,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, duration: Duration, status: u16) {
        self.lock().record_success(duration, status);
    }

    pub fn record_failure(&self, error: &ClientError) {
        self.lock().record_failure(error.status());
    }

    /// Consistent copy of the current counters.
    pub fn snapshot(&self) -> ApiStats {
        self.lock().clone()
    }

    pub fn reset(&self) {
        *self.lock() = ApiStats::default();
    }

    pub fn health_report(&self) -> HealthReport {
        HealthReport::from_stats(&self.snapshot())
    }

    fn lock(&self) -> MutexGuard<'_, ApiStats> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Coarse latency class of the average response time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseTimeBucket {
    /// ≤ 100ms
    Fast,
    /// ≤ 500ms
    Normal,
    /// ≤ 1000ms
    Slow,
    /// ≤ 2000ms
    VerySlow,
    Critical,
}

impl ResponseTimeBucket {
    /// Bucket for an average given in milliseconds.
    pub fn for_millis(avg_ms: f64) -> Self {
        if avg_ms <= 100.0 {
            Self::Fast
        } else if avg_ms <= 500.0 {
            Self::Normal
        } else if avg_ms <= 1000.0 {
            Self::Slow
        } else if avg_ms <= 2000.0 {
            Self::VerySlow
        } else {
            Self::Critical
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Normal => "normal",
            Self::Slow => "slow",
            Self::VerySlow => "very_slow",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for ResponseTimeBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health summary derived from an [`ApiStats`] snapshot. Never stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub error_rate: f64,
    pub success_rate: f64,
    pub average_response_time_ms: f64,
    pub response_time_bucket: ResponseTimeBucket,
    pub health_status: HealthStatus,
}

impl HealthReport {
    pub fn from_stats(stats: &ApiStats) -> Self {
        let error_rate = stats.error_rate();
        let avg_ms = stats.average_response_time_ms;
        // Rates are compared with a small epsilon so that 5/100 lands on the boundary, not
        // above it.
        let within = |rate: f64, limit: f64| rate <= limit + f64::EPSILON;
        let under = |limit: Duration| avg_ms <= limit.as_millis() as f64;
        let health_status = if within(error_rate, HEALTHY_MAX_ERROR_RATE) && under(HEALTHY_MAX_AVG)
        {
            HealthStatus::Healthy
        } else if within(error_rate, DEGRADED_MAX_ERROR_RATE) && under(DEGRADED_MAX_AVG) {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
        Self {
            error_rate,
            success_rate: stats.success_rate(),
            average_response_time_ms: avg_ms,
            response_time_bucket: ResponseTimeBucket::for_millis(avg_ms),
            health_status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(total: u64, failed: u64, avg_ms: f64) -> ApiStats {
        ApiStats {
            total_requests: total,
            successful_requests: total - failed,
            failed_requests: failed,
            average_response_time_ms: avg_ms,
            status_codes: BTreeMap::new(),
        }
    }

    #[test]
    fn running_mean_is_incremental() {
        let recorder = StatsRecorder::new();
        recorder.record_success(Duration::from_millis(100), 200);
        recorder.record_success(Duration::from_millis(200), 200);
        recorder.record_success(Duration::from_millis(600), 201);
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.successful_requests, 3);
        assert!((snapshot.average_response_time_ms - 300.0).abs() < 1e-9);
        assert_eq!(snapshot.status_codes[&200], 2);
        assert_eq!(snapshot.status_codes[&201], 1);
    }

    #[test]
    fn failures_count_status_only_when_present() {
        let recorder = StatsRecorder::new();
        recorder.record_failure(&ClientError::api(503, "DOWN", "down"));
        recorder.record_failure(&ClientError::network("reset"));
        recorder.record_failure(&ClientError::invalid_request("bad header"));
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.failed_requests, 3);
        assert_eq!(snapshot.average_response_time_ms, 0.0);
        assert_eq!(snapshot.status_codes.len(), 1);
        assert_eq!(snapshot.status_codes[&503], 1);
    }

    #[test]
    fn reset_zeroes_everything() {
        let recorder = StatsRecorder::new();
        recorder.record_success(Duration::from_millis(5), 200);
        recorder.reset();
        assert_eq!(recorder.snapshot(), ApiStats::default());
    }

    #[test]
    fn empty_stats_are_healthy() {
        let report = HealthReport::from_stats(&ApiStats::default());
        assert_eq!(report.health_status, HealthStatus::Healthy);
        assert_eq!(report.error_rate, 0.0);
        assert_eq!(report.success_rate, 1.0);
        assert_eq!(report.response_time_bucket, ResponseTimeBucket::Fast);
    }

    #[test]
    fn error_rate_boundaries() {
        let at_five = HealthReport::from_stats(&stats(100, 5, 200.0));
        assert_eq!(at_five.health_status, HealthStatus::Healthy);

        let at_six = HealthReport::from_stats(&stats(100, 6, 200.0));
        assert_eq!(at_six.health_status, HealthStatus::Degraded);

        let at_ten = HealthReport::from_stats(&stats(100, 10, 200.0));
        assert_eq!(at_ten.health_status, HealthStatus::Degraded);

        let at_eleven = HealthReport::from_stats(&stats(100, 11, 200.0));
        assert_eq!(at_eleven.health_status, HealthStatus::Unhealthy);
    }

    #[test]
    fn latency_boundaries() {
        assert_eq!(
            HealthReport::from_stats(&stats(10, 0, 1000.0)).health_status,
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthReport::from_stats(&stats(10, 0, 1500.0)).health_status,
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthReport::from_stats(&stats(10, 0, 2500.0)).health_status,
            HealthStatus::Unhealthy
        );
    }

    #[test]
    fn bucket_thresholds() {
        let bucket = |ms: u32| ResponseTimeBucket::for_millis(f64::from(ms));
        assert_eq!(bucket(100), ResponseTimeBucket::Fast);
        assert_eq!(bucket(101), ResponseTimeBucket::Normal);
        assert_eq!(bucket(500), ResponseTimeBucket::Normal);
        assert_eq!(bucket(1000), ResponseTimeBucket::Slow);
        assert_eq!(bucket(2000), ResponseTimeBucket::VerySlow);
        assert_eq!(bucket(2001), ResponseTimeBucket::Critical);
        assert_eq!(ResponseTimeBucket::for_millis(1000.5), ResponseTimeBucket::VerySlow);
        assert_eq!(ResponseTimeBucket::VerySlow.to_string(), "very_slow");
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let recorder = std::sync::Arc::new(StatsRecorder::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let recorder = recorder.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        if i % 2 == 0 {
                            recorder.record_success(Duration::from_millis(10), 200);
                        } else {
                            recorder.record_failure(&ClientError::api(500, "E", "e"));
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let snapshot = recorder.snapshot();
        assert_eq!(snapshot.total_requests, 2000);
        assert_eq!(snapshot.successful_requests + snapshot.failed_requests, 2000);
        assert!((snapshot.average_response_time_ms - 10.0).abs() < 1e-6);
    }
}
