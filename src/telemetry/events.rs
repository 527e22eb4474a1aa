use crate::error::ErrorKind;
use crate::stats::HealthStatus;
use serde_json::json;
use std::fmt;
use std::time::Duration;

/// Events emitted by the client while it runs calls and monitors health.
///
/// Events never carry header values, bodies or query strings; endpoints are sanitized before
/// they get here.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A call passed the request interceptors and is about to hit the transport.
    RequestStarted { request_id: String, method: String, endpoint: String },
    /// An attempt failed retryably and another one is scheduled.
    RetryScheduled {
        request_id: String,
        /// The upcoming attempt (2-indexed: the first retry is attempt 2).
        attempt: u32,
        delay: Duration,
        error_kind: ErrorKind,
    },
    /// A call settled successfully.
    RequestSucceeded { request_id: String, status: u16, attempts: u32, duration: Duration },
    /// A call settled with an error.
    RequestFailed {
        request_id: String,
        status: Option<u16>,
        error_kind: ErrorKind,
        attempts: u32,
        duration: Duration,
    },
    /// The health monitor observed a status transition.
    HealthChanged { from: HealthStatus, to: HealthStatus },
}

impl ClientEvent {
    /// Stable identifier for the event variant.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEvent::RequestStarted { .. } => "request_started",
            ClientEvent::RetryScheduled { .. } => "retry_scheduled",
            ClientEvent::RequestSucceeded { .. } => "request_succeeded",
            ClientEvent::RequestFailed { .. } => "request_failed",
            ClientEvent::HealthChanged { .. } => "health_changed",
        }
    }

    /// Correlation id of the call this event belongs to, if any.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            ClientEvent::RequestStarted { request_id, .. }
            | ClientEvent::RetryScheduled { request_id, .. }
            | ClientEvent::RequestSucceeded { request_id, .. }
            | ClientEvent::RequestFailed { request_id, .. } => Some(request_id),
            ClientEvent::HealthChanged { .. } => None,
        }
    }
}

impl fmt::Display for ClientEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientEvent::RequestStarted { request_id, method, endpoint } => {
                write!(f, "RequestStarted({} {} id={})", method, endpoint, request_id)
            }
            ClientEvent::RetryScheduled { request_id, attempt, delay, error_kind } => write!(
                f,
                "RetryScheduled(#{}, delay={:?}, cause={}, id={})",
                attempt, delay, error_kind, request_id
            ),
            ClientEvent::RequestSucceeded { request_id, status, attempts, duration } => write!(
                f,
                "RequestSucceeded(status={}, attempts={}, duration={:?}, id={})",
                status, attempts, duration, request_id
            ),
            ClientEvent::RequestFailed { request_id, status, error_kind, attempts, duration } => {
                write!(f, "RequestFailed({}", error_kind)?;
                if let Some(status) = status {
                    write!(f, ", status={}", status)?;
                }
                write!(f, ", attempts={}, duration={:?}, id={})", attempts, duration, request_id)
            }
            ClientEvent::HealthChanged { from, to } => {
                write!(f, "HealthChanged({} -> {})", from, to)
            }
        }
    }
}

#[inline]
fn clamp_u64(val: u128) -> u64 {
    val.min(u128::from(u64::MAX)) as u64
}

/// Convert a [`ClientEvent`] into a JSON value for sinks that forward events.
pub fn event_to_json(event: &ClientEvent) -> serde_json::Value {
    match event {
        ClientEvent::RequestStarted { request_id, method, endpoint } => json!({
            "kind": event.kind(),
            "request_id": request_id,
            "method": method,
            "endpoint": endpoint,
        }),
        ClientEvent::RetryScheduled { request_id, attempt, delay, error_kind } => json!({
            "kind": event.kind(),
            "request_id": request_id,
            "attempt": *attempt,
            "delay_ms": clamp_u64(delay.as_millis()),
            "error_kind": error_kind.as_str(),
        }),
        ClientEvent::RequestSucceeded { request_id, status, attempts, duration } => json!({
            "kind": event.kind(),
            "request_id": request_id,
            "status": *status,
            "attempts": *attempts,
            "duration_ms": clamp_u64(duration.as_millis()),
        }),
        ClientEvent::RequestFailed { request_id, status, error_kind, attempts, duration } => json!({
            "kind": event.kind(),
            "request_id": request_id,
            "status": status,
            "error_kind": error_kind.as_str(),
            "attempts": *attempts,
            "duration_ms": clamp_u64(duration.as_millis()),
        }),
        ClientEvent::HealthChanged { from, to } => json!({
            "kind": event.kind(),
            "from": from.as_str(),
            "to": to.as_str(),
        }),
    }
}
