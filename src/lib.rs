#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # taskwire
//!
//! A resilient JSON-over-HTTP client core: typed errors, retry with backoff, interceptors,
//! per-attempt timeouts, call statistics and a derived health status.
//!
//! ## Features
//!
//! - **Closed error taxonomy**: every failure is one [`ClientError`] variant
//! - **Retry engine** with exponential backoff, jitter and `Retry-After` support
//! - **Interceptor chains** for requests, responses and errors
//! - **Timeouts and cancellation** scoped to a single call
//! - **Statistics and health** with a background monitor tied to the client's lifetime
//! - **Telemetry** through `tower::Service` sinks
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use serde_json::Value;
//! use taskwire::{ApiClient, ClientConfig, RequestOptions};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::builder().base_url("http://127.0.0.1:3000/api").build()?;
//!     let client = ApiClient::with_reqwest(config)?;
//!
//!     let tasks = client.get::<Value>("/tasks", None).await?.data;
//!     let created = client
//!         .post::<Value, _>(
//!             "/tasks",
//!             &serde_json::json!({"title": "ship it"}),
//!             Some(RequestOptions::new().timeout(Duration::from_secs(5))),
//!         )
//!         .await?;
//!     println!("{} tasks, created {}", tasks, created.request_id);
//!     Ok(())
//! }
//! ```

pub mod adaptive;
pub mod backoff;
pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod interceptor;
pub mod jitter;
pub mod request;
pub mod retry;
pub mod sleeper;
pub mod stats;
pub mod telemetry;
pub mod timeout;
pub mod transport;

// Re-exports
pub use adaptive::DynamicConfig;
pub use backoff::{Backoff, BackoffError};
pub use client::{ApiClient, ApiClientBuilder};
pub use config::{ClientConfig, ClientConfigBuilder, ConfigError, Environment};
pub use error::{classify, ClientError, ErrorKind, RawFailure, ResponseBody, Severity, TransportError};
pub use health::HealthMonitor;
pub use interceptor::{
    DefaultRequestInterceptor, ErrorContext, ErrorInterceptor, InterceptorChain,
    LoggingErrorInterceptor, RequestInterceptor, ResponseInterceptor,
};
pub use jitter::{Jitter, JitterRng};
pub use request::{ApiResponse, HttpRequest, HttpResponse, RequestConfig, RequestOptions};
pub use retry::{RetryAttempt, RetryConfig, RetryConfigError, RetryOutcome, RetryPolicy};
pub use sleeper::{InstantSleeper, Sleeper, StalledSleeper, TokioSleeper, TrackingSleeper};
pub use stats::{ApiStats, HealthReport, HealthStatus, ResponseTimeBucket};
pub use telemetry::{ClientEvent, LogSink, MemorySink, NullSink, StreamingSink};
pub use timeout::TimeoutGuard;
#[cfg(feature = "reqwest")]
pub use transport::ReqwestTransport;
pub use transport::Transport;
