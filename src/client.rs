//! The request orchestrator.
//!
//! One logical call moves through these stages:
//!
//! 1. caller options are resolved against the client defaults and run through the request
//!    interceptors (the built-in [`DefaultRequestInterceptor`] first);
//! 2. the [`RetryPolicy`] drives attempts, each one sent through the [`Transport`] under a
//!    [`TimeoutGuard`]; non-2xx responses are classified into a [`ClientError`] immediately;
//! 3. a 2xx response runs through the response interceptors and is decoded;
//! 4. statistics are updated for the terminal outcome;
//! 5. on failure the error interceptors (the built-in [`LoggingErrorInterceptor`] first) see the
//!    classified error, and the result of that chain is what the caller receives.
//!
//! A call yields exactly one [`ApiResponse`] or one [`ClientError`].

use crate::config::{ClientConfig, ConfigError};
use crate::error::{classify, RawFailure, ResponseBody};
use crate::health::{HealthInputs, HealthMonitor};
use crate::interceptor::{
    stamp_request_id, DefaultRequestInterceptor, ErrorContext, ErrorInterceptor, InterceptorChain,
    LoggingErrorInterceptor, RequestInterceptor, ResponseInterceptor,
};
use crate::jitter::JitterRng;
use crate::request::{
    sanitize_endpoint, ApiResponse, HttpRequest, HttpResponse, RequestConfig, RequestOptions,
};
use crate::retry::{RetryAttempt, RetryPolicy};
use crate::sleeper::{Sleeper, TokioSleeper};
use crate::stats::{ApiStats, HealthReport, StatsRecorder};
use crate::telemetry::{ClientEvent, SinkHandle};
use crate::timeout::TimeoutGuard;
use crate::transport::Transport;
use crate::ClientError;
use http::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tokio::time::Instant;

/// Resilient JSON-over-HTTP client. Cheap to clone; clones share stats, interceptors and the
/// health monitor.
#[derive(Clone, Debug)]
pub struct ApiClient {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    interceptors: InterceptorChain,
    stats: Arc<StatsRecorder>,
    sink: SinkHandle,
    sleeper: Arc<dyn Sleeper>,
    rng: JitterRng,
    health: Arc<watch::Sender<HealthReport>>,
    monitor: Mutex<Option<HealthMonitor>>,
}

/// Builder for [`ApiClient`].
#[derive(Debug)]
pub struct ApiClientBuilder {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    rng: JitterRng,
    sink: SinkHandle,
}

impl ApiClientBuilder {
    /// Replace the backoff sleeper (tests use `InstantSleeper` or `TrackingSleeper`).
    pub fn sleeper<S: Sleeper + 'static>(mut self, sleeper: S) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Seed or share the jitter RNG.
    pub fn rng(mut self, rng: JitterRng) -> Self {
        self.rng = rng;
        self
    }

    /// Route client events to `sink`.
    pub fn telemetry_sink<S>(self, sink: S) -> Self
    where
        S: tower::Service<ClientEvent, Response = (), Error = Infallible> + Clone + Send + 'static,
        S::Future: Send + 'static,
    {
        self.sink.replace(sink);
        self
    }

    pub fn build(self) -> Result<ApiClient, ConfigError> {
        self.config.validate()?;
        let defaults = self
            .config
            .default_headers
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
            .chain(std::iter::once(("user-agent", self.config.user_agent.as_str())));
        let default_interceptor = DefaultRequestInterceptor::new(defaults)
            .map_err(|e| ConfigError::InvalidHeader(e.message().to_string()))?;

        let interceptors = InterceptorChain::new();
        interceptors.add_request(Arc::new(default_interceptor));
        interceptors.add_error(Arc::new(LoggingErrorInterceptor));

        let stats = Arc::new(StatsRecorder::new());
        let (health, _) = watch::channel(stats.health_report());

        Ok(ApiClient {
            inner: Arc::new(Inner {
                config: self.config,
                transport: self.transport,
                interceptors,
                stats,
                sink: self.sink,
                sleeper: self.sleeper,
                rng: self.rng,
                health: Arc::new(health),
                monitor: Mutex::new(None),
            }),
        })
    }
}

fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

fn to_body<B: Serialize + ?Sized>(body: &B) -> Result<Value, ClientError> {
    serde_json::to_value(body)
        .map_err(|e| ClientError::invalid_request(format!("request body: {}", e)))
}

async fn send_attempt(
    transport: Arc<dyn Transport>,
    request: HttpRequest,
    guard: TimeoutGuard,
) -> Result<HttpResponse, ClientError> {
    guard
        .run(async move {
            match transport.send(request).await {
                Ok(response) if response.is_success() => Ok(response),
                Ok(response) => Err(classify(RawFailure::Status {
                    status: response.status,
                    body: ResponseBody::parse(&response.body),
                    headers: response.headers,
                })),
                Err(err) => Err(classify(RawFailure::Transport(err))),
            }
        })
        .await
}

impl ApiClient {
    pub fn builder<T: Transport + 'static>(config: ClientConfig, transport: T) -> ApiClientBuilder {
        ApiClientBuilder {
            config,
            transport: Arc::new(transport),
            sleeper: Arc::new(TokioSleeper),
            rng: JitterRng::from_entropy(),
            sink: SinkHandle::default(),
        }
    }

    pub fn new<T>(config: ClientConfig, transport: T) -> Result<Self, ConfigError>
    where
        T: Transport + 'static,
    {
        Self::builder(config, transport).build()
    }

    /// Client over a default `reqwest` transport.
    #[cfg(feature = "reqwest")]
    pub fn with_reqwest(config: ClientConfig) -> Result<Self, ConfigError> {
        Self::new(config, crate::transport::ReqwestTransport::new())
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: Option<RequestOptions>,
    ) -> Result<ApiResponse<T>, ClientError> {
        self.request(Method::GET, endpoint, None, options.unwrap_or_default()).await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: Option<RequestOptions>,
    ) -> Result<ApiResponse<T>, ClientError> {
        self.request(Method::DELETE, endpoint, None, options.unwrap_or_default()).await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        options: Option<RequestOptions>,
    ) -> Result<ApiResponse<T>, ClientError> {
        self.send_with_body(Method::POST, endpoint, body, options).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        options: Option<RequestOptions>,
    ) -> Result<ApiResponse<T>, ClientError> {
        self.send_with_body(Method::PUT, endpoint, body, options).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
        options: Option<RequestOptions>,
    ) -> Result<ApiResponse<T>, ClientError> {
        self.send_with_body(Method::PATCH, endpoint, body, options).await
    }

    async fn send_with_body<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: &B,
        options: Option<RequestOptions>,
    ) -> Result<ApiResponse<T>, ClientError> {
        let options = options.unwrap_or_default();
        match to_body(body) {
            Ok(body) => self.request(method, endpoint, Some(body), options).await,
            Err(error) => {
                let request_id = options
                    .requested_id()
                    .map(str::to_string)
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                let failure = Failure::early(request_id, method, endpoint);
                Err(self.fail(error, failure).await)
            }
        }
    }

    /// Run one logical call.
    pub async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<ApiResponse<T>, ClientError> {
        let inner = &self.inner;
        let fallback_id = options.requested_id().map(str::to_string);
        let default_retry =
            if is_mutating(&method) { &inner.config.write_retry } else { &inner.config.retry };

        let prepared = RequestConfig::resolve(
            method.clone(),
            endpoint,
            body,
            options,
            inner.config.timeout,
            default_retry,
        )
        .and_then(|config| inner.interceptors.apply_request(config))
        // id headers follow whatever id the last interceptor left
        .and_then(stamp_request_id);
        let config = match prepared {
            Ok(config) => config,
            Err(error) => {
                let request_id = fallback_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
                return Err(self.fail(error, Failure::early(request_id, method, endpoint)).await);
            }
        };

        let request_id =
            config.request_id.clone().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let started = config.started_at().unwrap_or_else(Instant::now);
        let sanitized = config.sanitized_endpoint();
        let mut failure = Failure {
            request_id: request_id.clone(),
            method: config.method.clone(),
            endpoint: sanitized.clone(),
            started,
            attempts: Vec::new(),
        };

        tracing::debug!(
            request_id = %request_id,
            method = %config.method,
            endpoint = %sanitized,
            timeout_ms = config.timeout.as_millis() as u64,
            max_attempts = config.retry.max_attempts,
            "request initiated"
        );
        inner
            .sink
            .emit(ClientEvent::RequestStarted {
                request_id: request_id.clone(),
                method: config.method.to_string(),
                endpoint: sanitized.clone(),
            })
            .await;

        let prepared = HttpRequest::from_config(&config, &inner.config.base_url).and_then(|req| {
            let policy = RetryPolicy::from_config(&config.retry)
                .map_err(|e| ClientError::invalid_request(e.to_string()))?;
            let guard = TimeoutGuard::new(config.timeout)
                .ok_or_else(|| ClientError::invalid_request("timeout must be greater than zero"))?;
            Ok((req, policy, guard))
        });
        let (http_request, policy, guard) = match prepared {
            Ok(parts) => parts,
            Err(error) => return Err(self.fail(error, failure).await),
        };
        let policy = policy
            .with_attempt_timeout(config.timeout)
            .with_shared_sleeper(inner.sleeper.clone())
            .with_rng(inner.rng.clone());
        let guard = guard.with_cancellation(config.cancellation.clone());

        let outcome = policy
            .execute_traced(
                || send_attempt(inner.transport.clone(), http_request.clone(), guard.clone()),
                config.cancellation.as_ref(),
            )
            .await;
        failure.attempts = outcome.attempts;
        self.emit_retries(&request_id, &failure.attempts).await;

        let result = outcome
            .result
            .and_then(|response| inner.interceptors.apply_response(response))
            .and_then(|response| {
                let data = response.decode::<T>()?;
                Ok(ApiResponse {
                    data,
                    status: response.status,
                    headers: response.header_map(),
                    request_id: request_id.clone(),
                })
            });

        match result {
            Ok(response) => {
                let duration = started.elapsed();
                let attempts = failure.attempts.len() as u32;
                inner.stats.record_success(duration, response.status);
                tracing::info!(
                    request_id = %request_id,
                    method = %failure.method,
                    endpoint = %sanitized,
                    status = response.status,
                    duration_ms = duration.as_millis() as u64,
                    attempts,
                    "request succeeded"
                );
                inner
                    .sink
                    .emit(ClientEvent::RequestSucceeded {
                        request_id,
                        status: response.status,
                        attempts,
                        duration,
                    })
                    .await;
                Ok(response)
            }
            Err(error) => Err(self.fail(error, failure).await),
        }
    }

    async fn emit_retries(&self, request_id: &str, attempts: &[RetryAttempt]) {
        for attempt in attempts {
            if let Some(previous) = &attempt.previous_error {
                self.inner
                    .sink
                    .emit(ClientEvent::RetryScheduled {
                        request_id: request_id.to_string(),
                        attempt: attempt.attempt,
                        delay: attempt.delay,
                        error_kind: previous.kind(),
                    })
                    .await;
            }
        }
    }

    /// Record a failed call, run the error interceptors and report it.
    async fn fail(&self, error: ClientError, failure: Failure) -> ClientError {
        let inner = &self.inner;
        let duration = failure.started.elapsed();
        let attempts = failure.attempts.len() as u32;
        inner.stats.record_failure(&error);

        let context = ErrorContext {
            request_id: failure.request_id,
            method: failure.method,
            endpoint: failure.endpoint,
            attempts,
            duration,
        };
        let error = inner.interceptors.apply_error(error, &context);
        inner
            .sink
            .emit(ClientEvent::RequestFailed {
                request_id: context.request_id,
                status: error.status(),
                error_kind: error.kind(),
                attempts,
                duration,
            })
            .await;
        error
    }

    pub fn add_request_interceptor<I: RequestInterceptor + 'static>(&self, interceptor: I) {
        self.inner.interceptors.add_request(Arc::new(interceptor));
    }

    pub fn add_response_interceptor<I: ResponseInterceptor + 'static>(&self, interceptor: I) {
        self.inner.interceptors.add_response(Arc::new(interceptor));
    }

    pub fn add_error_interceptor<I: ErrorInterceptor + 'static>(&self, interceptor: I) {
        self.inner.interceptors.add_error(Arc::new(interceptor));
    }

    /// Route client events to `sink` from now on.
    pub fn set_telemetry_sink<S>(&self, sink: S)
    where
        S: tower::Service<ClientEvent, Response = (), Error = Infallible> + Clone + Send + 'static,
        S::Future: Send + 'static,
    {
        self.inner.sink.replace(sink);
    }

    /// Consistent snapshot of the call statistics.
    pub fn stats(&self) -> ApiStats {
        self.inner.stats.snapshot()
    }

    pub fn health_report(&self) -> HealthReport {
        self.inner.stats.health_report()
    }

    pub fn reset_stats(&self) {
        self.inner.stats.reset();
        tracing::info!("api stats reset");
    }

    /// Reports published by the health monitor.
    pub fn subscribe_health(&self) -> watch::Receiver<HealthReport> {
        self.inner.health.subscribe()
    }

    /// Start the background health check on the current tokio runtime. No-op if running.
    pub fn start_health_monitor(&self) {
        let mut slot = self.monitor_slot();
        if slot.as_ref().is_some_and(HealthMonitor::is_running) {
            return;
        }
        let inputs = HealthInputs {
            stats: self.inner.stats.clone(),
            publisher: self.inner.health.clone(),
            sink: self.inner.sink.clone(),
            environment: self.inner.config.environment,
        };
        *slot = Some(HealthMonitor::spawn(inputs, self.inner.config.health_check_interval));
    }

    pub fn is_health_monitor_running(&self) -> bool {
        self.monitor_slot().as_ref().is_some_and(HealthMonitor::is_running)
    }

    /// Stop the background health check and wait for it to exit.
    pub async fn stop_health_monitor(&self) {
        let monitor = self.monitor_slot().take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
    }

    fn monitor_slot(&self) -> MutexGuard<'_, Option<HealthMonitor>> {
        self.inner.monitor.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// What the failure path needs to know about a call.
struct Failure {
    request_id: String,
    method: Method,
    endpoint: String,
    started: Instant,
    attempts: Vec<RetryAttempt>,
}

impl Failure {
    fn early(request_id: String, method: Method, endpoint: &str) -> Self {
        Self {
            request_id,
            method,
            endpoint: sanitize_endpoint(endpoint),
            started: Instant::now(),
            attempts: Vec::new(),
        }
    }
}
