//! Ordered request, response and error interceptors.
//!
//! Each chain is a plain list of transforms run in registration order. Lists live in
//! [`DynamicConfig`] snapshots: a call loads each list once, so registering an interceptor while
//! calls are in flight only affects calls that start afterwards.

use crate::adaptive::DynamicConfig;
use crate::error::Severity;
use crate::request::{parse_header, HttpResponse, RequestConfig};
use crate::ClientError;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";
pub const CLIENT_TIMESTAMP_HEADER: &str = "x-client-timestamp";

/// Transforms a request before it is sent. Returning an error aborts the call without any
/// attempt reaching the transport.
pub trait RequestInterceptor: Send + Sync {
    fn intercept(&self, config: RequestConfig) -> Result<RequestConfig, ClientError>;
}

impl<F> RequestInterceptor for F
where
    F: Fn(RequestConfig) -> Result<RequestConfig, ClientError> + Send + Sync,
{
    fn intercept(&self, config: RequestConfig) -> Result<RequestConfig, ClientError> {
        self(config)
    }
}

/// Transforms a successful (2xx) response before it is decoded.
pub trait ResponseInterceptor: Send + Sync {
    fn intercept(&self, response: HttpResponse) -> Result<HttpResponse, ClientError>;
}

impl<F> ResponseInterceptor for F
where
    F: Fn(HttpResponse) -> Result<HttpResponse, ClientError> + Send + Sync,
{
    fn intercept(&self, response: HttpResponse) -> Result<HttpResponse, ClientError> {
        self(response)
    }
}

/// What an error interceptor knows about the failed call.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorContext {
    pub request_id: String,
    pub method: Method,
    /// Endpoint with query values redacted.
    pub endpoint: String,
    pub attempts: u32,
    pub duration: Duration,
}

/// Observes (and may replace) the classified error of a failed call.
pub trait ErrorInterceptor: Send + Sync {
    fn on_error(&self, error: ClientError, context: &ErrorContext) -> ClientError;
}

impl<F> ErrorInterceptor for F
where
    F: Fn(ClientError, &ErrorContext) -> ClientError + Send + Sync,
{
    fn on_error(&self, error: ClientError, context: &ErrorContext) -> ClientError {
        self(error, context)
    }
}

/// First request interceptor of every client.
///
/// Assigns a correlation id when the caller gave none, stamps the tracing and timestamp headers,
/// merges the client's default headers underneath the caller's, and records the start time.
#[derive(Debug, Clone)]
pub struct DefaultRequestInterceptor {
    default_headers: HeaderMap,
}

impl DefaultRequestInterceptor {
    /// Names compare case-insensitively; a repeated name keeps its last value.
    pub fn new<'a, I>(default_headers: I) -> Result<Self, ClientError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut headers = HeaderMap::new();
        for (name, value) in default_headers {
            let (name, value) = parse_header(name, value)?;
            headers.insert(name, value);
        }
        Ok(Self { default_headers: headers })
    }
}

fn epoch_millis() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis()).unwrap_or_default()
}

/// Write the request id into the id and correlation headers, generating one if missing.
pub(crate) fn stamp_request_id(mut config: RequestConfig) -> Result<RequestConfig, ClientError> {
    let request_id = config.request_id.take().unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let id_value = HeaderValue::from_str(&request_id)
        .map_err(|_| ClientError::invalid_request("request id is not a valid header value"))?;
    config.request_id = Some(request_id);
    Ok(config
        .with_header(HeaderName::from_static(REQUEST_ID_HEADER), id_value.clone())
        .with_header(HeaderName::from_static(CORRELATION_ID_HEADER), id_value))
}

impl RequestInterceptor for DefaultRequestInterceptor {
    fn intercept(&self, config: RequestConfig) -> Result<RequestConfig, ClientError> {
        let mut config = stamp_request_id(config)?.with_header(
            HeaderName::from_static(CLIENT_TIMESTAMP_HEADER),
            HeaderValue::from(epoch_millis() as u64),
        );
        for (name, value) in &self.default_headers {
            config = config.with_header_if_absent(name.clone(), value.clone());
        }
        Ok(config.with_started_at(tokio::time::Instant::now()))
    }
}

/// First error interceptor of every client: logs at a severity derived from the error and
/// returns it unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingErrorInterceptor;

impl ErrorInterceptor for LoggingErrorInterceptor {
    fn on_error(&self, error: ClientError, context: &ErrorContext) -> ClientError {
        let duration_ms = context.duration.as_millis() as u64;
        match error.severity() {
            Severity::Warning => tracing::warn!(
                request_id = %context.request_id,
                method = %context.method,
                endpoint = %context.endpoint,
                duration_ms,
                attempts = context.attempts,
                error_kind = %error.kind(),
                status = error.status(),
                security_event = true,
                "request failed: {}",
                error
            ),
            severity => tracing::error!(
                request_id = %context.request_id,
                method = %context.method,
                endpoint = %context.endpoint,
                duration_ms,
                attempts = context.attempts,
                error_kind = %error.kind(),
                status = error.status(),
                security_event = false,
                critical = severity == Severity::Critical,
                "request failed: {}",
                error
            ),
        }
        error
    }
}

type RequestChain = Vec<Arc<dyn RequestInterceptor>>;
type ResponseChain = Vec<Arc<dyn ResponseInterceptor>>;
type ErrorChain = Vec<Arc<dyn ErrorInterceptor>>;

/// The three interceptor lists of one client.
#[derive(Clone, Default)]
pub struct InterceptorChain {
    request: DynamicConfig<RequestChain>,
    response: DynamicConfig<ResponseChain>,
    error: DynamicConfig<ErrorChain>,
}

impl std::fmt::Debug for InterceptorChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterceptorChain")
            .field("request", &self.request.get().len())
            .field("response", &self.response.get().len())
            .field("error", &self.error.get().len())
            .finish()
    }
}

fn appended<T: Clone>(list: &[T], item: T) -> Vec<T> {
    let mut next = list.to_vec();
    next.push(item);
    next
}

impl InterceptorChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_request(&self, interceptor: Arc<dyn RequestInterceptor>) {
        self.request.update(|list| appended(list, interceptor.clone()));
    }

    pub fn add_response(&self, interceptor: Arc<dyn ResponseInterceptor>) {
        self.response.update(|list| appended(list, interceptor.clone()));
    }

    pub fn add_error(&self, interceptor: Arc<dyn ErrorInterceptor>) {
        self.error.update(|list| appended(list, interceptor.clone()));
    }

    /// Run the request chain; the first error stops it.
    pub fn apply_request(&self, config: RequestConfig) -> Result<RequestConfig, ClientError> {
        self.request.get().iter().try_fold(config, |config, i| i.intercept(config))
    }

    pub fn apply_response(&self, response: HttpResponse) -> Result<HttpResponse, ClientError> {
        self.response.get().iter().try_fold(response, |response, i| i.intercept(response))
    }

    /// Run the error chain; every interceptor sees the error returned by the previous one.
    pub fn apply_error(&self, error: ClientError, context: &ErrorContext) -> ClientError {
        self.error.get().iter().fold(error, |error, i| i.on_error(error, context))
    }
}
