//! Request and response data model.
//!
//! [`RequestOptions`] are the caller's per-call overrides. The client turns them into a
//! [`RequestConfig`], which flows through the request interceptors (each stage yields a new
//! value; the caller's options are never touched), and finally into the wire-level
//! [`HttpRequest`] handed to the transport.

use crate::retry::RetryConfig;
use crate::ClientError;
use http::{HeaderMap, HeaderName, HeaderValue, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Placeholder written over query parameter values in logs.
pub const REDACTED: &str = "[REDACTED]";

/// Per-call overrides supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    headers: Vec<(String, String)>,
    timeout: Option<Duration>,
    retry: Option<RetryConfig>,
    request_id: Option<String>,
    cache_key: Option<String>,
    cancellation: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header. Names are case-insensitive; a later value for the same name wins.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Single attempt, for non-idempotent writes.
    pub fn no_retry(self) -> Self {
        self.retry(RetryConfig::none())
    }

    /// Correlation id to use instead of a generated one.
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    /// Abort the call when `token` is cancelled.
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub(crate) fn requested_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }
}

/// Fully resolved description of one logical call.
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub method: Method,
    pub endpoint: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub request_id: Option<String>,
    pub cache_key: Option<String>,
    pub cancellation: Option<CancellationToken>,
    started_at: Option<Instant>,
}

impl RequestConfig {
    /// Resolve caller options against the client's defaults.
    pub fn resolve(
        method: Method,
        endpoint: impl Into<String>,
        body: Option<Value>,
        options: RequestOptions,
        default_timeout: Duration,
        default_retry: &RetryConfig,
    ) -> Result<Self, ClientError> {
        let mut headers = HeaderMap::new();
        for (name, value) in options.headers {
            let (name, value) = parse_header(&name, &value)?;
            headers.insert(name, value);
        }
        let retry = options.retry.unwrap_or_else(|| default_retry.clone());
        retry.validate().map_err(|e| ClientError::invalid_request(e.to_string()))?;
        let timeout = options.timeout.unwrap_or(default_timeout);
        if timeout.is_zero() {
            return Err(ClientError::invalid_request("timeout must be greater than zero"));
        }
        Ok(Self {
            method,
            endpoint: endpoint.into(),
            headers,
            body,
            timeout,
            retry,
            request_id: options.request_id,
            cache_key: options.cache_key,
            cancellation: options.cancellation,
            started_at: None,
        })
    }

    /// Monotonic start time recorded by the request interceptor stage.
    pub fn started_at(&self) -> Option<Instant> {
        self.started_at
    }

    pub fn with_started_at(mut self, instant: Instant) -> Self {
        self.started_at = Some(instant);
        self
    }

    /// Set a header unless the request already carries one with that name.
    pub fn with_header_if_absent(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.entry(name).or_insert(value);
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Endpoint with query values redacted, for logs.
    pub fn sanitized_endpoint(&self) -> String {
        sanitize_endpoint(&self.endpoint)
    }
}

pub(crate) fn parse_header(name: &str, value: &str) -> Result<(HeaderName, HeaderValue), ClientError> {
    let header_name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| ClientError::invalid_request(format!("invalid header name {:?}", name)))?;
    let header_value = HeaderValue::from_str(value)
        .map_err(|_| ClientError::invalid_request(format!("invalid value for header {:?}", name)))?;
    Ok((header_name, header_value))
}

/// Replace every query parameter value with [`REDACTED`] and drop any fragment.
pub fn sanitize_endpoint(endpoint: &str) -> String {
    let without_fragment = endpoint.split('#').next().unwrap_or_default();
    let Some((path, query)) = without_fragment.split_once('?') else {
        return without_fragment.to_string();
    };
    if query.is_empty() {
        return path.to_string();
    }
    let redacted: Vec<String> = query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            format!("{}={}", key, REDACTED)
        })
        .collect();
    format!("{}?{}", path, redacted.join("&"))
}

/// Join a configured base url and an endpoint. Absolute endpoints are used unchanged.
pub fn join_url(base: &str, endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        return endpoint.to_string();
    }
    let base = base.trim_end_matches('/');
    let endpoint = endpoint.trim_start_matches('/');
    if endpoint.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base, endpoint)
    }
}

/// Wire-level request handed to a [`crate::Transport`].
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn from_config(config: &RequestConfig, base_url: &str) -> Result<Self, ClientError> {
        let body = config
            .body
            .as_ref()
            .map(serde_json::to_vec)
            .transpose()
            .map_err(|e| ClientError::invalid_request(format!("request body: {}", e)))?;
        Ok(Self {
            method: config.method.clone(),
            url: join_url(base_url, &config.endpoint),
            headers: config.headers.clone(),
            body,
        })
    }
}

/// Raw response returned by a [`crate::Transport`].
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, headers: HeaderMap::new(), body: body.into() }
    }

    /// JSON response with a serialized body.
    pub fn json(status: u16, value: &Value) -> Self {
        let mut response = Self::new(status, value.to_string());
        response.headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Decode the body into `T`; an empty body decodes as JSON `null`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, ClientError> {
        let bytes: &[u8] = if self.body.iter().all(u8::is_ascii_whitespace) {
            b"null"
        } else {
            &self.body
        };
        serde_json::from_slice(bytes).map_err(|e| ClientError::Api {
            status: self.status,
            code: "INVALID_RESPONSE".to_string(),
            message: format!("response body could not be decoded: {}", e),
            user_message: None,
            details: None,
            retry_after: None,
        })
    }

    /// Headers flattened to a string map; non-UTF-8 values are skipped.
    pub fn header_map(&self) -> BTreeMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(name, value)| {
                value.to_str().ok().map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect()
    }
}

/// Successful call result handed to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub data: T,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub request_id: String,
}
