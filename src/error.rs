//! Error taxonomy for outbound calls.
//!
//! Every failure that leaves the client is one [`ClientError`] variant. Raw failure signals
//! (a non-2xx response, a transport exception, a deadline or an external abort) are turned into
//! variants by [`classify`]; [`ClientError::is_retryable`] is the single predicate the retry
//! engine consults.
//!
//! Classification rules:
//! - 401/403 → `Api`, authorization failure, never retried.
//! - 429 → `Api`, rate limited, retried (honoring `Retry-After` delta-seconds when present).
//! - other 4xx → `Validation`/`Business` per the body's `type` discriminator; without one, 400
//!   and 422 are `Validation` and the rest stay `Api`.
//! - 5xx → `Api`, retried.
//! - transport failure → `Network`, retried.
//! - deadline → `Timeout`, retried; external cancellation → `Timeout { cancelled: true }`, not
//!   retried.
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Closed set of errors a call can fail with.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientError {
    /// The server answered with a non-2xx status.
    Api {
        status: u16,
        code: String,
        message: String,
        user_message: Option<String>,
        details: Option<Value>,
        /// Server-provided `Retry-After` hint, if any.
        retry_after: Option<Duration>,
    },
    /// The transport failed before any response was received.
    Network { cause: String },
    /// The call did not settle within its deadline, or was aborted by the caller.
    Timeout { timeout: Duration, elapsed: Duration, cancelled: bool },
    /// A server-classified domain rule violation.
    Business {
        status: u16,
        code: String,
        message: String,
        user_message: Option<String>,
        details: Option<Value>,
    },
    /// The request payload was rejected as malformed.
    Validation {
        status: u16,
        code: String,
        message: String,
        field_errors: BTreeMap<String, Vec<String>>,
    },
}

/// Discriminant of a [`ClientError`], used in logs and telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Api,
    Network,
    Timeout,
    Business,
    Validation,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Api => "api_error",
            ErrorKind::Network => "network_error",
            ErrorKind::Timeout => "timeout_error",
            ErrorKind::Business => "business_error",
            ErrorKind::Validation => "validation_error",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log severity derived from an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api { status, code, message, .. } => {
                write!(f, "api error {} ({}): {}", status, code, message)
            }
            Self::Network { cause } => write!(f, "network error: {}", cause),
            Self::Timeout { timeout, elapsed, cancelled: false } => {
                write!(f, "request timed out after {:?} (limit: {:?})", elapsed, timeout)
            }
            Self::Timeout { elapsed, cancelled: true, .. } => {
                write!(f, "request cancelled after {:?}", elapsed)
            }
            Self::Business { status, code, message, .. } => {
                write!(f, "business rule violated {} ({}): {}", status, code, message)
            }
            Self::Validation { status, code, message, field_errors } => {
                write!(f, "validation failed {} ({}): {}", status, code, message)?;
                if !field_errors.is_empty() {
                    let fields: Vec<&str> = field_errors.keys().map(String::as_str).collect();
                    write!(f, " [fields: {}]", fields.join(", "))?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ClientError {}

impl ClientError {
    /// Transport failure with the given cause.
    pub fn network(cause: impl Into<String>) -> Self {
        Self::Network { cause: cause.into() }
    }

    /// Deadline expiry.
    pub fn timeout(timeout: Duration, elapsed: Duration) -> Self {
        Self::Timeout { timeout, elapsed, cancelled: false }
    }

    /// Caller-initiated abort.
    pub fn cancelled(timeout: Duration, elapsed: Duration) -> Self {
        Self::Timeout { timeout, elapsed, cancelled: true }
    }

    /// Bare `Api` error with no body details.
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: code.into(),
            message: message.into(),
            user_message: None,
            details: None,
            retry_after: None,
        }
    }

    /// Client-side validation failure that never reached the server.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::Validation {
            status: 0,
            code: "INVALID_REQUEST".to_string(),
            message: message.into(),
            field_errors: BTreeMap::new(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Api { .. } => ErrorKind::Api,
            Self::Network { .. } => ErrorKind::Network,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::Business { .. } => ErrorKind::Business,
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }

    /// HTTP status if the server answered; `None` for transport failures, timeouts and
    /// client-side validation.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. }
            | Self::Business { status, .. }
            | Self::Validation { status, .. } => (*status != 0).then_some(*status),
            Self::Network { .. } | Self::Timeout { .. } => None,
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &str {
        match self {
            Self::Api { code, .. } | Self::Business { code, .. } | Self::Validation { code, .. } => {
                code
            }
            Self::Network { .. } => "NETWORK_ERROR",
            Self::Timeout { cancelled: false, .. } => "TIMEOUT",
            Self::Timeout { cancelled: true, .. } => "CANCELLED",
        }
    }

    /// Developer-facing message.
    pub fn message(&self) -> &str {
        match self {
            Self::Api { message, .. }
            | Self::Business { message, .. }
            | Self::Validation { message, .. } => message,
            Self::Network { cause } => cause,
            Self::Timeout { cancelled: false, .. } => "request timed out",
            Self::Timeout { cancelled: true, .. } => "request cancelled",
        }
    }

    /// Message suitable for end users, when the server supplied one.
    pub fn user_message(&self) -> Option<&str> {
        match self {
            Self::Api { user_message, .. } | Self::Business { user_message, .. } => {
                user_message.as_deref()
            }
            _ => None,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }

    pub fn field_errors(&self) -> Option<&BTreeMap<String, Vec<String>>> {
        match self {
            Self::Validation { field_errors, .. } => Some(field_errors),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { cancelled: false, .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Timeout { cancelled: true, .. })
    }

    /// 401 or 403.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Api { status: 401 | 403, .. })
    }

    /// 429.
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::Api { status: 429, .. })
    }

    /// Failures routed to the audit path in addition to normal propagation.
    pub fn is_security_relevant(&self) -> bool {
        self.is_auth_failure() || self.is_rate_limited()
    }

    /// Whether the retry engine may schedule another attempt for this error.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Timeout { cancelled, .. } => !cancelled,
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Business { .. } | Self::Validation { .. } => false,
        }
    }

    pub fn severity(&self) -> Severity {
        if self.is_security_relevant() {
            return Severity::Warning;
        }
        match self.status() {
            Some(status) if status >= 500 => Severity::Critical,
            Some(_) => Severity::Error,
            None => match self {
                Self::Validation { .. } => Severity::Error,
                _ => Severity::Critical,
            },
        }
    }
}

/// Transport-level failure raised before any response was received.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("i/o failure: {0}")]
    Io(String),
    #[error("request could not be built: {0}")]
    InvalidRequest(String),
    #[error("transport failure: {0}")]
    Other(String),
}

/// Body of a non-2xx response, parsed as JSON when possible.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    Empty,
    Json(Value),
    Text(String),
}

impl ResponseBody {
    pub fn parse(bytes: &[u8]) -> Self {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Self::Empty;
        }
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => Self::Json(value),
            Err(_) => Self::Text(String::from_utf8_lossy(bytes).into_owned()),
        }
    }

    fn field(&self, names: &[&str]) -> Option<&Value> {
        match self {
            Self::Json(Value::Object(map)) => names.iter().find_map(|n| map.get(*n)),
            _ => None,
        }
    }

    fn str_field(&self, names: &[&str]) -> Option<String> {
        self.field(names).and_then(Value::as_str).map(str::to_string)
    }
}

/// A failure signal before classification.
#[derive(Debug, Clone)]
pub enum RawFailure {
    /// Non-2xx response with its parsed body.
    Status { status: u16, headers: http::HeaderMap, body: ResponseBody },
    /// The transport raised before a response arrived.
    Transport(TransportError),
    /// The per-attempt deadline fired.
    Deadline { timeout: Duration, elapsed: Duration },
    /// The caller aborted the call.
    Cancelled { timeout: Duration, elapsed: Duration },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Discriminator {
    Validation,
    Business,
}

fn discriminator(body: &ResponseBody) -> Option<Discriminator> {
    let raw = body.str_field(&["type", "errorType", "error_type"])?;
    let normalized: String =
        raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect::<String>().to_ascii_lowercase();
    match normalized.trim_end_matches("error") {
        "validation" => Some(Discriminator::Validation),
        "business" => Some(Discriminator::Business),
        _ => None,
    }
}

fn field_errors(body: &ResponseBody) -> BTreeMap<String, Vec<String>> {
    let mut out = BTreeMap::new();
    let Some(Value::Object(fields)) = body.field(&["fieldErrors", "field_errors", "errors"]) else {
        return out;
    };
    for (name, value) in fields {
        let messages = match value {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => {
                items.iter().filter_map(Value::as_str).map(str::to_string).collect()
            }
            other => vec![other.to_string()],
        };
        out.insert(name.clone(), messages);
    }
    out
}

/// Parse a `Retry-After` header given in delta-seconds. HTTP-date values are ignored.
pub fn parse_retry_after(headers: &http::HeaderMap) -> Option<Duration> {
    let value = headers.get(http::header::RETRY_AFTER)?.to_str().ok()?;
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

fn default_message(status: u16, body: &ResponseBody) -> String {
    if let ResponseBody::Text(text) = body {
        return text.chars().take(512).collect();
    }
    http::StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .map(str::to_string)
        .unwrap_or_else(|| format!("HTTP {}", status))
}

/// Turn a raw failure signal into a typed error.
pub fn classify(failure: RawFailure) -> ClientError {
    match failure {
        RawFailure::Transport(TransportError::InvalidRequest(message)) => {
            ClientError::invalid_request(message)
        }
        RawFailure::Transport(err) => ClientError::network(err.to_string()),
        RawFailure::Deadline { timeout, elapsed } => ClientError::timeout(timeout, elapsed),
        RawFailure::Cancelled { timeout, elapsed } => ClientError::cancelled(timeout, elapsed),
        RawFailure::Status { status, headers, body } => classify_status(status, &headers, &body),
    }
}

fn classify_status(status: u16, headers: &http::HeaderMap, body: &ResponseBody) -> ClientError {
    let code = body
        .str_field(&["code", "error"])
        .unwrap_or_else(|| format!("HTTP_{}", status));
    let message =
        body.str_field(&["message", "error"]).unwrap_or_else(|| default_message(status, body));
    let user_message = body.str_field(&["userMessage", "user_message"]);
    let details = body.field(&["details"]).cloned();

    let discriminated = (400..500).contains(&status) && !matches!(status, 401 | 403 | 429);
    if discriminated {
        match discriminator(body) {
            Some(Discriminator::Validation) => {
                return ClientError::Validation {
                    status,
                    code,
                    message,
                    field_errors: field_errors(body),
                };
            }
            Some(Discriminator::Business) => {
                return ClientError::Business { status, code, message, user_message, details };
            }
            None if matches!(status, 400 | 422) => {
                return ClientError::Validation {
                    status,
                    code,
                    message,
                    field_errors: field_errors(body),
                };
            }
            None => {}
        }
    }

    ClientError::Api {
        status,
        code,
        message,
        user_message,
        details,
        retry_after: parse_retry_after(headers),
    }
}
