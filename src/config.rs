//! Client configuration: defaults, builder, environment loading and serde helpers.

use crate::retry::{RetryConfig, RetryConfigError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:3000/api";

pub const ENV_BASE_URL: &str = "TASKWIRE_BASE_URL";
pub const ENV_TIMEOUT_MS: &str = "TASKWIRE_TIMEOUT_MS";
pub const ENV_HEALTH_INTERVAL_MS: &str = "TASKWIRE_HEALTH_INTERVAL_MS";
pub const ENV_ENVIRONMENT: &str = "TASKWIRE_ENV";

/// Deployment environment. Health warnings are only emitted outside development and test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Test,
    Staging,
    Production,
}

impl Environment {
    pub fn reports_health_warnings(&self) -> bool {
        matches!(self, Environment::Staging | Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            "staging" => Ok(Environment::Staging),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::InvalidEnvironment(other.to_string())),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Environment::Development => "development",
            Environment::Test => "test",
            Environment::Staging => "staging",
            Environment::Production => "production",
        };
        f.write_str(name)
    }
}

/// Invalid client configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid base url {0:?}: expected an absolute http(s) url")]
    InvalidBaseUrl(String),
    #[error("{var} must be a non-negative integer (got {value:?})")]
    InvalidNumber { var: &'static str, value: String },
    #[error("unknown environment {0:?}")]
    InvalidEnvironment(String),
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("invalid default header {0:?}")]
    InvalidHeader(String),
    #[error(transparent)]
    Retry(#[from] RetryConfigError),
}

/// Settings shared by every call issued through one client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(with = "serde_millis", rename = "timeout_ms")]
    pub timeout: Duration,
    /// Merged under every request; request headers win on conflict.
    pub default_headers: BTreeMap<String, String>,
    /// Retry settings for idempotent verbs (GET, DELETE).
    pub retry: RetryConfig,
    /// Retry settings for mutating verbs (POST, PUT, PATCH).
    pub write_retry: RetryConfig,
    #[serde(with = "serde_millis", rename = "health_check_interval_ms")]
    pub health_check_interval: Duration,
    pub environment: Environment,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        let mut default_headers = BTreeMap::new();
        default_headers.insert("content-type".to_string(), "application/json".to_string());
        default_headers.insert("accept".to_string(), "application/json".to_string());
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            default_headers,
            retry: RetryConfig::standard(),
            write_retry: RetryConfig::critical(),
            health_check_interval: DEFAULT_HEALTH_CHECK_INTERVAL,
            environment: Environment::default(),
            user_agent: concat!("taskwire/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::default()
    }

    /// Defaults overridden by `TASKWIRE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`ClientConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup(ENV_BASE_URL) {
            config.base_url = url;
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            config.timeout = parse_millis(ENV_TIMEOUT_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_HEALTH_INTERVAL_MS) {
            config.health_check_interval = parse_millis(ENV_HEALTH_INTERVAL_MS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_ENVIRONMENT) {
            config.environment = raw.parse()?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let uri: http::Uri =
            self.base_url.parse().map_err(|_| ConfigError::InvalidBaseUrl(self.base_url.clone()))?;
        let http_scheme = matches!(uri.scheme_str(), Some("http") | Some("https"));
        if !http_scheme || uri.authority().is_none() {
            return Err(ConfigError::InvalidBaseUrl(self.base_url.clone()));
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("timeout"));
        }
        if self.health_check_interval.is_zero() {
            return Err(ConfigError::ZeroDuration("health_check_interval"));
        }
        for (name, value) in &self.default_headers {
            let valid = http::HeaderName::from_bytes(name.as_bytes()).is_ok()
                && http::HeaderValue::from_str(value).is_ok();
            if !valid {
                return Err(ConfigError::InvalidHeader(name.clone()));
            }
        }
        self.retry.validate()?;
        self.write_retry.validate()?;
        Ok(())
    }
}

fn parse_millis(var: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map(Duration::from_millis)
        .map_err(|_| ConfigError::InvalidNumber { var, value: raw.to_string() })
}

/// Builder for [`ClientConfig`]; `build` validates.
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Header names are case-insensitive; a later call with any casing replaces the earlier value.
    pub fn default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.default_headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn write_retry(mut self, retry: RetryConfig) -> Self {
        self.config.write_retry = retry;
        self
    }

    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config.health_check_interval = interval;
        self
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.config.environment = environment;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Serialize a `Duration` as integer milliseconds.
pub mod serde_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Serialize an optional `Duration` as integer milliseconds or `null`.
pub mod serde_opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|v| v.map(Duration::from_millis))
    }
}
