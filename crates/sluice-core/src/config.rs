//! Configuration for the admission queue, the retry orchestrator and the client.
//!
//! All durations are expressed in milliseconds on the wire
//! (`request_timeout_ms`, `base_delay_ms`, ...).
//!
//! # Example
//!
//! ```toml
//! [queue]
//! max_concurrent = 5
//! max_queue_size = 100
//! request_timeout_ms = 30000
//! queue_timeout_ms = 60000
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 1000
//! retryable_error_codes = ["RATE_LIMITED", "TIMEOUT"]
//!
//! [client]
//! model = "gpt-4o-mini"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ErrorCode;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Admission limits. Treated as an immutable snapshot; updates replace it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Operations allowed to run at the same time. Must be >= 1.
    pub max_concurrent: usize,

    /// Operations allowed to wait for a slot. 0 disables waiting.
    pub max_queue_size: usize,

    /// Wall-clock budget of a running operation.
    #[serde(rename = "request_timeout_ms", with = "millis")]
    pub request_timeout: Duration,

    /// Wall-clock budget for waiting in the queue.
    #[serde(rename = "queue_timeout_ms", with = "millis")]
    pub queue_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            max_queue_size: 100,
            request_timeout: Duration::from_secs(30),
            queue_timeout: Duration::from_secs(60),
        }
    }
}

impl QueueConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent == 0 {
            return Err(ConfigError::Invalid("max_concurrent must be >= 1".into()));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid("request_timeout_ms must be > 0".into()));
        }
        if self.queue_timeout.is_zero() {
            return Err(ConfigError::Invalid("queue_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Merge a partial update into a copy of this snapshot.
    pub fn merged(&self, update: &QueueConfigUpdate) -> QueueConfig {
        QueueConfig {
            max_concurrent: update.max_concurrent.unwrap_or(self.max_concurrent),
            max_queue_size: update.max_queue_size.unwrap_or(self.max_queue_size),
            request_timeout: update.request_timeout.unwrap_or(self.request_timeout),
            queue_timeout: update.queue_timeout.unwrap_or(self.queue_timeout),
        }
    }
}

/// Partial queue config update (`None` keeps the current value).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueConfigUpdate {
    pub max_concurrent: Option<usize>,
    pub max_queue_size: Option<usize>,
    pub request_timeout: Option<Duration>,
    pub queue_timeout: Option<Duration>,
}

/// Retry policy for a single logical operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = max_retries + 1).
    pub max_retries: u32,

    #[serde(rename = "base_delay_ms", with = "millis")]
    pub base_delay: Duration,

    pub backoff_multiplier: f64,

    #[serde(rename = "max_delay_ms", with = "millis")]
    pub max_delay: Duration,

    /// Fraction of the computed delay that is randomized (0..=1).
    pub jitter_factor: f64,

    /// Per-attempt timeout.
    #[serde(rename = "timeout_ms", with = "opt_millis")]
    pub timeout: Option<Duration>,

    /// Canonical kinds retried on top of the built-in rules.
    pub retryable_error_codes: Vec<ErrorCode>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(10_000),
            jitter_factor: 0.1,
            timeout: Some(Duration::from_secs(30)),
            retryable_error_codes: vec![
                ErrorCode::RateLimited,
                ErrorCode::Timeout,
                ErrorCode::ApiUnavailable,
            ],
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backoff_multiplier <= 1.0 || !self.backoff_multiplier.is_finite() {
            return Err(ConfigError::Invalid("backoff_multiplier must be > 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::Invalid("jitter_factor must be within 0..=1".into()));
        }
        if self.base_delay > self.max_delay {
            return Err(ConfigError::Invalid("base_delay_ms cannot exceed max_delay_ms".into()));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::Invalid("timeout_ms must be > 0 when set".into()));
        }
        Ok(())
    }
}

/// Outbound completion request parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            max_tokens: 1000,
            temperature: 0.7,
        }
    }
}

/// Everything `sluice` reads at startup.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SluiceConfig {
    pub queue: QueueConfig,
    pub retry: RetryConfig,
    pub client: ClientConfig,
}

impl SluiceConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: SluiceConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.queue.validate()?;
        self.retry.validate()
    }

    /// Apply `SLUICE_*` overrides from the process environment.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply `SLUICE_*` overrides from an arbitrary lookup.
    pub fn apply_env_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env_parse::<usize>(&lookup, "SLUICE_MAX_CONCURRENT")? {
            self.queue.max_concurrent = v;
        }
        if let Some(v) = env_parse::<usize>(&lookup, "SLUICE_MAX_QUEUE_SIZE")? {
            self.queue.max_queue_size = v;
        }
        if let Some(v) = env_parse::<u64>(&lookup, "SLUICE_REQUEST_TIMEOUT_MS")? {
            self.queue.request_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u64>(&lookup, "SLUICE_QUEUE_TIMEOUT_MS")? {
            self.queue.queue_timeout = Duration::from_millis(v);
        }
        if let Some(v) = env_parse::<u32>(&lookup, "SLUICE_MAX_RETRIES")? {
            self.retry.max_retries = v;
        }
        if let Some(model) = lookup("SLUICE_MODEL").filter(|m| !m.trim().is_empty()) {
            self.client.model = model;
        }
        self.validate()?;
        Ok(self)
    }
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value: raw }),
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}
