//! Fault model: the raw failure an operation reports before classification.
//!
//! A fault is architecture-agnostic. It carries whatever the transport could
//! tell us (HTTP status, OS-level error code, error name) and leaves the
//! decision "what kind of error is this" to the classifier.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A failure reported by an operation (transport call, timeout, ...).
///
/// Every field except `message` is optional: a fault can be a bare HTTP
/// status, a bare network error code, or just a named error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message}")]
pub struct Fault {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,

    /// OS / network level code (e.g. `ECONNREFUSED`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    /// Error "type" name (e.g. `TimeoutError`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub message: String,

    /// Provider specific extras. May contain sensitive fields; only ever
    /// logged or attached after sanitization.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl Fault {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            code: None,
            name: None,
            message: message.into(),
            details: Map::new(),
        }
    }

    /// A fault carrying only an HTTP status.
    pub fn status(status: u16) -> Self {
        Self::new(format!("HTTP status {status}")).with_status(status)
    }

    /// A fault carrying only a network error code.
    pub fn code(code: impl Into<String>) -> Self {
        let code = code.into();
        Self::new(code.clone()).with_code(code)
    }

    pub fn named(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(message).with_name(name)
    }

    /// The fault recorded when an attempt exceeds its time budget.
    pub fn timed_out(after_ms: u128) -> Self {
        Self::named("TimeoutError", format!("Operation timed out after {after_ms}ms"))
            .with_code("ETIMEDOUT")
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Flat JSON view (`status`, `code`, `name`, `message` plus details).
    ///
    /// This is the raw, unsanitized shape. Pass it through
    /// `ErrorClassifier::sanitize` before it leaves the process.
    pub fn to_value(&self) -> Value {
        let mut map = self.details.clone();
        if let Some(status) = self.status {
            map.insert("status".to_string(), Value::from(status));
        }
        if let Some(code) = &self.code {
            map.insert("code".to_string(), Value::from(code.as_str()));
        }
        if let Some(name) = &self.name {
            map.insert("name".to_string(), Value::from(name.as_str()));
        }
        map.insert("message".to_string(), Value::from(self.message.as_str()));
        Value::Object(map)
    }
}

impl From<std::io::Error> for Fault {
    fn from(err: std::io::Error) -> Self {
        use std::io::ErrorKind;

        let code = match err.kind() {
            ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
            ErrorKind::ConnectionReset => Some("ECONNRESET"),
            ErrorKind::ConnectionAborted => Some("ECONNABORTED"),
            ErrorKind::TimedOut => Some("ETIMEDOUT"),
            ErrorKind::NotFound => Some("ENOTFOUND"),
            ErrorKind::BrokenPipe => Some("EPIPE"),
            _ => None,
        };
        let fault = Fault::named("IoError", err.to_string());
        match code {
            Some(code) => fault.with_code(code),
            None => fault,
        }
    }
}
