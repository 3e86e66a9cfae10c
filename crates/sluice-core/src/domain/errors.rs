//! Errors - 正規化されたエラー分類
//!
//! Every failure that crosses the client boundary is expressed with one of
//! the [`ErrorCode`] kinds. Raw faults never leave the process.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Canonical error kind (closed set).
///
/// Serialized as SCREAMING_SNAKE_CASE (`RATE_LIMITED`, `API_UNAVAILABLE`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InvalidPrompt,
    InvalidText,
    InvalidRequestId,
    MethodNotAllowed,
    RateLimited,
    Timeout,
    ApiUnavailable,
    InternalError,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 8] = [
        ErrorCode::InvalidPrompt,
        ErrorCode::InvalidText,
        ErrorCode::InvalidRequestId,
        ErrorCode::MethodNotAllowed,
        ErrorCode::RateLimited,
        ErrorCode::Timeout,
        ErrorCode::ApiUnavailable,
        ErrorCode::InternalError,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::InvalidPrompt => "INVALID_PROMPT",
            ErrorCode::InvalidText => "INVALID_TEXT",
            ErrorCode::InvalidRequestId => "INVALID_REQUEST_ID",
            ErrorCode::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            ErrorCode::RateLimited => "RATE_LIMITED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::ApiUnavailable => "API_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Resolve a wire name. Unknown names fall back to `INTERNAL_ERROR`.
    pub fn parse(name: &str) -> ErrorCode {
        ErrorCode::ALL
            .into_iter()
            .find(|code| code.as_str().eq_ignore_ascii_case(name.trim()))
            .unwrap_or(ErrorCode::InternalError)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operational urgency, independent of the HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Why a failure happened at the admission layer.
///
/// These keep overload (queue full / waiting too long) distinguishable from
/// provider faults even though they share a canonical code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    QueueFull,
    QueueTimeout,
    RequestTimeout,
    QueueCleared,
}

/// The only error shape a caller ever sees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(rename = "statusCode")]
    pub status: u16,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
}

impl ApiError {
    pub fn with_reason(mut self, reason: FailureReason) -> Self {
        self.reason = Some(reason);
        self
    }
}

/// Where and when an error happened.
///
/// Every field but the timestamp is best effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorContext {
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl ErrorContext {
    /// Context with only a timestamp.
    pub fn at(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            request_id: None,
            endpoint: None,
            user_agent: None,
            ip: None,
        }
    }
}

/// Full internal record of a failure, for logs only.
///
/// `original_error` is always the output of `ErrorClassifier::sanitize`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalError {
    pub code: ErrorCode,
    pub message: String,
    pub severity: Severity,
    pub context: ErrorContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_error: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn error_code_serializes_as_screaming_snake() {
        let s = serde_json::to_string(&ErrorCode::ApiUnavailable).unwrap();
        assert_eq!(s, "\"API_UNAVAILABLE\"");

        let back: ErrorCode = serde_json::from_str("\"RATE_LIMITED\"").unwrap();
        assert_eq!(back, ErrorCode::RateLimited);
    }

    #[rstest]
    #[case::exact("TIMEOUT", ErrorCode::Timeout)]
    #[case::lowercase("invalid_text", ErrorCode::InvalidText)]
    #[case::unknown("SOMETHING_ELSE", ErrorCode::InternalError)]
    #[case::empty("", ErrorCode::InternalError)]
    fn parse_falls_back_to_internal(#[case] name: &str, #[case] expected: ErrorCode) {
        assert_eq!(ErrorCode::parse(name), expected);
    }

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn api_error_json_shape() {
        let err = ApiError {
            code: ErrorCode::RateLimited,
            message: "slow down".to_string(),
            status: 429,
            severity: Severity::Medium,
            reason: Some(FailureReason::QueueFull),
        };
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["code"], "RATE_LIMITED");
        assert_eq!(v["statusCode"], 429);
        assert_eq!(v["severity"], "MEDIUM");
        assert_eq!(v["reason"], "queue_full");
    }
}
