//! Error classification: raw faults -> canonical kinds -> safe API errors.
//!
//! The mapping rules are applied in a fixed order: HTTP status first, then
//! the OS/network error code, then the error name. Anything unmatched is an
//! `INTERNAL_ERROR`.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{error, info, warn};

use crate::domain::{ApiError, ErrorCode, ErrorContext, Fault, InternalError, Severity};
use crate::impls::SystemClock;
use crate::ports::{Clock, InboundRequest};
use crate::queue::QueueError;

/// Keys stripped by [`ErrorClassifier::sanitize`], compared after
/// lower-casing and removing `-` / `_`.
const SENSITIVE_KEYS: [&str; 5] = ["apikey", "token", "password", "authorization", "secret"];

const UNAVAILABLE_CODES: [&str; 5] = [
    "ECONNREFUSED",
    "ENOTFOUND",
    "ECONNRESET",
    "EAI_AGAIN",
    "EPIPE",
];
const TIMEOUT_CODES: [&str; 3] = ["ETIMEDOUT", "ESOCKETTIMEDOUT", "ECONNABORTED"];

/// Row of the taxonomy table.
struct Taxonomy {
    status: u16,
    severity: Severity,
    user_message: &'static str,
}

fn taxonomy(code: ErrorCode) -> Taxonomy {
    let (status, severity, user_message) = match code {
        ErrorCode::InvalidPrompt => (400, Severity::Low, "The prompt is missing or invalid."),
        ErrorCode::InvalidText => (
            400,
            Severity::Low,
            "The text to process is missing or invalid.",
        ),
        ErrorCode::InvalidRequestId => (
            400,
            Severity::Low,
            "The request id is missing or invalid.",
        ),
        ErrorCode::MethodNotAllowed => (405, Severity::Low, "This method is not allowed."),
        ErrorCode::RateLimited => (
            429,
            Severity::Medium,
            "Too many requests. Please wait a moment and try again.",
        ),
        ErrorCode::Timeout => (
            408,
            Severity::Medium,
            "The request took too long to complete. Please try again.",
        ),
        ErrorCode::ApiUnavailable => (
            503,
            Severity::High,
            "The text service is temporarily unavailable. Please try again later.",
        ),
        ErrorCode::InternalError => (
            500,
            Severity::Critical,
            "An unexpected error occurred. Please try again later.",
        ),
    };
    Taxonomy {
        status,
        severity,
        user_message,
    }
}

/// Classifies faults and renders them for logs and callers.
#[derive(Clone)]
pub struct ErrorClassifier {
    clock: Arc<dyn Clock>,
}

impl Default for ErrorClassifier {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl ErrorClassifier {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Map a raw fault to its canonical kind.
    pub fn classify(fault: &Fault) -> ErrorCode {
        if let Some(status) = fault.status
            && let Some(code) = classify_status(status)
        {
            return code;
        }

        if let Some(code) = fault.code.as_deref() {
            if UNAVAILABLE_CODES.iter().any(|c| c.eq_ignore_ascii_case(code)) {
                return ErrorCode::ApiUnavailable;
            }
            if TIMEOUT_CODES.iter().any(|c| c.eq_ignore_ascii_case(code)) {
                return ErrorCode::Timeout;
            }
        }

        if let Some(name) = fault.name.as_deref() {
            if name.contains("Timeout") {
                return ErrorCode::Timeout;
            }
            if name.contains("Network") {
                return ErrorCode::ApiUnavailable;
            }
        }

        ErrorCode::InternalError
    }

    /// Whether a fault is worth another attempt.
    ///
    /// An HTTP status with a mapping rule decides on its own. Network codes
    /// and timeout/network names are always retryable. For everything else
    /// the classified kind must be in `extra`.
    pub fn is_retryable(fault: &Fault, extra: &[ErrorCode]) -> bool {
        if let Some(status) = fault.status
            && classify_status(status).is_some()
        {
            return matches!(status, 408 | 429 | 500 | 502 | 503 | 504);
        }

        if let Some(code) = fault.code.as_deref()
            && UNAVAILABLE_CODES
                .iter()
                .chain(TIMEOUT_CODES.iter())
                .any(|c| c.eq_ignore_ascii_case(code))
        {
            return true;
        }

        if let Some(name) = fault.name.as_deref()
            && (name.contains("Timeout") || name.contains("Network"))
        {
            return true;
        }

        extra.contains(&Self::classify(fault))
    }

    /// Static lookup: canonical kind -> caller-facing error.
    pub fn to_api_error(code: ErrorCode) -> ApiError {
        let row = taxonomy(code);
        ApiError {
            code,
            message: row.user_message.to_string(),
            status: row.status,
            severity: row.severity,
            reason: None,
        }
    }

    /// Same as [`Self::to_api_error`] for a wire name; unknown names map to
    /// the `INTERNAL_ERROR` row.
    pub fn to_api_error_named(name: &str) -> ApiError {
        Self::to_api_error(ErrorCode::parse(name))
    }

    /// Copy of `value` without any sensitive-looking keys.
    ///
    /// Nested objects and arrays are cleaned too. Scalars pass through.
    pub fn sanitize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let cleaned: Map<String, Value> = map
                    .iter()
                    .filter(|(key, _)| !is_sensitive_key(key))
                    .map(|(key, v)| (key.clone(), Self::sanitize(v)))
                    .collect();
                Value::Object(cleaned)
            }
            Value::Array(items) => Value::Array(items.iter().map(Self::sanitize).collect()),
            other => other.clone(),
        }
    }

    pub fn sanitize_fault(fault: &Fault) -> Value {
        Self::sanitize(&fault.to_value())
    }

    /// Extract request metadata. Missing fields stay `None`.
    pub fn build_context(&self, request: &impl InboundRequest) -> ErrorContext {
        let request_id = non_empty(request.header("x-request-id"))
            .or_else(|| non_empty(request.body_request_id()));

        // x-forwarded-for は "client, proxy1, proxy2" 形式なので先頭だけ使う
        let ip = non_empty(request.header("x-forwarded-for"))
            .and_then(|xff| non_empty(xff.split(',').next()))
            .or_else(|| request.remote_addr().map(|addr| addr.ip().to_string()));

        ErrorContext {
            timestamp: self.clock.now(),
            request_id,
            endpoint: non_empty(request.path()),
            user_agent: non_empty(request.header("user-agent")),
            ip,
        }
    }

    /// Context carrying only the current timestamp.
    pub fn empty_context(&self) -> ErrorContext {
        ErrorContext::at(self.clock.now())
    }

    /// Record a final failure and produce what the caller may see.
    ///
    /// LOW severity errors describe caller mistakes: they are logged at
    /// info and the caller gets `message` as-is. Everything else is logged
    /// at warn/error with sanitized context, and the caller only gets the
    /// fixed message of the taxonomy row.
    pub fn report(
        &self,
        code: ErrorCode,
        message: impl Into<String>,
        fault: Option<&Fault>,
        context: ErrorContext,
    ) -> (InternalError, ApiError) {
        let message = message.into();
        let row = taxonomy(code);
        let internal = InternalError {
            code,
            message: message.clone(),
            severity: row.severity,
            context,
            original_error: fault.map(Self::sanitize_fault),
        };

        let context_json = serde_json::to_string(&internal.context).unwrap_or_default();
        let original_json = internal
            .original_error
            .as_ref()
            .map(Value::to_string)
            .unwrap_or_default();

        let mut api = Self::to_api_error(code);
        match row.severity {
            Severity::Low => {
                info!(code = %code, detail = %message, "request rejected");
                api.message = message;
            }
            Severity::Medium => warn!(
                code = %code,
                detail = %message,
                context = %context_json,
                original = %original_json,
                "request failed"
            ),
            Severity::High | Severity::Critical => error!(
                code = %code,
                severity = ?row.severity,
                detail = %message,
                context = %context_json,
                original = %original_json,
                "request failed"
            ),
        }

        (internal, api)
    }
}

impl ApiError {
    /// Caller-facing error for a failed enqueue.
    ///
    /// Admission failures keep their cause in `reason`. Operation faults go
    /// through [`ErrorClassifier::classify`].
    pub fn from_queue_error(err: &QueueError<Fault>) -> ApiError {
        match (err.admission_code(), err.reason(), err.operation_error()) {
            (Some(code), Some(reason), _) => {
                ErrorClassifier::to_api_error(code).with_reason(reason)
            }
            (_, _, Some(fault)) => ErrorClassifier::to_api_error(ErrorClassifier::classify(fault)),
            _ => ErrorClassifier::to_api_error(ErrorCode::InternalError),
        }
    }
}

fn classify_status(status: u16) -> Option<ErrorCode> {
    match status {
        400 => Some(ErrorCode::InvalidPrompt),
        401 | 403 => Some(ErrorCode::ApiUnavailable),
        405 => Some(ErrorCode::MethodNotAllowed),
        408 => Some(ErrorCode::Timeout),
        429 => Some(ErrorCode::RateLimited),
        500 => Some(ErrorCode::InternalError),
        502..=504 => Some(ErrorCode::ApiUnavailable),
        _ => None,
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let normalized: String = key
        .chars()
        .filter(|c| *c != '-' && *c != '_')
        .flat_map(char::to_lowercase)
        .collect();
    SENSITIVE_KEYS.contains(&normalized.as_str())
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
