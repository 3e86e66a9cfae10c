use std::time::Duration;

use crate::domain::{ErrorCode, FailureReason};

/// Why an operation submitted to the admission queue did not produce a value.
///
/// The first four variants are raised by the queue itself. `Operation`
/// carries the operation's own error untouched.
#[derive(Debug, thiserror::Error)]
pub enum QueueError<E> {
    #[error("Request queue is full")]
    Full,

    #[error("Queue timeout")]
    QueueTimeout { waited: Duration },

    #[error("Request timeout")]
    RequestTimeout { after: Duration },

    /// Rejected while waiting by `clear_with_reason`.
    #[error("{0}")]
    Cleared(String),

    #[error("{0}")]
    Operation(E),
}

impl<E> QueueError<E> {
    /// Admission-level cause, or `None` for operation errors.
    pub fn reason(&self) -> Option<FailureReason> {
        match self {
            QueueError::Full => Some(FailureReason::QueueFull),
            QueueError::QueueTimeout { .. } => Some(FailureReason::QueueTimeout),
            QueueError::RequestTimeout { .. } => Some(FailureReason::RequestTimeout),
            QueueError::Cleared(_) => Some(FailureReason::QueueCleared),
            QueueError::Operation(_) => None,
        }
    }

    /// Canonical kind of an admission failure.
    ///
    /// Overload never shows up as `INTERNAL_ERROR`: a full queue is rate
    /// limiting, both timeouts are timeouts and a cleared queue means the
    /// service is going away.
    pub fn admission_code(&self) -> Option<ErrorCode> {
        self.reason().map(|reason| match reason {
            FailureReason::QueueFull => ErrorCode::RateLimited,
            FailureReason::QueueTimeout | FailureReason::RequestTimeout => ErrorCode::Timeout,
            FailureReason::QueueCleared => ErrorCode::ApiUnavailable,
        })
    }

    pub fn operation_error(&self) -> Option<&E> {
        match self {
            QueueError::Operation(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::full(QueueError::Full, "Request queue is full", ErrorCode::RateLimited)]
    #[case::queue_timeout(
        QueueError::QueueTimeout { waited: Duration::from_millis(5) },
        "Queue timeout",
        ErrorCode::Timeout
    )]
    #[case::request_timeout(
        QueueError::RequestTimeout { after: Duration::from_millis(5) },
        "Request timeout",
        ErrorCode::Timeout
    )]
    #[case::cleared(
        QueueError::Cleared("Shutting down".to_string()),
        "Shutting down",
        ErrorCode::ApiUnavailable
    )]
    fn admission_failures(
        #[case] err: QueueError<String>,
        #[case] message: &str,
        #[case] code: ErrorCode,
    ) {
        assert_eq!(err.to_string(), message);
        assert_eq!(err.admission_code(), Some(code));
        assert!(err.reason().is_some());
        assert!(err.operation_error().is_none());
    }

    #[test]
    fn operation_error_passes_through() {
        let err: QueueError<String> = QueueError::Operation("boom".to_string());
        assert_eq!(err.to_string(), "boom");
        assert_eq!(err.reason(), None);
        assert_eq!(err.admission_code(), None);
        assert_eq!(err.operation_error().map(String::as_str), Some("boom"));
    }
}
