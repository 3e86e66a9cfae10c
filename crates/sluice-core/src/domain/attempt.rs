//! Attempt history for retried operations.

use std::time::Duration;

use serde::Serialize;

use super::fault::Fault;

/// A single execution attempt.
///
/// Records how long we waited before running it and, if it failed, why.
/// This is the foundation of "explain why it took N tries".
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetryAttempt {
    /// 1-based.
    pub attempt_number: u32,

    /// Backoff actually waited before this attempt (zero for the first).
    #[serde(rename = "delay_ms", serialize_with = "as_millis")]
    pub delay: Duration,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<Fault>,
}

impl RetryAttempt {
    pub fn new(attempt_number: u32, delay: Duration) -> Self {
        Self {
            attempt_number,
            delay,
            error: None,
        }
    }
}

/// Result of a retried operation plus its full attempt history.
///
/// `attempts.len()` always equals the number of times the operation ran.
#[derive(Debug, Clone)]
pub struct RetryResult<T> {
    pub outcome: Result<T, Fault>,
    pub attempts: Vec<RetryAttempt>,
}

impl<T> RetryResult<T> {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn last_error(&self) -> Option<&Fault> {
        self.outcome.as_ref().err()
    }

    /// Total backoff time spent across all attempts.
    pub fn total_delay(&self) -> Duration {
        self.attempts.iter().map(|a| a.delay).sum()
    }

    pub fn into_result(self) -> Result<T, Fault> {
        self.outcome
    }
}

fn as_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}
