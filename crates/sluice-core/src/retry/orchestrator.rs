//! RetryOrchestrator - 一時的な失敗を指数バックオフで再試行
//!
//! One `execute` call drives one logical operation through at most
//! `max_retries + 1` attempts. Every attempt is recorded in the returned
//! [`RetryResult`], including the backoff waited before it.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use super::Backoff;
use crate::classify::ErrorClassifier;
use crate::config::{ConfigError, RetryConfig};
use crate::domain::{Fault, RetryAttempt, RetryResult};
use crate::impls::ThreadRngJitter;
use crate::ports::JitterSource;

#[derive(Clone)]
pub struct RetryOrchestrator {
    config: RetryConfig,
    backoff: Backoff,
    jitter: Arc<dyn JitterSource>,
}

impl fmt::Debug for RetryOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetryOrchestrator {
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            backoff: Backoff::from_config(&config),
            config,
            jitter: Arc::new(ThreadRngJitter),
        })
    }

    /// Replace the random source used for jitter.
    pub fn with_jitter(mut self, jitter: Arc<dyn JitterSource>) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Run `operation` until it succeeds, fails with a non-retryable fault,
    /// or the retry budget is spent.
    ///
    /// Never returns early with a partial history: the last attempt's fault
    /// is the outcome on failure.
    pub async fn execute<F, Fut, T>(&self, label: &str, mut operation: F) -> RetryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        let mut attempts = Vec::new();
        let mut attempt_number = 1u32;
        let mut delay = Duration::ZERO;

        loop {
            let mut attempt = RetryAttempt::new(attempt_number, delay);

            let fault = match self.run_attempt(&mut operation).await {
                Ok(value) => {
                    attempts.push(attempt);
                    if attempt_number > 1 {
                        debug!(label, attempts = attempt_number, "succeeded after retry");
                    }
                    return RetryResult {
                        outcome: Ok(value),
                        attempts,
                    };
                }
                Err(fault) => fault,
            };

            attempt.error = Some(fault.clone());
            attempts.push(attempt);

            if !ErrorClassifier::is_retryable(&fault, &self.config.retryable_error_codes) {
                debug!(label, error = %fault, "not retryable");
                return RetryResult {
                    outcome: Err(fault),
                    attempts,
                };
            }
            if attempt_number > self.config.max_retries {
                warn!(
                    label,
                    max_retries = self.config.max_retries,
                    error = %fault,
                    "retries exhausted"
                );
                return RetryResult {
                    outcome: Err(fault),
                    attempts,
                };
            }

            delay = self.backoff.delay_for(attempt_number, self.jitter.sample());
            warn!(
                delay_ms = delay.as_millis() as u64,
                error = %fault,
                "Retry attempt {}/{} for {}",
                attempt_number,
                self.config.max_retries,
                label
            );
            tokio::time::sleep(delay).await;
            attempt_number += 1;
        }
    }

    async fn run_attempt<F, Fut, T>(&self, operation: &mut F) -> Result<T, Fault>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Fault>>,
    {
        match self.config.timeout {
            Some(limit) => tokio::time::timeout(limit, operation())
                .await
                .unwrap_or_else(|_| Err(Fault::timed_out(limit.as_millis()))),
            None => operation().await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorCode;
    use crate::impls::{FixedJitter, SequenceJitter};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_retries: u32, base_ms: u64, jitter_factor: f64) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay: Duration::from_millis(base_ms),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(10_000),
            jitter_factor,
            timeout: None,
            ..RetryConfig::default()
        }
    }

    fn orchestrator(config: RetryConfig) -> RetryOrchestrator {
        RetryOrchestrator::new(config)
            .unwrap()
            .with_jitter(Arc::new(FixedJitter(0.5)))
    }

    fn delays(result: &RetryResult<impl Sized>) -> Vec<u64> {
        result
            .attempts
            .iter()
            .map(|a| a.delay.as_millis() as u64)
            .collect()
    }

    #[test]
    fn rejects_invalid_config() {
        let err = RetryOrchestrator::new(RetryConfig {
            backoff_multiplier: 1.0,
            ..RetryConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[tokio::test]
    async fn first_try_success_has_single_clean_attempt() {
        let retry = orchestrator(config(3, 100, 0.0));
        let result = retry.execute("ok", || async { Ok::<_, Fault>(42) }).await;

        assert!(result.is_success());
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.attempts[0].attempt_number, 1);
        assert_eq!(result.attempts[0].delay, Duration::ZERO);
        assert!(result.attempts[0].error.is_none());
        assert_eq!(result.into_result().unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limited_twice_then_success() {
        let retry = orchestrator(config(2, 100, 0.0));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let started = tokio::time::Instant::now();
        let result = retry
            .execute("rewrite", move || async move {
                match calls.fetch_add(1, Ordering::SeqCst) {
                    0 | 1 => Err(Fault::status(429)),
                    _ => Ok("done"),
                }
            })
            .await;

        assert!(result.is_success());
        assert_eq!(result.attempts.len(), 3);
        assert_eq!(delays(&result), vec![0, 100, 200]);
        assert_eq!(result.attempts[1].error.as_ref().and_then(|f| f.status), Some(429));
        assert!(result.attempts[2].error.is_none());
        assert_eq!(started.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_runs_max_retries_plus_one() {
        let mut cfg = config(3, 100, 0.1);
        cfg.max_delay = Duration::from_millis(250);
        let retry = RetryOrchestrator::new(cfg)
            .unwrap()
            .with_jitter(Arc::new(SequenceJitter::new([0.0, 1.0, 0.5])));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = retry
            .execute("always 503", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Fault::status(503))
            })
            .await;

        assert!(!result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(result.attempts.len(), 4);
        // 100 -10%, 200 +10%, min(400, 250) unchanged
        assert_eq!(delays(&result), vec![0, 90, 220, 250]);
        assert!(result.attempts.iter().all(|a| a.error.is_some()));
        assert_eq!(result.last_error().and_then(|f| f.status), Some(503));
    }

    #[tokio::test(start_paused = true)]
    async fn random_jitter_stays_within_band() {
        let retry = RetryOrchestrator::new(config(4, 100, 0.1)).unwrap();
        let result = retry
            .execute("flaky", || async { Err::<(), _>(Fault::code("ECONNRESET")) })
            .await;

        assert_eq!(result.attempts.len(), 5);
        for (attempt, nominal) in result.attempts.iter().skip(1).zip([100.0, 200.0, 400.0, 800.0]) {
            let ms = attempt.delay.as_millis() as f64;
            assert!(ms >= nominal * 0.9 - 1.0 && ms <= nominal * 1.1 + 1.0, "{ms} vs {nominal}");
        }
    }

    #[tokio::test]
    async fn bad_request_is_not_retried() {
        let retry = orchestrator(config(3, 100, 0.0));
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = retry
            .execute("bad", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Fault::status(400))
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.attempts.len(), 1);
        assert_eq!(result.last_error().and_then(|f| f.status), Some(400));
    }

    #[tokio::test]
    async fn zero_retries_means_single_attempt() {
        let retry = orchestrator(config(0, 100, 0.0));
        let result = retry
            .execute("once", || async { Err::<(), _>(Fault::status(503)) })
            .await;
        assert_eq!(result.attempts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn attempt_timeout_becomes_retryable_fault() {
        let mut cfg = config(1, 10, 0.0);
        cfg.timeout = Some(Duration::from_millis(50));
        let retry = orchestrator(cfg);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let result = retry
            .execute("slow once", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                    Ok::<_, Fault>(n)
                }
            })
            .await;

        assert_eq!(result.attempts.len(), 2);
        let first = result.attempts[0].error.as_ref().unwrap();
        assert_eq!(first.name.as_deref(), Some("TimeoutError"));
        assert_eq!(first.code.as_deref(), Some("ETIMEDOUT"));
        assert_eq!(result.into_result().unwrap(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn unclassified_faults_need_allow_list() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let op = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Fault::new("odd failure"))
        };

        let default_retry = orchestrator(config(2, 10, 0.0));
        default_retry.execute("odd", op).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let mut cfg = config(2, 10, 0.0);
        cfg.retryable_error_codes = vec![ErrorCode::InternalError];
        let opted_in = orchestrator(cfg);
        calls.store(0, Ordering::SeqCst);
        opted_in.execute("odd", op).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_failures_ignore_allow_list() {
        let mut cfg = config(3, 10, 0.0);
        cfg.retryable_error_codes = ErrorCode::ALL.to_vec();
        let retry = orchestrator(cfg);

        let result = retry
            .execute("denied", || async { Err::<(), _>(Fault::status(401)) })
            .await;
        assert_eq!(result.attempts.len(), 1);
    }
}
