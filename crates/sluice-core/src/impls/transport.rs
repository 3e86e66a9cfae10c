//! CompletionTransport 実装（開発用・テスト用）
//!
//! - **ScriptedTransport**: 事前に決めた応答を順番に返す（テスト用）
//! - **SimulatedTransport**: 遅延と失敗率を持つ擬似サービス（CLI デモ用）

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::domain::Fault;
use crate::ports::{CompletionRequest, CompletionTransport, TransportResponse};

type Scripted = Result<TransportResponse, Fault>;

/// Replays a fixed script of responses, then repeats the fallback.
///
/// Every request is recorded so tests can assert on the payload.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    fallback: Scripted,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Scripted>, fallback: Scripted) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answers with `text`.
    pub fn always_ok(text: impl Into<String>) -> Self {
        Self::new([], Ok(TransportResponse::ok(text)))
    }

    /// Always fails with `fault`.
    pub fn always_failing(fault: Fault) -> Self {
        Self::new([], Err(fault))
    }

    /// Sleep before answering each call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl CompletionTransport for ScriptedTransport {
    async fn complete(&self, request: &CompletionRequest) -> Result<TransportResponse, Fault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());

        let next = self
            .script
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        next
    }
}

/// Pretends to be a slow, flaky provider.
///
/// Each call sleeps `latency` and then fails with a random transient fault
/// (429, 503 or `ECONNRESET`) with probability `fail_rate`.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    latency: Duration,
    fail_rate: f64,
}

impl SimulatedTransport {
    pub fn new(latency: Duration, fail_rate: f64) -> Self {
        Self {
            latency,
            fail_rate: if fail_rate.is_nan() {
                0.0
            } else {
                fail_rate.clamp(0.0, 1.0)
            },
        }
    }
}

#[async_trait]
impl CompletionTransport for SimulatedTransport {
    async fn complete(&self, request: &CompletionRequest) -> Result<TransportResponse, Fault> {
        tokio::time::sleep(self.latency).await;

        // rng は await を跨がないようにブロック内で閉じる
        let (fails, pick) = {
            let mut rng = rand::thread_rng();
            (rng.gen_bool(self.fail_rate), rng.gen_range(0..3u8))
        };
        if !fails {
            let words = request.prompt.split_whitespace().count();
            return Ok(TransportResponse::ok(format!(
                "[{}] rewrote {words} words",
                request.model
            )));
        }
        match pick {
            0 => Ok(TransportResponse::with_status(429)),
            1 => Ok(TransportResponse::with_status(503)),
            _ => Err(Fault::code("ECONNRESET")),
        }
    }
}
