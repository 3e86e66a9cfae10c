//! AdmissionQueue - 同時実行数の上限と FIFO 待ち行列
//!
//! Operations run immediately while fewer than `max_concurrent` are active.
//! Otherwise they wait in FIFO order, bounded both in count
//! (`max_queue_size`) and in time (`queue_timeout`). A running operation is
//! bounded by `request_timeout`.
//!
//! # 状態の一貫性
//! - counters, wait list and config live behind one `std::sync::Mutex`
//! - the lock is never held across an `.await`
//! - a waiter is settled exactly once: promoted, timed out, cleared or
//!   abandoned. Promotion and clear send on the waiter's oneshot while holding
//!   the lock, so a timed-out waiter that is no longer listed always finds the
//!   verdict in its receiver.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::QueueError;
use crate::config::{ConfigError, QueueConfig, QueueConfigUpdate};
use crate::observability::QueueStats;

const DEFAULT_CLEAR_REASON: &str = "Queue cleared";

/// Verdict delivered to a waiter.
#[derive(Debug)]
enum Admission {
    /// A slot was reserved for the waiter (`active` already incremented).
    Promoted,
    Rejected(String),
}

struct Waiter {
    ticket: u64,
    label: String,
    enqueued_at: Instant,
    slot: oneshot::Sender<Admission>,
}

struct AdmissionState {
    config: QueueConfig,
    active: usize,
    waiting: VecDeque<Waiter>,
    next_ticket: u64,
    total_processed: u64,
    total_errors: u64,
    average_processing_ms: f64,
}

impl AdmissionState {
    fn new(config: QueueConfig) -> Self {
        Self {
            config,
            active: 0,
            waiting: VecDeque::new(),
            next_ticket: 1,
            total_processed: 0,
            total_errors: 0,
            average_processing_ms: 0.0,
        }
    }

    /// Hand free slots to the head of the wait list.
    fn promote_waiters(&mut self) {
        while self.active < self.config.max_concurrent {
            let Some(waiter) = self.waiting.pop_front() else {
                break;
            };
            // 受信側が既に drop されていれば次の waiter へ
            if waiter.slot.send(Admission::Promoted).is_ok() {
                self.active += 1;
                debug!(
                    label = %waiter.label,
                    waited_ms = waiter.enqueued_at.elapsed().as_millis() as u64,
                    "promoted from queue"
                );
            }
        }
    }

    fn remove_waiter(&mut self, ticket: u64) -> bool {
        match self.waiting.iter().position(|w| w.ticket == ticket) {
            Some(index) => {
                self.waiting.remove(index);
                true
            }
            None => false,
        }
    }

    fn release(&mut self) {
        self.active = self.active.saturating_sub(1);
        self.promote_waiters();
    }

    fn record(&mut self, elapsed_ms: f64, failed: bool) {
        self.total_processed += 1;
        if failed {
            self.total_errors += 1;
        }
        self.average_processing_ms +=
            (elapsed_ms - self.average_processing_ms) / self.total_processed as f64;
    }

    fn stats(&self) -> QueueStats {
        QueueStats {
            active_requests: self.active,
            queued_requests: self.waiting.len(),
            total_processed: self.total_processed,
            total_errors: self.total_errors,
            average_processing_ms: self.average_processing_ms,
        }
    }
}

struct Shared {
    state: Mutex<AdmissionState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, AdmissionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Bounded-concurrency gate with a bounded FIFO wait list.
///
/// Cloning is cheap and clones share the same state.
#[derive(Clone)]
pub struct AdmissionQueue {
    shared: Arc<Shared>,
}

impl fmt::Debug for AdmissionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionQueue")
            .field("stats", &self.stats())
            .finish()
    }
}

enum Entry {
    Run,
    Full,
    Wait {
        ticket: u64,
        rx: oneshot::Receiver<Admission>,
        queue_timeout: Duration,
    },
}

impl AdmissionQueue {
    pub fn new(config: QueueConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(AdmissionState::new(config)),
            }),
        })
    }

    /// Run `operation` once a slot is free.
    ///
    /// The closure is only invoked after admission, so a rejected or
    /// timed-out entry never starts any work. Dropping the returned future
    /// releases whatever the entry holds (wait list position or slot).
    pub async fn enqueue<F, Fut, T, E>(
        &self,
        label: &str,
        operation: F,
    ) -> Result<T, QueueError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let entry = {
            let mut state = self.shared.lock();
            if state.active < state.config.max_concurrent {
                state.active += 1;
                Entry::Run
            } else if state.waiting.len() >= state.config.max_queue_size {
                Entry::Full
            } else {
                let ticket = state.next_ticket;
                state.next_ticket += 1;
                let (tx, rx) = oneshot::channel();
                state.waiting.push_back(Waiter {
                    ticket,
                    label: label.to_string(),
                    enqueued_at: Instant::now(),
                    slot: tx,
                });
                debug!(label, queued = state.waiting.len(), "waiting for a slot");
                Entry::Wait {
                    ticket,
                    rx,
                    queue_timeout: state.config.queue_timeout,
                }
            }
        };

        match entry {
            Entry::Run => {}
            Entry::Full => {
                warn!(label, "request queue is full");
                return Err(QueueError::Full);
            }
            Entry::Wait {
                ticket,
                rx,
                queue_timeout,
            } => {
                let mut pending = PendingEntry {
                    shared: &self.shared,
                    ticket,
                    rx,
                    settled: false,
                };
                pending.wait(label, queue_timeout).await?;
            }
        }

        self.run(label, operation).await
    }

    async fn run<F, Fut, T, E>(&self, label: &str, operation: F) -> Result<T, QueueError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let request_timeout = self.shared.lock().config.request_timeout;
        let slot = ActiveSlot {
            shared: &self.shared,
            label,
            started: Instant::now(),
            finished: false,
        };

        match tokio::time::timeout(request_timeout, operation()).await {
            Ok(Ok(value)) => {
                slot.finish(None);
                Ok(value)
            }
            Ok(Err(e)) => {
                slot.finish(Some(&e.to_string()));
                Err(QueueError::Operation(e))
            }
            Err(_elapsed) => {
                slot.finish(Some("Request timeout"));
                Err(QueueError::RequestTimeout {
                    after: request_timeout,
                })
            }
        }
    }

    /// Reject every waiter with "Queue cleared". Running operations are not
    /// touched.
    pub fn clear(&self) -> usize {
        self.clear_with_reason(DEFAULT_CLEAR_REASON)
    }

    /// Reject every waiter with `reason` and return how many were rejected.
    pub fn clear_with_reason(&self, reason: &str) -> usize {
        let mut state = self.shared.lock();
        let mut rejected = 0;
        for waiter in state.waiting.drain(..) {
            if waiter.slot.send(Admission::Rejected(reason.to_string())).is_ok() {
                rejected += 1;
            }
        }
        if rejected > 0 {
            info!(rejected, reason, "queue cleared");
        }
        rejected
    }

    pub fn stats(&self) -> QueueStats {
        self.shared.lock().stats()
    }

    pub fn config(&self) -> QueueConfig {
        self.shared.lock().config.clone()
    }

    /// Merge `update` into the current config.
    ///
    /// An invalid result is rejected and the old config stays in place.
    /// Raising `max_concurrent` promotes waiters right away. Lowering
    /// `max_queue_size` only affects new arrivals.
    pub fn update_config(&self, update: QueueConfigUpdate) -> Result<(), ConfigError> {
        let mut state = self.shared.lock();
        let next = state.config.merged(&update);
        next.validate()?;
        info!(
            max_concurrent = next.max_concurrent,
            max_queue_size = next.max_queue_size,
            request_timeout_ms = next.request_timeout.as_millis() as u64,
            queue_timeout_ms = next.queue_timeout.as_millis() as u64,
            "queue config updated"
        );
        state.config = next;
        state.promote_waiters();
        Ok(())
    }

    /// Healthy unless the queue is over 90% occupied, more than half of all
    /// processed operations failed, or operations take on average more than
    /// 90% of the request timeout.
    pub fn is_healthy(&self) -> bool {
        let state = self.shared.lock();
        let stats = state.stats();
        let capacity = (state.config.max_concurrent + state.config.max_queue_size) as f64;
        let occupancy = (stats.active_requests + stats.queued_requests) as f64 / capacity;
        let slow_threshold_ms = state.config.request_timeout.as_secs_f64() * 1000.0 * 0.9;

        occupancy <= 0.9
            && !(stats.total_processed > 0 && stats.error_rate() > 0.5)
            && stats.average_processing_ms <= slow_threshold_ms
    }
}

/// A waiter's place in line. Dropping it unsettled gives the place back.
struct PendingEntry<'a> {
    shared: &'a Shared,
    ticket: u64,
    rx: oneshot::Receiver<Admission>,
    settled: bool,
}

impl PendingEntry<'_> {
    /// Wait for promotion. On success the caller owns one active slot.
    async fn wait<E>(&mut self, label: &str, queue_timeout: Duration) -> Result<(), QueueError<E>> {
        let started = Instant::now();
        let verdict = match tokio::time::timeout(queue_timeout, &mut self.rx).await {
            Ok(Ok(admission)) => Some(admission),
            Ok(Err(_closed)) => Some(Admission::Rejected(DEFAULT_CLEAR_REASON.to_string())),
            Err(_elapsed) => self.expire(),
        };
        self.settled = true;

        match verdict {
            Some(Admission::Promoted) => Ok(()),
            Some(Admission::Rejected(reason)) => Err(QueueError::Cleared(reason)),
            None => {
                warn!(
                    label,
                    queue_timeout_ms = queue_timeout.as_millis() as u64,
                    "queue timeout"
                );
                Err(QueueError::QueueTimeout {
                    waited: started.elapsed(),
                })
            }
        }
    }

    /// Settle a timed-out wait. `None` means we removed ourselves; otherwise
    /// the verdict won the race and is returned.
    fn expire(&mut self) -> Option<Admission> {
        let mut state = self.shared.lock();
        if state.remove_waiter(self.ticket) {
            return None;
        }
        // 一覧に無い = lock 下で既に送信済み
        self.rx.try_recv().ok()
    }
}

impl Drop for PendingEntry<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        let mut state = self.shared.lock();
        if state.remove_waiter(self.ticket) {
            return;
        }
        if let Ok(Admission::Promoted) = self.rx.try_recv() {
            state.release();
        }
    }
}

/// One reserved concurrency slot.
///
/// `finish` records the outcome. Dropping without `finish` (the caller gave
/// up mid-flight) frees the slot without touching the counters.
struct ActiveSlot<'a> {
    shared: &'a Shared,
    label: &'a str,
    started: Instant,
    finished: bool,
}

impl ActiveSlot<'_> {
    fn finish(mut self, failure: Option<&str>) {
        self.finished = true;
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;

        let mut state = self.shared.lock();
        state.record(elapsed_ms, failure.is_some());
        state.release();
        drop(state);

        match failure {
            None => info!(label = self.label, elapsed_ms = elapsed_ms as u64, "request completed"),
            Some(reason) => error!(
                label = self.label,
                elapsed_ms = elapsed_ms as u64,
                error = reason,
                "request failed"
            ),
        }
    }
}

impl Drop for ActiveSlot<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        debug!(label = self.label, "request abandoned by caller");
        self.shared.lock().release();
    }
}
