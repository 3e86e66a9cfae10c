//! Retry module: backoff computation and the retry loop.

mod backoff;
mod orchestrator;

pub use backoff::Backoff;
pub use orchestrator::RetryOrchestrator;
