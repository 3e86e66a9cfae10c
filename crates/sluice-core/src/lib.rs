//! sluice-core
//!
//! Resilient client core for a rate-limited text completion service.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（fault, errors, attempt）
//! - **ports**: 抽象化レイヤー（CompletionTransport, JitterSource, Clock, InboundRequest）
//! - **impls**: ports の実装（SystemClock, ThreadRngJitter, ScriptedTransport など）
//! - **config**: 設定（QueueConfig, RetryConfig, ClientConfig, TOML / 環境変数）
//! - **queue**: 同時実行数制御（AdmissionQueue, QueueError）
//! - **retry**: 指数バックオフ付き再試行（Backoff, RetryOrchestrator）
//! - **classify**: エラー分類とサニタイズ（ErrorClassifier）
//! - **client**: 上記を組み合わせた ExternalServiceClient
//! - **observability**: キュー統計（QueueStats）
//!
//! # 処理の流れ
//! ```text
//! ExternalServiceClient::call
//!   -> AdmissionQueue::enqueue      (max_concurrent / max_queue_size / timeouts)
//!     -> RetryOrchestrator::execute (backoff + jitter)
//!       -> CompletionTransport::complete
//! failure -> ErrorClassifier -> ApiError
//! ```

pub mod classify;
pub mod client;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod retry;

pub use classify::ErrorClassifier;
pub use client::{CallResponse, Completion, ExternalServiceClient, build_prompt};
pub use config::{
    ClientConfig, ConfigError, QueueConfig, QueueConfigUpdate, RetryConfig, SluiceConfig,
};
pub use domain::{
    ApiError, ErrorCode, ErrorContext, FailureReason, Fault, InternalError, RetryAttempt,
    RetryResult, Severity,
};
pub use observability::QueueStats;
pub use queue::{AdmissionQueue, QueueError};
pub use retry::{Backoff, RetryOrchestrator};
