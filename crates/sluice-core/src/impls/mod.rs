//! Impls - ports の実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **SystemClock / FixedClock**: Clock
//! - **ThreadRngJitter / FixedJitter / SequenceJitter**: JitterSource
//! - **RequestParts**: InboundRequest
//! - **ScriptedTransport / SimulatedTransport**: CompletionTransport
//!
//! 本番用の HTTP transport はホストアプリケーション側で実装します。

pub mod clock;
pub mod jitter;
pub mod request;
pub mod transport;

// 主要な型を再エクスポート
pub use self::clock::{FixedClock, SystemClock};
pub use self::jitter::{FixedJitter, SequenceJitter, ThreadRngJitter};
pub use self::request::RequestParts;
pub use self::transport::{ScriptedTransport, SimulatedTransport};
