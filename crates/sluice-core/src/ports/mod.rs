//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は外部の協力者（テキスト生成サービス、乱数源、時計、
//! ホスト HTTP フレームワークのリクエスト）へのインターフェースです。

pub mod clock;
pub mod jitter;
pub mod request;
pub mod transport;

// 主要な trait を再エクスポート
pub use self::clock::Clock;
pub use self::jitter::JitterSource;
pub use self::request::InboundRequest;
pub use self::transport::{CompletionRequest, CompletionTransport, TransportResponse};
