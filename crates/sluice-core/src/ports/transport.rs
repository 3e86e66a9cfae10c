//! CompletionTransport port - 外部テキスト生成サービスへの送信
//!
//! The actual network call (provider SDK, HTTP client, auth) lives behind
//! this trait. The client only needs "send this payload, give me a status
//! and some text, or a fault".

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::Fault;

/// Outbound payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// What came back over the wire.
///
/// A non-2xx status or a missing/blank `text` is a failure; the client
/// turns both into faults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportResponse {
    pub status: u16,
    #[serde(default)]
    pub text: Option<String>,
}

impl TransportResponse {
    pub fn ok(text: impl Into<String>) -> Self {
        Self {
            status: 200,
            text: Some(text.into()),
        }
    }

    pub fn with_status(status: u16) -> Self {
        Self { status, text: None }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one completion request.
///
/// Transport-level failures (connection refused, DNS, provider exceptions)
/// are reported as `Err(Fault)`; HTTP-level failures may be reported either
/// way.
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<TransportResponse, Fault>;
}
