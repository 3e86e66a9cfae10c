//! RequestParts - フレームワーク非依存のリクエスト表現
//!
//! Host frameworks can copy the few fields we need into `RequestParts`
//! instead of implementing `InboundRequest` themselves.

use std::collections::HashMap;
use std::net::SocketAddr;

use crate::ports::InboundRequest;

#[derive(Debug, Clone, Default)]
pub struct RequestParts {
    /// Lower-cased header names.
    headers: HashMap<String, String>,
    path: Option<String>,
    body_request_id: Option<String>,
    remote_addr: Option<SocketAddr>,
}

impl RequestParts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn body_request_id(mut self, id: impl Into<String>) -> Self {
        self.body_request_id = Some(id.into());
        self
    }

    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

impl InboundRequest for RequestParts {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    fn body_request_id(&self) -> Option<&str> {
        self.body_request_id.as_deref()
    }

    fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}
