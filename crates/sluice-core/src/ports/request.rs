//! InboundRequest port - 呼び出し元 HTTP リクエストの抽象化
//!
//! The error layer only needs a handful of fields from the host framework's
//! request object. Anything that can answer these questions can be used to
//! build an `ErrorContext`.

use std::net::SocketAddr;

pub trait InboundRequest {
    /// Header value by case-insensitive name.
    fn header(&self, name: &str) -> Option<&str>;

    /// Request path (e.g. `/api/rewrite`).
    fn path(&self) -> Option<&str>;

    /// `requestId` field of the parsed body, if the framework parsed one.
    fn body_request_id(&self) -> Option<&str> {
        None
    }

    /// Socket peer address.
    fn remote_addr(&self) -> Option<SocketAddr> {
        None
    }
}
