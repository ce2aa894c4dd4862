//! HTTP/1.1 wire grammar for the proxy path.
//!
//! Only the subset the proxy needs: reading a request head off a peer
//! connection, rewriting it toward the upstream, and emitting minimal
//! status-line responses. Everything after the first request head is opaque
//! tunneled bytes.

pub mod request;
pub mod response;

pub use request::{read_head, split_host_port, RequestHead};
pub use response::ProxyResponse;
