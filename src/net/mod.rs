//! Listener plumbing: accept loops and TLS termination.

pub mod server;
pub mod tls;

pub use server::{Server, ServerConfig};
