//! Gilgamesh, a forward HTTP web proxy.
//!
//! The proxy accepts plain-TCP and TLS-terminated client connections,
//! optionally authenticates them with HTTP Basic credentials carried in the
//! `Proxy-Authorization` header, and either forwards plain HTTP requests to
//! their origin or establishes an opaque `CONNECT` tunnel. A line-protocol
//! management channel on a unix socket allows the TLS certificate to be
//! reloaded under live traffic.
//!
//! ```text
//!   client ──▶ net::Server ──▶ worker::Pool ──▶ worker::Worker ──▶ origin
//!                  ▲                                  │
//!                  │ update_tls_config                │ auth::Credentials
//!            admin::Manager ◀── TLS_RELOAD            ▼
//!                                               tunnel pump
//! ```

// Core subsystems
pub mod auth;
pub mod http;
pub mod net;
pub mod worker;

// Control surfaces
pub mod admin;
pub mod config;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;

pub use config::Config;
pub use net::{Server, ServerConfig};
