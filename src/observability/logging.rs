//! Structured logging.
//!
//! The whole crate logs through `tracing` with structured fields
//! (`worker_id`, `src`, `dst`, `user`, `listener`); this module only wires
//! up the global subscriber.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the global subscriber. Call once at process start; failure
/// to install it aborts the process.
pub fn init() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "gilgamesh=info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
