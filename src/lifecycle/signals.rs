//! Unix signal handling.

use tokio::signal::unix::{signal, SignalKind};

/// Resolve when SIGINT or SIGTERM is delivered.
pub async fn shutdown_signal() {
    let mut interrupt = signal(SignalKind::interrupt()).expect("failed installing SIGINT handler");
    let mut terminate = signal(SignalKind::terminate()).expect("failed installing SIGTERM handler");
    tokio::select! {
        _ = interrupt.recv() => {}
        _ = terminate.recv() => {}
    }
}
