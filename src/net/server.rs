//! TCP and TLS accept loops.
//!
//! # Responsibilities
//! - Accept peer connections and dispatch each to a pooled worker on its
//!   own task
//! - Terminate TLS on configured listeners using the currently installed
//!   configuration
//! - Hold the TLS configuration in an atomic slot: wait-free load on every
//!   accept, atomic store from the management path
//!
//! An update to the slot becomes visible to all subsequent accepts;
//! in-flight handshakes and live connections keep the configuration they
//! started with.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info};

use crate::worker::{Pool, WorkerConfig};

/// Server construction parameters.
pub struct ServerConfig {
    /// `0` selects the elastic worker pool; positive values preallocate
    /// exactly that many workers.
    pub pool_size: usize,
    pub worker: WorkerConfig,
    /// Initial TLS configuration; absent when no TLS listener is configured.
    pub tls: Option<Arc<rustls::ServerConfig>>,
}

pub struct Server {
    pool: Arc<Pool>,
    tls_config: ArcSwapOption<rustls::ServerConfig>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            pool: Arc::new(Pool::new(config.pool_size, config.worker)),
            tls_config: ArcSwapOption::from(config.tls),
        }
    }

    /// Accept loop for a plain-TCP listener. Runs until the listener fails
    /// (typically because it was closed) and propagates that error.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        self.serve_listener(listener, false).await
    }

    /// Accept loop for a TLS listener. The handshake for each connection
    /// uses the configuration installed at accept time.
    pub async fn serve_tls(&self, listener: TcpListener) -> io::Result<()> {
        self.serve_listener(listener, true).await
    }

    /// Install a new TLS configuration. Subsequent accepts observe it.
    pub fn update_tls_config(&self, config: Arc<rustls::ServerConfig>) {
        self.tls_config.store(Some(config));
    }

    /// The currently installed TLS configuration, if any.
    pub fn tls_config(&self) -> Option<Arc<rustls::ServerConfig>> {
        self.tls_config.load_full()
    }

    pub fn close(&self) {
        self.pool.close();
    }

    async fn serve_listener(&self, listener: TcpListener, is_tls: bool) -> io::Result<()> {
        let local_addr = listener.local_addr()?;
        info!(listener = %local_addr, tls = is_tls, "proxy service started");
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    info!(listener = %local_addr, "proxy service stopped");
                    return Err(err);
                }
            };
            debug!(src = %peer_addr, "connection accepted");

            let pool = Arc::clone(&self.pool);
            if !is_tls {
                tokio::spawn(dispatch(pool, stream, peer_addr));
                continue;
            }
            // Wait-free load; each accept pins the configuration its
            // handshake will use.
            let Some(tls_config) = self.tls_config.load_full() else {
                error!(src = %peer_addr, "no TLS configuration installed");
                continue;
            };
            tokio::spawn(async move {
                let acceptor = TlsAcceptor::from(tls_config);
                match acceptor.accept(stream).await {
                    Ok(tls_stream) => dispatch(pool, tls_stream, peer_addr).await,
                    Err(err) => error!(src = %peer_addr, error = %err, "TLS handshake failed"),
                }
            });
        }
    }
}

/// Serve one connection on a worker drawn from the pool, then recycle it.
async fn dispatch<S>(pool: Arc<Pool>, stream: S, peer_addr: SocketAddr)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut worker = pool.get().await;
    worker.serve_conn(stream, peer_addr).await;
    pool.put(worker);
}
