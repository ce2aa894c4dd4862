//! Per-connection proxy state machine.
//!
//! # Responsibilities
//! - Parse one HTTP/1.1 request head off the peer connection
//! - Enforce HTTP Basic authentication against the shared credentials store
//! - Dial the origin and hand off the first request (rewritten for plain
//!   HTTP, acknowledged with `200 OK` for `CONNECT`)
//! - Pump bytes in both directions until either side closes
//!
//! A worker serves one connection at a time; exclusivity is enforced by
//! ownership, since the pool hands the worker out by value and takes it
//! back when the serving task finishes. Its buffers are reused across
//! connections.

pub mod pool;

pub use pool::Pool;

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use base64::Engine as _;
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, error, field, info, info_span, Instrument, Span};

use crate::auth::Credentials;
use crate::http::{self, ProxyResponse, RequestHead};

/// Floor for both scratch buffers; configured sizes are clamped up to this.
pub const MIN_BUFFER_SIZE: usize = 512;

/// Upstream dial timeout.
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(30);

const AUTH_HEADER: &str = "Proxy-Authorization";
const AUTH_SCHEME_PREFIX: &str = "Basic ";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Construction parameters shared by every worker in a pool.
#[derive(Clone)]
pub struct WorkerConfig {
    pub read_buffer_size: usize,
    pub write_buffer_size: usize,
    pub dial_timeout: Duration,
    pub credentials: Arc<Credentials>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            read_buffer_size: MIN_BUFFER_SIZE,
            write_buffer_size: MIN_BUFFER_SIZE,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            credentials: Arc::new(Credentials::new()),
        }
    }
}

/// A reusable proxy agent. All four buffers survive across connections;
/// serving only resets their lengths, never their capacity.
pub struct Worker {
    id: u64,
    head_buf: BytesMut,
    forward_buf: Vec<u8>,
    peer_buf: Vec<u8>,
    tunnel_buf: Vec<u8>,
    credentials: Arc<Credentials>,
    dial_timeout: Duration,
}

impl Worker {
    pub fn new(config: &WorkerConfig) -> Self {
        let read_size = config.read_buffer_size.max(MIN_BUFFER_SIZE);
        let write_size = config.write_buffer_size.max(MIN_BUFFER_SIZE);
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            head_buf: BytesMut::with_capacity(read_size),
            forward_buf: Vec::with_capacity(write_size),
            peer_buf: vec![0; read_size],
            tunnel_buf: vec![0; read_size],
            credentials: Arc::clone(&config.credentials),
            dial_timeout: config.dial_timeout,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Serve a single peer connection to completion. Nothing propagates to
    /// the caller: failures either surface to the client as an HTTP status
    /// or are logged and the connection dropped.
    pub async fn serve_conn<S>(&mut self, stream: S, peer_addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let span = info_span!(
            "proxy",
            worker_id = self.id,
            src = %peer_addr,
            user = field::Empty,
            dst = field::Empty,
        );
        self.serve_inner(stream).instrument(span).await
    }

    async fn serve_inner<S>(&mut self, mut stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        self.head_buf.clear();
        let (head, head_len) = match http::read_head(&mut stream, &mut self.head_buf).await {
            Ok(parsed) => parsed,
            Err(err) => {
                error!(error = %err, "malformed HTTP request");
                return;
            }
        };
        // Bytes past the head already read off the wire: request body,
        // pipelined requests, or an early TLS record after CONNECT. Copied
        // out rather than split off so head_buf keeps its capacity for the
        // next connection.
        let leftover = self.head_buf[head_len..].to_vec();
        self.head_buf.truncate(head_len);

        match self.open_tunnel(&head).await {
            Ok(upstream) => self.relay(stream, upstream, &head, leftover).await,
            Err(response) => {
                if let Err(err) = response.write(&mut stream, head.minor_version).await {
                    error!(error = %err, "failed writing response");
                }
            }
        }
        info!("closing connection");
    }

    /// AuthCheck → ResolveTarget → Dial. An `Err` carries the response the
    /// peer gets before the connection closes.
    async fn open_tunnel(&self, head: &RequestHead) -> Result<TcpStream, ProxyResponse> {
        if !self.credentials.is_empty() {
            self.authorize(head).await?;
        }

        let authority = match head.host().or_else(|| head.target_authority()) {
            Some(authority) => authority,
            None => {
                error!(target = %head.target, "request carries no target host");
                return Err(ProxyResponse::Status(400));
            }
        };
        let (host, port) = http::split_host_port(authority, 80);
        let hostport = format!("{host}:{port}");
        Span::current().record("dst", hostport.as_str());
        info!("opening proxy connection");

        match tokio::time::timeout(self.dial_timeout, TcpStream::connect(&hostport)).await {
            Ok(Ok(upstream)) => Ok(upstream),
            Ok(Err(err)) => {
                error!(error = %err, "upstream dial failed");
                Err(ProxyResponse::Status(502))
            }
            Err(_) => {
                error!("upstream dial timed out");
                Err(ProxyResponse::Status(502))
            }
        }
    }

    async fn authorize(&self, head: &RequestHead) -> Result<(), ProxyResponse> {
        let value = match head.header(AUTH_HEADER) {
            Some(value) if value.starts_with(AUTH_SCHEME_PREFIX) => {
                &value[AUTH_SCHEME_PREFIX.len()..]
            }
            _ => return Err(ProxyResponse::AuthChallenge),
        };

        // The URL-safe alphabet is canonical here; the standard alphabet is
        // accepted as well for interoperability with stock HTTP clients.
        let decoded = match URL_SAFE.decode(value).or_else(|_| STANDARD.decode(value)) {
            Ok(decoded) => decoded,
            Err(err) => {
                error!(error = %err, "malformed authorization header");
                return Err(ProxyResponse::Status(400));
            }
        };
        let decoded = String::from_utf8_lossy(&decoded).into_owned();
        let Some((username, password)) = decoded.split_once(':') else {
            error!("authorization header carries no credential pair");
            return Err(ProxyResponse::Status(403));
        };
        Span::current().record("user", username);

        let Some(hash) = self.credentials.get(username) else {
            error!("username not found");
            return Err(ProxyResponse::Status(403));
        };

        // bcrypt verification is CPU-bound; keep it off the I/O threads.
        let hash = hash.clone();
        let password = password.to_string();
        let verified = tokio::task::spawn_blocking(move || hash.verify(&password))
            .await
            .unwrap_or(false);
        if !verified {
            error!("password mismatch");
            return Err(ProxyResponse::Status(403));
        }
        Ok(())
    }

    /// InitialHandoff → Tunnel. Consumes both connections; dropping them on
    /// return closes both sides, which is what unblocks the slower pump
    /// direction.
    async fn relay<S>(
        &mut self,
        peer: S,
        mut upstream: TcpStream,
        head: &RequestHead,
        leftover: Vec<u8>,
    ) where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        let mut peer = peer;
        let handoff: io::Result<()> = async {
            if head.is_connect() {
                // The CONNECT request itself is not forwarded upstream.
                let ok = format!("HTTP/1.{} 200 OK\r\n\r\n", head.minor_version);
                peer.write_all(ok.as_bytes()).await?;
                peer.flush().await?;
            } else {
                self.forward_buf.clear();
                head.write_forward(&mut self.forward_buf);
                upstream.write_all(&self.forward_buf).await?;
            }
            if !leftover.is_empty() {
                upstream.write_all(&leftover).await?;
            }
            upstream.flush().await?;
            Ok(())
        }
        .await;
        if let Err(err) = handoff {
            error!(error = %err, "tunnel handoff failed");
            return;
        }
        debug!("tunnel established");

        let (mut peer_read, mut peer_write) = tokio::io::split(peer);
        let (mut upstream_read, mut upstream_write) = upstream.split();
        let peer_buf = &mut self.peer_buf;
        let tunnel_buf = &mut self.tunnel_buf;

        let peer_to_upstream = async {
            loop {
                let n = peer_read.read(peer_buf.as_mut_slice()).await?;
                if n == 0 {
                    return Ok::<_, io::Error>(());
                }
                upstream_write.write_all(&peer_buf[..n]).await?;
                upstream_write.flush().await?;
            }
        };
        let upstream_to_peer = async {
            loop {
                let n = upstream_read.read(tunnel_buf.as_mut_slice()).await?;
                if n == 0 {
                    return Ok::<_, io::Error>(());
                }
                peer_write.write_all(&tunnel_buf[..n]).await?;
                peer_write.flush().await?;
            }
        };

        // Whichever direction finishes first wins the race; the loser is
        // dropped here and both connections close on return.
        let result = tokio::select! {
            result = peer_to_upstream => result,
            result = upstream_to_peer => result,
        };
        if let Err(err) = result {
            error!(error = %err, "tunnel error");
        }
    }
}
