//! Shared helpers for integration tests.

// Each integration test binary compiles this module and uses its own
// subset of the helpers.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use gilgamesh::auth::Credentials;
use gilgamesh::net::{Server, ServerConfig};
use gilgamesh::worker::WorkerConfig;

/// Start a mock origin that answers every connection with a fixed `200 OK`
/// response once the request head has arrived.
pub async fn start_mock_origin(body: &'static str) -> SocketAddr {
    start_origin_with(move |_| {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            body.len(),
            body
        )
    })
    .await
}

/// Start a mock origin that echoes the received request head back as the
/// response body. Useful for asserting what actually went upstream.
pub async fn start_echo_origin() -> SocketAddr {
    start_origin_with(|head| {
        format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            head.len(),
            head
        )
    })
    .await
}

async fn start_origin_with<F>(respond: F) -> SocketAddr
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let respond = Arc::new(respond);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let respond = Arc::clone(&respond);
                    tokio::spawn(async move {
                        let mut head = Vec::new();
                        let mut chunk = [0u8; 4096];
                        while !head.windows(4).any(|window| window == b"\r\n\r\n") {
                            match socket.read(&mut chunk).await {
                                Ok(0) | Err(_) => return,
                                Ok(n) => head.extend_from_slice(&chunk[..n]),
                            }
                        }
                        let head = String::from_utf8_lossy(&head).into_owned();
                        let _ = socket.write_all(respond(&head).as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Start the proxy on an ephemeral port and return its address.
pub async fn start_proxy(credentials: Credentials, pool_size: usize) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(Server::new(ServerConfig {
        pool_size,
        worker: WorkerConfig {
            credentials: Arc::new(credentials),
            ..WorkerConfig::default()
        },
        tls: None,
    }));
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    addr
}

/// Start a TLS-terminating proxy; returns its address and the server handle
/// so tests can swap certificates underneath it.
pub async fn start_tls_proxy(tls: Arc<rustls::ServerConfig>) -> (SocketAddr, Arc<Server>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::new(Server::new(ServerConfig {
        pool_size: 0,
        worker: WorkerConfig::default(),
        tls: Some(tls),
    }));
    let serving = Arc::clone(&server);
    tokio::spawn(async move {
        let _ = serving.serve_tls(listener).await;
    });
    (addr, server)
}

/// Read until the peer closes, tolerating a missing TLS close_notify.
pub async fn read_to_end_lossy<S>(stream: &mut S) -> String
where
    S: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => collected.extend_from_slice(&chunk[..n]),
        }
    }
    String::from_utf8_lossy(&collected).into_owned()
}

/// Read until the end of an HTTP head (`\r\n\r\n`) and return everything
/// received so far.
pub async fn read_head<S>(stream: &mut S) -> String
where
    S: AsyncRead + Unpin,
{
    let mut collected = Vec::new();
    let mut chunk = [0u8; 1024];
    while !collected.windows(4).any(|window| window == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).await.unwrap();
        assert!(n > 0, "connection closed before a complete response head");
        collected.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8_lossy(&collected).into_owned()
}

/// A throwaway self-signed identity for TLS tests.
pub fn self_signed_identity() -> gilgamesh::net::tls::Identity {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    gilgamesh::net::tls::Identity {
        certs: vec![cert.cert.der().clone()],
        key: rustls::pki_types::PrivateKeyDer::try_from(cert.key_pair.serialize_der()).unwrap(),
    }
}

/// The same identity as PEM files on disk, for loader-driven tests.
pub fn write_self_signed_pem(dir: &std::path::Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");
    std::fs::write(&cert_path, cert.cert.pem()).unwrap();
    std::fs::write(&key_path, cert.key_pair.serialize_pem()).unwrap();
    (cert_path, key_path)
}
