//! Out-of-band management channel.
//!
//! A line-oriented request/response protocol, typically bound to a unix
//! domain socket:
//!
//! ```text
//! <COMMAND> [arg1 arg2 ...]\r\n
//! ```
//!
//! answered with `OK\r\n` on success or `ERROR <message>\r\n` on failure.
//! A peer that closes before sending a full line gets no response. The only
//! command today is `TLS_RELOAD`, which reruns the certificate loader and
//! installs the result into the server's TLS slot.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;
use tracing::{error, info};

use crate::net::tls::{self, Identity, TlsError};
use crate::net::Server;

const COMMAND_TLS_RELOAD: &str = "TLS_RELOAD";

/// Certificate loader invoked by `TLS_RELOAD`. Must be safe to call again
/// for every reload; this channel itself never calls it concurrently.
pub type LoadCertificate = Box<dyn Fn() -> Result<Identity, TlsError> + Send + Sync>;

pub struct ManagerConfig {
    pub server: Arc<Server>,
    pub load_certificate: LoadCertificate,
}

/// The management channel endpoint.
pub struct Manager {
    server: Arc<Server>,
    load_certificate: LoadCertificate,
}

impl Manager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            server: config.server,
            load_certificate: config.load_certificate,
        }
    }

    /// Accept loop. Connections are handled strictly in order; runs until
    /// the listener fails and propagates that error.
    pub async fn serve(&self, listener: UnixListener) -> io::Result<()> {
        info!(domain = "manager", "management channel started");
        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    info!(domain = "manager", "management channel stopped");
                    return Err(err);
                }
            };
            self.serve_conn(stream).await;
        }
    }

    /// Handle a single management connection: one command line in, one
    /// response line out.
    pub async fn serve_conn<S>(&self, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            // Peer closed before sending a command; no response owed.
            Ok(0) => return,
            Ok(_) => {}
            Err(err) => {
                error!(domain = "manager", error = %err, "read error");
                return;
            }
        }

        let line = line.trim_end_matches(['\r', '\n']);
        let mut tokens = line.split(' ');
        let command = tokens.next().unwrap_or("");
        let args: Vec<&str> = tokens.collect();
        info!(domain = "manager", command, ?args, "command received");

        let response = match self.dispatch(command) {
            Ok(()) => "OK\r\n".to_string(),
            Err(message) => {
                error!(domain = "manager", "{message}");
                format!("ERROR {message}\r\n")
            }
        };

        let stream = reader.get_mut();
        if let Err(err) = stream.write_all(response.as_bytes()).await {
            error!(domain = "manager", error = %err, "failed writing response");
            return;
        }
        if let Err(err) = stream.flush().await {
            error!(domain = "manager", error = %err, "failed flushing response");
        }
    }

    fn dispatch(&self, command: &str) -> Result<(), String> {
        if command != COMMAND_TLS_RELOAD {
            return Err(format!("Unknown command '{command}'"));
        }
        self.reload_tls()
            .map_err(|err| format!("Failed updating TLS config: {err}"))
    }

    fn reload_tls(&self) -> Result<(), TlsError> {
        let identity = (self.load_certificate)()?;
        let config = tls::server_config(identity)?;
        self.server.update_tls_config(config);
        Ok(())
    }
}
