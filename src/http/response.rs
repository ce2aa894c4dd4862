//! Minimal client-facing responses.

use std::io;

use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Realm announced in the `Proxy-Authenticate` challenge.
pub const AUTH_REALM: &str = "Gilgamesh Web Proxy";

/// Terminal outcome of the proxy state machine. At most one response is
/// ever written to a peer connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyResponse {
    /// Close the connection without writing anything. Used for malformed
    /// requests and for tunnels that already wrote their own response.
    None,
    /// A bare status line with the given code.
    Status(u16),
    /// `407` carrying the Basic authentication challenge.
    AuthChallenge,
}

impl ProxyResponse {
    /// Serialize and flush the response. [`ProxyResponse::None`] is a no-op.
    pub async fn write<S>(self, stream: &mut S, minor_version: u8) -> io::Result<()>
    where
        S: AsyncWrite + Unpin,
    {
        let head = match self {
            ProxyResponse::None => return Ok(()),
            ProxyResponse::Status(code) => {
                format!("HTTP/1.{} {} {}\r\n\r\n", minor_version, code, reason(code))
            }
            ProxyResponse::AuthChallenge => format!(
                "HTTP/1.{} 407 {}\r\nProxy-Authenticate: Basic realm=\"{}\"\r\n\r\n",
                minor_version,
                reason(407),
                AUTH_REALM
            ),
        };
        stream.write_all(head.as_bytes()).await?;
        stream.flush().await
    }
}

fn reason(code: u16) -> &'static str {
    match code {
        200 => "OK",
        400 => "Bad Request",
        403 => "Forbidden",
        407 => "Proxy Authentication Required",
        502 => "Bad Gateway",
        _ => "",
    }
}
