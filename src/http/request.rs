//! Request-head parsing and upstream rewriting.

use std::io;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Upper bound on the request head (line + headers). Prevents memory
/// exhaustion from oversized requests.
pub const MAX_HEAD_SIZE: usize = 8 * 1024;

const MAX_HEADERS: usize = 64;

/// The parsed head of an HTTP/1.1 request: request line plus headers.
/// Bytes past the head (body, pipelined data) stay in the read buffer.
#[derive(Debug)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub minor_version: u8,
    headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Case-insensitive header lookup, first match wins.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn host(&self) -> Option<&str> {
        self.header("Host").filter(|host| !host.is_empty())
    }

    pub fn is_connect(&self) -> bool {
        self.method == "CONNECT"
    }

    /// Authority derived from the request target: the target itself for
    /// authority-form (`CONNECT host:port`), the host part for absolute-form
    /// (`GET http://host/path`), none for origin-form (`GET /path`).
    pub fn target_authority(&self) -> Option<&str> {
        if self.is_connect() {
            return Some(self.target.as_str()).filter(|target| !target.is_empty());
        }
        let rest = self
            .target
            .strip_prefix("http://")
            .or_else(|| self.target.strip_prefix("https://"))?;
        let end = rest.find('/').unwrap_or(rest.len());
        Some(&rest[..end]).filter(|authority| !authority.is_empty())
    }

    /// Path and query in origin-form, for the upstream request line.
    fn origin_form(&self) -> &str {
        if self.target.starts_with('/') {
            return &self.target;
        }
        match self
            .target
            .strip_prefix("http://")
            .or_else(|| self.target.strip_prefix("https://"))
        {
            Some(rest) => match rest.find('/') {
                Some(idx) => &rest[idx..],
                None => "/",
            },
            None => "/",
        }
    }

    /// Serialize the request toward the upstream: origin-form request line,
    /// `Host` guaranteed present, hop-by-hop proxy headers stripped. The
    /// canonical name of every dropped header begins with `Proxy`, so
    /// `Proxy-Authorization` never leaks upstream.
    pub fn write_forward(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self.method.as_bytes());
        buf.push(b' ');
        buf.extend_from_slice(self.origin_form().as_bytes());
        buf.extend_from_slice(b" HTTP/1.");
        buf.push(b'0' + self.minor_version);
        buf.extend_from_slice(b"\r\n");

        if self.host().is_none() {
            if let Some(authority) = self.target_authority() {
                buf.extend_from_slice(b"Host: ");
                buf.extend_from_slice(authority.as_bytes());
                buf.extend_from_slice(b"\r\n");
            }
        }
        for (name, value) in &self.headers {
            if has_proxy_prefix(name) {
                continue;
            }
            buf.extend_from_slice(name.as_bytes());
            buf.extend_from_slice(b": ");
            buf.extend_from_slice(value.as_bytes());
            buf.extend_from_slice(b"\r\n");
        }
        buf.extend_from_slice(b"\r\n");
    }
}

/// Whether the canonicalised (Title-Case) header name begins with `Proxy`.
fn has_proxy_prefix(name: &str) -> bool {
    name.len() >= 5 && name[..5].eq_ignore_ascii_case("proxy")
}

/// Read one request head from the stream, accumulating into `buf`. Returns
/// the parsed head and its length in bytes; anything past that offset in
/// `buf` was read off the wire but belongs to the tunnel.
///
/// EOF before a complete head, a head over [`MAX_HEAD_SIZE`], and grammar
/// errors all surface as `io::Error`; the caller treats them uniformly as
/// a malformed request.
pub async fn read_head<S>(stream: &mut S, buf: &mut BytesMut) -> io::Result<(RequestHead, usize)>
where
    S: AsyncRead + Unpin,
{
    loop {
        if stream.read_buf(buf).await? == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
        let mut request = httparse::Request::new(&mut headers);
        match request.parse(buf) {
            Ok(httparse::Status::Complete(head_len)) if head_len > MAX_HEAD_SIZE => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "request head too large",
                ));
            }
            Ok(httparse::Status::Complete(head_len)) => {
                let head = RequestHead {
                    method: request.method.unwrap_or_default().to_string(),
                    target: request.path.unwrap_or_default().to_string(),
                    minor_version: request.version.unwrap_or(1) as u8,
                    headers: request
                        .headers
                        .iter()
                        .map(|header| {
                            (
                                header.name.to_string(),
                                String::from_utf8_lossy(header.value).into_owned(),
                            )
                        })
                        .collect(),
                };
                return Ok((head, head_len));
            }
            Ok(httparse::Status::Partial) if buf.len() > MAX_HEAD_SIZE => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "request head too large",
                ));
            }
            Ok(httparse::Status::Partial) => continue,
            Err(err) => return Err(io::Error::new(io::ErrorKind::InvalidData, err)),
        }
    }
}

/// Split `host:port`, keeping IPv6 bracket literals intact. A missing or
/// unparseable port falls back to `default_port` with the authority kept
/// whole as the host, mirroring how a failed split leaves the input alone.
pub fn split_host_port(authority: &str, default_port: u16) -> (String, u16) {
    if let Some(bracket_end) = authority.find(']') {
        let host = authority[..=bracket_end].to_string();
        let port = authority[bracket_end + 1..]
            .strip_prefix(':')
            .and_then(|port| port.parse().ok())
            .unwrap_or(default_port);
        return (host, port);
    }
    match authority.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.to_string(), port),
            Err(_) => (authority.to_string(), default_port),
        },
        None => (authority.to_string(), default_port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    async fn parse(raw: &str) -> io::Result<(RequestHead, usize)> {
        let mut buf = BytesMut::new();
        let (mut tx, mut rx) = tokio::io::duplex(MAX_HEAD_SIZE * 2);
        tx.write_all(raw.as_bytes()).await.unwrap();
        tx.shutdown().await.unwrap();
        read_head(&mut rx, &mut buf).await
    }

    #[tokio::test]
    async fn parses_absolute_form() {
        let (head, _) = parse("GET http://example.com/index.html HTTP/1.1\r\nHost: example.com\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(head.method, "GET");
        assert_eq!(head.target_authority(), Some("example.com"));
        assert_eq!(head.host(), Some("example.com"));
        assert_eq!(head.minor_version, 1);
    }

    #[tokio::test]
    async fn parses_connect_authority_form() {
        let (head, _) = parse("CONNECT example.com:443 HTTP/1.1\r\n\r\n").await.unwrap();
        assert!(head.is_connect());
        assert_eq!(head.target_authority(), Some("example.com:443"));
    }

    #[tokio::test]
    async fn header_lookup_is_case_insensitive() {
        let (head, _) = parse("GET / HTTP/1.1\r\nhOsT: example.com\r\n\r\n").await.unwrap();
        assert_eq!(head.host(), Some("example.com"));
    }

    #[tokio::test]
    async fn reports_head_length_excluding_body() {
        let raw = "POST http://h/ HTTP/1.1\r\nContent-Length: 4\r\n\r\nbody";
        let mut buf = BytesMut::new();
        let (mut tx, mut rx) = tokio::io::duplex(4096);
        tx.write_all(raw.as_bytes()).await.unwrap();
        tx.shutdown().await.unwrap();
        let (_, head_len) = read_head(&mut rx, &mut buf).await.unwrap();
        assert_eq!(&buf[head_len..], b"body");
    }

    #[tokio::test]
    async fn rejects_malformed_request_line() {
        assert!(parse("INVALID\r\n\r\n").await.is_err());
    }

    #[tokio::test]
    async fn rejects_oversized_head() {
        let raw = format!("GET / HTTP/1.1\r\nX-Pad: {}\r\n\r\n", "a".repeat(MAX_HEAD_SIZE));
        assert!(parse(&raw).await.is_err());
    }

    #[tokio::test]
    async fn handles_split_delivery() {
        let mut buf = BytesMut::new();
        let (mut tx, mut rx) = tokio::io::duplex(4096);
        let reader = tokio::spawn(async move { read_head(&mut rx, &mut buf).await.map(|(head, _)| head.target) });
        tx.write_all(b"GET http://example.co").await.unwrap();
        tokio::task::yield_now().await;
        tx.write_all(b"m/ HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(reader.await.unwrap().unwrap(), "http://example.com/");
    }

    #[test]
    fn forward_form_strips_proxy_headers() {
        let head = RequestHead {
            method: "GET".to_string(),
            target: "http://example.com/a?b=c".to_string(),
            minor_version: 1,
            headers: vec![
                ("Proxy-Authorization".to_string(), "Basic xxx".to_string()),
                ("proxy-connection".to_string(), "keep-alive".to_string()),
                ("Accept".to_string(), "*/*".to_string()),
            ],
        };
        let mut buf = Vec::new();
        head.write_forward(&mut buf);
        let wire = String::from_utf8(buf).unwrap();
        assert!(wire.starts_with("GET /a?b=c HTTP/1.1\r\n"));
        assert!(wire.contains("Host: example.com\r\n"));
        assert!(wire.contains("Accept: */*\r\n"));
        assert!(!wire.to_ascii_lowercase().contains("proxy"));
        assert!(wire.ends_with("\r\n\r\n"));
    }

    #[test]
    fn forward_form_keeps_existing_host_header() {
        let head = RequestHead {
            method: "GET".to_string(),
            target: "http://example.com/".to_string(),
            minor_version: 1,
            headers: vec![("Host".to_string(), "other.example.com".to_string())],
        };
        let mut buf = Vec::new();
        head.write_forward(&mut buf);
        let wire = String::from_utf8(buf).unwrap();
        assert!(wire.contains("Host: other.example.com\r\n"));
        assert_eq!(wire.matches("Host:").count(), 1);
    }

    #[test]
    fn splits_host_and_port() {
        assert_eq!(split_host_port("example.com:8080", 80), ("example.com".to_string(), 8080));
        assert_eq!(split_host_port("example.com", 80), ("example.com".to_string(), 80));
        assert_eq!(split_host_port("[::1]:443", 80), ("[::1]".to_string(), 443));
        assert_eq!(split_host_port("[::1]", 80), ("[::1]".to_string(), 80));
        // Unparseable port leaves the authority untouched.
        assert_eq!(split_host_port("host:abc", 80), ("host:abc".to_string(), 80));
    }
}
