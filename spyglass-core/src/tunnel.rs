//! HTTP CONNECT tunnel toward a console endpoint.
//!
//! Hypervisor VNC ports are often not directly reachable; the console
//! service fronts them with an HTTP endpoint that routes a CONNECT
//! request — carrying the target and an opaque session ticket — to the
//! right hypervisor socket. After the 2xx status line the stream is a
//! plain byte pipe and the RFB handshake starts on it unchanged.
//!
//! ```text
//! CONNECT <path>?host=<host>&port=<port>&session=<ticket> HTTP/1.1
//! Host: <tunnel-host>:<tunnel-port>
//!
//! HTTP/1.1 200 Connection Established
//! ```

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::RfbError;

/// Response header section larger than this is treated as garbage.
const MAX_RESPONSE_HEADER: usize = 4096;

/// Where and how to reach the tunnel endpoint.
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    /// Tunnel endpoint host.
    pub host: String,
    /// Tunnel endpoint port.
    pub port: u16,
    /// Request path the tunnel routes consoles under, e.g. `/console`.
    pub path: String,
    /// Opaque session ticket authorizing this console, if the tunnel
    /// requires one.
    pub session: Option<String>,
}

/// Open a tunneled byte stream to `target_host:target_port`.
pub(crate) async fn open(
    options: &TunnelOptions,
    target_host: &str,
    target_port: u16,
    timeout: Duration,
) -> Result<TcpStream, RfbError> {
    let addr = format!("{}:{}", options.host, options.port);
    let mut stream = tokio::time::timeout(timeout, TcpStream::connect(&addr))
        .await
        .map_err(|_| RfbError::Timeout(timeout))??;

    let mut target = format!(
        "{}?host={}&port={}",
        options.path, target_host, target_port
    );
    if let Some(session) = &options.session {
        target.push_str("&session=");
        target.push_str(session);
    }
    let request = format!("CONNECT {target} HTTP/1.1\r\nHost: {addr}\r\n\r\n");
    stream.write_all(request.as_bytes()).await?;

    // Read the response headers byte-by-byte so not a single byte of
    // the RFB stream behind them is consumed.
    let mut header = Vec::with_capacity(256);
    let mut byte = [0u8; 1];
    while !header.ends_with(b"\r\n\r\n") {
        if header.len() >= MAX_RESPONSE_HEADER {
            return Err(RfbError::TunnelRejected("oversized response header".into()));
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(RfbError::UnexpectedEos);
        }
        header.push(byte[0]);
    }

    let status_line = String::from_utf8_lossy(&header)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string();
    let accepted = status_line
        .split_whitespace()
        .nth(1)
        .is_some_and(|code| code.starts_with('2'));
    if !accepted {
        return Err(RfbError::TunnelRejected(status_line));
    }

    debug!(%status_line, target_host, target_port, "tunnel open");
    Ok(stream)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn fake_tunnel(response: &'static str) -> (std::net::SocketAddr, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut byte = [0u8; 1];
            while !request.ends_with(b"\r\n\r\n") {
                stream.read_exact(&mut byte).await.unwrap();
                request.push(byte[0]);
            }
            stream.write_all(response.as_bytes()).await.unwrap();
            // Prove the pipe is transparent after the header.
            stream.write_all(b"after-header").await.ok();
            String::from_utf8(request).unwrap()
        });
        (addr, handle)
    }

    #[tokio::test]
    async fn connect_request_is_routed_and_accepted() {
        let (addr, server) = fake_tunnel("HTTP/1.1 200 Connection Established\r\n\r\n").await;
        let options = TunnelOptions {
            host: addr.ip().to_string(),
            port: addr.port(),
            path: "/console".into(),
            session: Some("ticket-42".into()),
        };

        let mut stream = open(&options, "10.1.2.3", 5901, Duration::from_secs(2))
            .await
            .unwrap();

        let request = server.await.unwrap();
        let first_line = request.lines().next().unwrap();
        assert_eq!(
            first_line,
            "CONNECT /console?host=10.1.2.3&port=5901&session=ticket-42 HTTP/1.1"
        );

        // Not a single post-header byte was swallowed.
        let mut after = [0u8; 12];
        stream.read_exact(&mut after).await.unwrap();
        assert_eq!(&after, b"after-header");
    }

    #[tokio::test]
    async fn non_2xx_status_is_rejected() {
        let (addr, _server) = fake_tunnel("HTTP/1.1 403 Forbidden\r\n\r\n").await;
        let options = TunnelOptions {
            host: addr.ip().to_string(),
            port: addr.port(),
            path: "/console".into(),
            session: None,
        };

        match open(&options, "10.1.2.3", 5901, Duration::from_secs(2)).await {
            Err(RfbError::TunnelRejected(line)) => assert!(line.contains("403")),
            other => panic!("expected TunnelRejected, got {other:?}"),
        }
    }
}
