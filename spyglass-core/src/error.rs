//! Domain-specific error types for the RFB client.
//!
//! All fallible operations return `Result<T, RfbError>`.
//! No panics on invalid input — every error is typed, and every fatal
//! condition tears the session down exactly once.

use std::time::Duration;
use thiserror::Error;

/// The canonical error type for an RFB console session.
#[derive(Debug, Error)]
pub enum RfbError {
    // ── Protocol Errors ──────────────────────────────────────────
    /// The server's 12-byte version line did not carry the expected
    /// major-version marker.
    #[error("bad protocol version line: {0:?}")]
    BadVersion(String),

    /// Received a server message type this client does not speak.
    #[error("unknown server message type: {0:#04x}")]
    UnknownServerMessage(u8),

    /// A rectangle arrived with an encoding that was never negotiated.
    #[error("unknown rectangle encoding: {0}")]
    UnknownEncoding(i32),

    /// A message violated protocol rules.
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),

    /// A lifecycle transition was attempted out of order.
    #[error("invalid session phase transition: {0}")]
    InvalidPhase(&'static str),

    // ── Security Errors ──────────────────────────────────────────
    /// The server reported `ConnectionFailed` with a reason string.
    #[error("server refused the connection: {0}")]
    ServerRefused(String),

    /// The server offered a security scheme this client does not support.
    #[error("unsupported security scheme: {0}")]
    UnsupportedSecurity(u32),

    /// The server requires VNC authentication but no password was given.
    #[error("password required but not provided")]
    PasswordRequired,

    /// The server rejected the DES challenge response.
    #[error("authentication failed: bad password")]
    AuthFailed,

    /// The server is refusing further authentication attempts.
    #[error("authentication failed: too many attempts")]
    AuthTooManyAttempts,

    /// The authentication result code was not one of ok/failed/too-many.
    #[error("unknown authentication result code: {0}")]
    UnknownAuthResult(u32),

    // ── Transport Errors ─────────────────────────────────────────
    /// The socket layer reported an error.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream while more bytes were expected.
    #[error("connection closed by peer mid-stream")]
    UnexpectedEos,

    /// A single typed item cannot ever fit the stream buffer.
    #[error("item of {size} bytes exceeds transport buffer of {capacity}")]
    ItemTooLarge { size: usize, capacity: usize },

    /// An operation exceeded its deadline.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    // ── TLS Errors ───────────────────────────────────────────────
    /// The TLS handshake or record layer failed. Never downgraded.
    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    /// The host string is not a valid TLS server name.
    #[error("invalid tls server name: {0}")]
    InvalidServerName(String),

    // ── Tunnel Errors ────────────────────────────────────────────
    /// The HTTP tunnel endpoint answered with a non-2xx status.
    #[error("tunnel rejected: {0}")]
    TunnelRejected(String),

    // ── Queue / Task Errors ──────────────────────────────────────
    /// The bounded outbound queue is full; the enqueue is dropped,
    /// never blocked.
    #[error("outbound queue full")]
    QueueFull,

    /// An mpsc channel was closed unexpectedly.
    #[error("channel closed")]
    ChannelClosed,

    /// A protocol loop task died without producing a result.
    #[error("task failed: {0}")]
    Task(String),

    // ── Serialization Errors ─────────────────────────────────────
    /// UTF-8 conversion of a server-supplied string failed.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

// ── Convenient From implementations ──────────────────────────────

impl<T> From<tokio::sync::mpsc::error::TrySendError<T>> for RfbError {
    fn from(e: tokio::sync::mpsc::error::TrySendError<T>) -> Self {
        match e {
            tokio::sync::mpsc::error::TrySendError::Full(_) => RfbError::QueueFull,
            tokio::sync::mpsc::error::TrySendError::Closed(_) => RfbError::ChannelClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let e = RfbError::UnknownServerMessage(0x63);
        assert!(e.to_string().contains("0x63"));

        let e = RfbError::ItemTooLarge {
            size: 4,
            capacity: 3,
        };
        assert!(e.to_string().contains('4'));
        assert!(e.to_string().contains('3'));

        let e = RfbError::ServerRefused("no slots".into());
        assert!(e.to_string().contains("no slots"));
    }

    #[test]
    fn from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broke");
        let e: RfbError = io_err.into();
        assert!(matches!(e, RfbError::Io(_)));
    }

    #[test]
    fn from_try_send() {
        let (tx, rx) = tokio::sync::mpsc::channel::<u8>(1);
        tx.try_send(0).unwrap();
        let e: RfbError = tx.try_send(1).unwrap_err().into();
        assert!(matches!(e, RfbError::QueueFull));

        drop(rx);
        let e: RfbError = tx.try_send(2).unwrap_err().into();
        assert!(matches!(e, RfbError::ChannelClosed));
    }
}
