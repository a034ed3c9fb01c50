//! TLS tunnel over the transport streams.
//!
//! Some hypervisor console endpoints only speak VNC inside TLS. The
//! tunnel drives a `rustls::ClientConnection` by hand: the handshake
//! loop wraps outgoing records and flushes them through the plain
//! [`WriteStream`], and feeds ciphertext from the plain [`ReadStream`]
//! into the record layer whenever it underflows. Handshake crypto runs
//! to completion inside `process_new_packets()` before the loop reads
//! the connection status again, so the pump never spins on stale state.
//!
//! Once established, the session replaces its transport streams with
//! fresh ones layered over [`TlsReader`]/[`TlsWriter`], sized to the
//! TLS record length. A handshake or record failure is fatal for the
//! session; there is no downgrade to plaintext.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore};
use tracing::debug;

use crate::error::RfbError;
use crate::stream::{ByteSink, ByteSource, ReadStream, WriteStream};

/// Stream buffer capacity once TLS is layered on: one max-size TLS
/// record plus header/MAC overhead.
pub const TLS_BUFFER_CAPACITY: usize = 16 * 1024 + 2048;

/// Size of the ciphertext staging chunk fed into the record layer.
const CIPHERTEXT_CHUNK: usize = 4096;

// ── TlsOptions ───────────────────────────────────────────────────

/// How the TLS layer verifies the server.
#[derive(Debug, Clone, Default)]
pub struct TlsOptions {
    /// Skip certificate verification. Hypervisor consoles are routinely
    /// fronted by self-signed certificates, so operators may opt in to
    /// trusting the network path instead.
    pub insecure: bool,
}

impl TlsOptions {
    /// Build the rustls client configuration for these options.
    pub fn client_config(&self) -> Arc<ClientConfig> {
        let config = if self.insecure {
            ClientConfig::builder()
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(danger::NoVerification::new()))
                .with_no_client_auth()
        } else {
            let mut roots = RootCertStore::empty();
            roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth()
        };
        Arc::new(config)
    }
}

// ── TlsTunnel ────────────────────────────────────────────────────

/// Drives the handshake and splits the connection into a reader/writer
/// pair for the two protocol loops.
pub struct TlsTunnel;

impl TlsTunnel {
    /// Perform the TLS handshake over the plain transport streams and
    /// return the record-layer halves.
    pub async fn establish(
        host: &str,
        options: &TlsOptions,
        mut cipher_in: ReadStream,
        mut cipher_out: WriteStream,
    ) -> Result<(TlsReader, TlsWriter), RfbError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|_| RfbError::InvalidServerName(host.to_string()))?;
        let mut conn = ClientConnection::new(options.client_config(), server_name)?;

        let mut inbound = vec![0u8; CIPHERTEXT_CHUNK];
        while conn.is_handshaking() {
            if conn.wants_write() {
                Self::pump_outgoing(&mut conn, &mut cipher_out).await?;
                continue;
            }
            // Underflow: the peer owes us more handshake ciphertext.
            let n = cipher_in.read_available(&mut inbound).await?;
            feed_ciphertext(&mut conn, &inbound[..n])?;
        }
        // Flush whatever the handshake produced last (Finished, tickets).
        if conn.wants_write() {
            Self::pump_outgoing(&mut conn, &mut cipher_out).await?;
        }

        debug!(
            version = ?conn.protocol_version(),
            cipher_suite = ?conn.negotiated_cipher_suite(),
            "tls tunnel established"
        );

        let conn = Arc::new(Mutex::new(conn));
        Ok((
            TlsReader {
                conn: Arc::clone(&conn),
                cipher_in,
                inbound,
            },
            TlsWriter {
                conn,
                cipher_out,
            },
        ))
    }

    /// Wrap every pending outgoing record and flush the ciphertext.
    async fn pump_outgoing(
        conn: &mut ClientConnection,
        cipher_out: &mut WriteStream,
    ) -> Result<(), RfbError> {
        let mut records = Vec::with_capacity(CIPHERTEXT_CHUNK);
        while conn.wants_write() {
            conn.write_tls(&mut records)?;
        }
        cipher_out.write_bytes(&records).await?;
        cipher_out.flush().await?;
        Ok(())
    }
}

/// Feed raw ciphertext into the record layer and process every complete
/// record it yields.
fn feed_ciphertext(conn: &mut ClientConnection, mut ciphertext: &[u8]) -> Result<(), RfbError> {
    while !ciphertext.is_empty() {
        let taken = conn.read_tls(&mut ciphertext)?;
        if taken == 0 {
            return Err(RfbError::ProtocolViolation("tls record layer stalled"));
        }
        conn.process_new_packets()?;
    }
    Ok(())
}

fn lock_conn(conn: &Mutex<ClientConnection>) -> io::Result<MutexGuard<'_, ClientConnection>> {
    conn.lock()
        .map_err(|_| io::Error::other("tls connection state poisoned"))
}

// ── TlsReader ────────────────────────────────────────────────────

/// Record-unwrapping byte source: plaintext out, pulling ciphertext
/// from the underlying stream on underflow.
pub struct TlsReader {
    conn: Arc<Mutex<ClientConnection>>,
    cipher_in: ReadStream,
    inbound: Vec<u8>,
}

#[async_trait]
impl ByteSource for TlsReader {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            {
                let mut conn = lock_conn(&self.conn)?;
                match io::Read::read(&mut conn.reader(), buf) {
                    // 0 here means the peer sent close_notify: a clean
                    // TLS end-of-stream.
                    Ok(n) => return Ok(n),
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                    Err(e) => return Err(e),
                }
            }
            // No plaintext buffered; pull more ciphertext. The lock is
            // not held across the await.
            let n = self
                .cipher_in
                .read_available(&mut self.inbound)
                .await
                .map_err(io::Error::other)?;
            let mut conn = lock_conn(&self.conn)?;
            let mut slice = &self.inbound[..n];
            while !slice.is_empty() {
                let taken = conn.read_tls(&mut slice)?;
                if taken == 0 {
                    return Err(io::Error::other("tls record layer stalled"));
                }
                conn.process_new_packets().map_err(io::Error::other)?;
            }
        }
    }
}

// ── TlsWriter ────────────────────────────────────────────────────

/// Record-wrapping byte sink: wraps application data and flushes the
/// produced ciphertext immediately.
pub struct TlsWriter {
    conn: Arc<Mutex<ClientConnection>>,
    cipher_out: WriteStream,
}

#[async_trait]
impl ByteSink for TlsWriter {
    async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        let (written, records) = {
            let mut conn = lock_conn(&self.conn)?;
            // May accept only part of `buf` when the record layer is
            // saturated; the caller's flush loop retries the remainder
            // after this ciphertext has drained.
            let written = io::Write::write(&mut conn.writer(), buf)?;
            let mut records = Vec::with_capacity(buf.len() + 256);
            while conn.wants_write() {
                conn.write_tls(&mut records)?;
            }
            (written, records)
        };
        self.cipher_out
            .write_bytes(&records)
            .await
            .map_err(io::Error::other)?;
        self.cipher_out.flush().await.map_err(io::Error::other)?;
        Ok(written)
    }
}

// ── Certificate verification opt-out ─────────────────────────────

mod danger {
    use rustls::DigitallySignedStruct;
    use rustls::client::danger::{
        HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier,
    };
    use rustls::crypto::{CryptoProvider, verify_tls12_signature, verify_tls13_signature};
    use rustls::pki_types::{CertificateDer, ServerName, UnixTime};

    /// Accepts any server certificate while still verifying handshake
    /// signatures, so the session is encrypted but unauthenticated.
    #[derive(Debug)]
    pub(super) struct NoVerification(CryptoProvider);

    impl NoVerification {
        pub(super) fn new() -> Self {
            Self(rustls::crypto::ring::default_provider())
        }
    }

    impl ServerCertVerifier for NoVerification {
        fn verify_server_cert(
            &self,
            _end_entity: &CertificateDer<'_>,
            _intermediates: &[CertificateDer<'_>],
            _server_name: &ServerName<'_>,
            _ocsp_response: &[u8],
            _now: UnixTime,
        ) -> Result<ServerCertVerified, rustls::Error> {
            Ok(ServerCertVerified::assertion())
        }

        fn verify_tls12_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls12_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn verify_tls13_signature(
            &self,
            message: &[u8],
            cert: &CertificateDer<'_>,
            dss: &DigitallySignedStruct,
        ) -> Result<HandshakeSignatureValid, rustls::Error> {
            verify_tls13_signature(message, cert, dss, &self.0.signature_verification_algorithms)
        }

        fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
            self.0.signature_verification_algorithms.supported_schemes()
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_config_builds_with_roots() {
        let config = TlsOptions::default().client_config();
        assert!(!config.alpn_protocols.iter().any(|p| p == b"h2"));
    }

    #[test]
    fn client_config_builds_insecure() {
        let options = TlsOptions { insecure: true };
        let _ = options.client_config();
    }

    #[test]
    fn invalid_server_name_is_rejected() {
        // An IP-with-port string is not a valid server name.
        let err = ServerName::try_from("10.0.0.1:5900".to_string());
        assert!(err.is_err());
    }
}
