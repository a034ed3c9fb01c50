//! # spyglass-core
//!
//! RFB 3.3 (VNC) client engine for console sessions: the protocol side
//! of a console service that opens a session to a hypervisor's VNC
//! endpoint and relays screen and input state toward a display front
//! end.
//!
//! This crate contains:
//! - **Transport**: `ReadStream`/`WriteStream` — sliding-window buffered
//!   byte streams with typed big-endian reads/writes
//! - **TLS**: `TlsTunnel` — manually pumped rustls record layer for
//!   encrypted console endpoints
//! - **Tunnel**: HTTP CONNECT client for proxied console paths
//! - **Protocol**: handshake/authentication/initialization sequencing,
//!   `ClientMessage` serialization, server-message decoding
//! - **Loops**: `PacketSender` (bounded fail-fast outbound queue) and
//!   `PacketReceiver` (server-message dispatch into a `RenderSink`)
//! - **Session**: `Session` — lifecycle orchestration with idempotent
//!   shutdown
//! - **Error**: `RfbError` — typed, `thiserror`-based error hierarchy
//!
//! ## Architecture
//!
//! ```text
//!            ┌────────────────────── Session ──────────────────────┐
//!            │                                                     │
//!  input ───►│ SenderHandle ─► queue(30) ─► PacketSender ─► WriteStream ─► socket/TLS
//!  events    │                                   ▲                 │
//!            │                   ScreenDescription (shared)        │
//!            │                                   ▼                 │
//!  RenderSink◄─────────────────── PacketReceiver ◄─ ReadStream ◄── socket/TLS
//!            └─────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod error;
pub mod message;
pub mod phase;
pub mod receiver;
pub mod screen;
pub mod sender;
pub mod session;
pub mod sink;
pub mod stream;
pub mod tls;
pub mod tunnel;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use error::RfbError;
pub use message::{ClientMessage, RectHeader, SUPPORTED_ENCODINGS};
pub use phase::SessionPhase;
pub use receiver::PacketReceiver;
pub use screen::{PixelFormat, ScreenDescription};
pub use sender::{OUTBOUND_QUEUE_CAPACITY, PacketSender, SenderHandle};
pub use session::{ConnectOptions, Session};
pub use sink::RenderSink;
pub use stream::{ByteSink, ByteSource, IoSink, IoSource, ReadStream, WriteStream};
pub use tls::{TlsOptions, TlsTunnel};
pub use tunnel::TunnelOptions;
