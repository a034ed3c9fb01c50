//! RFB 3.3 wire messages.
//!
//! Client-to-server messages are staged as byte buffers by the sender
//! loop; server-to-client messages are decoded field-by-field straight
//! off the read stream by the receiver loop, so only their tags and the
//! rectangle header live here.
//!
//! ## Client message formats
//!
//! ```text
//! SetPixelFormat:            0  pad×3  pixel-format(16)
//! SetEncodings:              2  pad    count:u16  encoding:i32 × count
//! FramebufferUpdateRequest:  3  incremental:u8  x:u16 y:u16 w:u16 h:u16
//! KeyEvent:                  4  down:u8  pad×2  keysym:u32
//! PointerEvent:              5  buttons:u8  x:u16  y:u16
//! ```

use bytes::{BufMut, BytesMut};

use crate::screen::PixelFormat;

/// Fixed version line exchanged by both sides. Only 3.3 semantics are
/// implemented.
pub const VERSION_LINE: &[u8; 12] = b"RFB 003.003\n";

/// The major-version marker a server line must carry to be accepted.
pub const VERSION_PREFIX: &[u8] = b"RFB 003.";

// ── Server message tags ──────────────────────────────────────────

pub mod server_msg {
    pub const FRAMEBUFFER_UPDATE: u8 = 0;
    pub const BELL: u8 = 2;
    pub const CUT_TEXT: u8 = 3;
}

// ── Security handshake codes ─────────────────────────────────────

pub mod security {
    pub const CONNECTION_FAILED: u32 = 0;
    pub const NONE: u32 = 1;
    pub const VNC_AUTH: u32 = 2;
}

pub mod auth_result {
    pub const OK: u32 = 0;
    pub const FAILED: u32 = 1;
    pub const TOO_MANY_ATTEMPTS: u32 = 2;
}

// ── Rectangle encodings ──────────────────────────────────────────

pub mod encoding {
    pub const RAW: i32 = 0;
    pub const COPY_RECT: i32 = 1;
    /// Pseudo-encoding: announces desktop-resize capability, carries no
    /// pixel payload.
    pub const DESKTOP_SIZE: i32 = -223;
}

/// Encodings announced to the server, in preference order.
pub const SUPPORTED_ENCODINGS: [i32; 3] =
    [encoding::RAW, encoding::COPY_RECT, encoding::DESKTOP_SIZE];

// ── Client messages ──────────────────────────────────────────────

mod tag {
    pub const SET_PIXEL_FORMAT: u8 = 0;
    pub const SET_ENCODINGS: u8 = 2;
    pub const FRAMEBUFFER_UPDATE_REQUEST: u8 = 3;
    pub const KEY_EVENT: u8 = 4;
    pub const POINTER_EVENT: u8 = 5;
}

/// A client-to-server message, consumed exactly once by the sender loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SetPixelFormat(PixelFormat),
    SetEncodings(Vec<i32>),
    FramebufferUpdateRequest {
        incremental: bool,
        x: u16,
        y: u16,
        width: u16,
        height: u16,
    },
    KeyEvent {
        down: bool,
        keysym: u32,
    },
    PointerEvent {
        buttons: u8,
        x: u16,
        y: u16,
    },
}

impl ClientMessage {
    /// Short name for log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SetPixelFormat(_) => "SetPixelFormat",
            Self::SetEncodings(_) => "SetEncodings",
            Self::FramebufferUpdateRequest { .. } => "FramebufferUpdateRequest",
            Self::KeyEvent { .. } => "KeyEvent",
            Self::PointerEvent { .. } => "PointerEvent",
        }
    }

    /// Serialize to the wire representation.
    pub fn encode(&self) -> BytesMut {
        match self {
            Self::SetPixelFormat(format) => {
                let mut buf = BytesMut::with_capacity(20);
                buf.put_u8(tag::SET_PIXEL_FORMAT);
                buf.put_bytes(0, 3);
                buf.put_slice(&format.encode());
                buf
            }
            Self::SetEncodings(encodings) => {
                let mut buf = BytesMut::with_capacity(4 + encodings.len() * 4);
                buf.put_u8(tag::SET_ENCODINGS);
                buf.put_u8(0);
                buf.put_u16(encodings.len() as u16);
                for e in encodings {
                    buf.put_i32(*e);
                }
                buf
            }
            Self::FramebufferUpdateRequest {
                incremental,
                x,
                y,
                width,
                height,
            } => {
                let mut buf = BytesMut::with_capacity(10);
                buf.put_u8(tag::FRAMEBUFFER_UPDATE_REQUEST);
                buf.put_u8(u8::from(*incremental));
                buf.put_u16(*x);
                buf.put_u16(*y);
                buf.put_u16(*width);
                buf.put_u16(*height);
                buf
            }
            Self::KeyEvent { down, keysym } => {
                let mut buf = BytesMut::with_capacity(8);
                buf.put_u8(tag::KEY_EVENT);
                buf.put_u8(u8::from(*down));
                buf.put_bytes(0, 2);
                buf.put_u32(*keysym);
                buf
            }
            Self::PointerEvent { buttons, x, y } => {
                let mut buf = BytesMut::with_capacity(6);
                buf.put_u8(tag::POINTER_EVENT);
                buf.put_u8(*buttons);
                buf.put_u16(*x);
                buf.put_u16(*y);
                buf
            }
        }
    }
}

// ── Rectangle header ─────────────────────────────────────────────

/// Header of one rectangle within a framebuffer update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RectHeader {
    pub x: u16,
    pub y: u16,
    pub width: u16,
    pub height: u16,
    pub encoding: i32,
}

// ── Tests ────────────────────────────────────────────────────────
