//! Outbound message queue and dispatch loop.
//!
//! Producers — input-event callbacks, the receiver loop, the session
//! owner — enqueue [`ClientMessage`]s through a cloneable
//! [`SenderHandle`]. The queue is bounded and **fails fast**: when 30
//! messages are already waiting, the next enqueue is rejected with
//! [`RfbError::QueueFull`] instead of blocking the producer. The
//! [`PacketSender`] loop drains the queue in FIFO order, serializing and
//! flushing one message at a time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::RfbError;
use crate::message::{ClientMessage, SUPPORTED_ENCODINGS};
use crate::screen::{PixelFormat, ScreenDescription};
use crate::stream::WriteStream;

/// Maximum messages waiting in the outbound queue.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 30;

/// How long one queue poll may block before re-checking the alive flag.
const QUEUE_POLL_INTERVAL: Duration = Duration::from_millis(250);

// ── SenderHandle ─────────────────────────────────────────────────

/// Cloneable producer half of the outbound queue, plus the
/// single-outstanding-update throttle and the input-event adapters.
#[derive(Clone, Debug)]
pub struct SenderHandle {
    tx: mpsc::Sender<ClientMessage>,
    /// Set when an update request is in flight, cleared by the receiver
    /// when a framebuffer update arrives.
    update_pending: Arc<AtomicBool>,
    screen: Arc<ScreenDescription>,
}

impl SenderHandle {
    /// Enqueue a message, failing fast when the queue is full.
    pub fn enqueue(&self, message: ClientMessage) -> Result<(), RfbError> {
        self.tx.try_send(message).map_err(RfbError::from)
    }

    /// Enqueue a full-screen, non-incremental update request. Always
    /// enqueues, regardless of the throttle.
    pub fn request_full_update(&self) -> Result<(), RfbError> {
        let (width, height) = self.screen.size();
        self.enqueue(ClientMessage::FramebufferUpdateRequest {
            incremental: false,
            x: 0,
            y: 0,
            width: width.max(0) as u16,
            height: height.max(0) as u16,
        })?;
        self.update_pending.store(true, Ordering::Release);
        Ok(())
    }

    /// The local front end finished rendering a frame: ask for the next
    /// incremental update, unless one request is already in flight.
    pub fn on_frame_rendered(&self) -> Result<(), RfbError> {
        if self
            .update_pending
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // A request is already outstanding; the next framebuffer
            // update will re-arm us.
            return Ok(());
        }
        let (width, height) = self.screen.size();
        let request = ClientMessage::FramebufferUpdateRequest {
            incremental: true,
            x: 0,
            y: 0,
            width: width.max(0) as u16,
            height: height.max(0) as u16,
        };
        if let Err(e) = self.enqueue(request) {
            self.update_pending.store(false, Ordering::Release);
            return Err(e);
        }
        Ok(())
    }

    /// Called by the receiver loop whenever a framebuffer update
    /// arrives: the outstanding request (if any) has been satisfied.
    pub(crate) fn frame_received(&self) {
        self.update_pending.store(false, Ordering::Release);
    }

    /// Input adapter: forward a key press/release.
    pub fn key_event(&self, down: bool, keysym: u32) -> Result<(), RfbError> {
        self.enqueue(ClientMessage::KeyEvent { down, keysym })
    }

    /// Input adapter: forward a pointer move/click. `buttons` is the
    /// RFB button mask (bit 0 = left, 1 = middle, 2 = right).
    pub fn pointer_event(&self, buttons: u8, x: u16, y: u16) -> Result<(), RfbError> {
        self.enqueue(ClientMessage::PointerEvent { buttons, x, y })
    }

    /// Build a detached handle without a dispatch loop behind it.
    #[cfg(test)]
    pub(crate) fn for_tests(
        tx: mpsc::Sender<ClientMessage>,
        screen: Arc<ScreenDescription>,
    ) -> Self {
        Self {
            tx,
            update_pending: Arc::new(AtomicBool::new(false)),
            screen,
        }
    }
}

// ── PacketSender ─────────────────────────────────────────────────

/// Consumer half: drains the queue onto the write stream.
pub struct PacketSender {
    rx: mpsc::Receiver<ClientMessage>,
    out: WriteStream,
    alive: Arc<AtomicBool>,
}

impl PacketSender {
    /// Create the sender and enqueue the initial negotiation: the
    /// preferred pixel format (only when the server's differs), the
    /// supported encodings, and a first full-screen update request.
    pub fn new(
        out: WriteStream,
        screen: Arc<ScreenDescription>,
        alive: Arc<AtomicBool>,
    ) -> Result<(Self, SenderHandle), RfbError> {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let handle = SenderHandle {
            tx,
            update_pending: Arc::new(AtomicBool::new(false)),
            screen,
        };

        if !handle.screen.is_preferred_format() {
            debug!("server pixel format differs, negotiating preferred");
            handle.enqueue(ClientMessage::SetPixelFormat(PixelFormat::default()))?;
            // Every rectangle after that message is in the new layout.
            handle.screen.set_format(PixelFormat::default());
        }
        handle.enqueue(ClientMessage::SetEncodings(SUPPORTED_ENCODINGS.to_vec()))?;
        handle.request_full_update()?;

        Ok((Self { rx, out, alive }, handle))
    }

    /// Run the dispatch loop until the session dies or every handle is
    /// dropped. Any I/O failure marks the connection dead and is
    /// returned to the caller for teardown.
    pub async fn run(&mut self) -> Result<(), RfbError> {
        while self.alive.load(Ordering::Acquire) {
            let message = match tokio::time::timeout(QUEUE_POLL_INTERVAL, self.rx.recv()).await {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(_elapsed) => continue,
            };
            trace!(kind = message.kind(), "dispatching");
            if let Err(e) = self.dispatch(&message).await {
                self.alive.store(false, Ordering::Release);
                return Err(e);
            }
        }
        debug!(bytes = self.out.bytes_flushed(), "sender loop ended");
        Ok(())
    }

    async fn dispatch(&mut self, message: &ClientMessage) -> Result<(), RfbError> {
        self.out.write_bytes(&message.encode()).await?;
        self.out.flush().await
    }
}

// ── Tests ────────────────────────────────────────────────────────
