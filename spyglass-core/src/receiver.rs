//! Inbound server-message dispatch loop.
//!
//! Reads one server message at a time off the transport and turns it
//! into effects on the shared [`ScreenDescription`] and the external
//! [`RenderSink`]. Only the three RFB 3.3 message types this client
//! negotiates are accepted; anything else is a fatal protocol error,
//! since an unknown tag has an unknown payload length and the stream
//! cannot be resynchronized past it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::error::RfbError;
use crate::message::{RectHeader, encoding, server_msg};
use crate::screen::ScreenDescription;
use crate::sender::SenderHandle;
use crate::sink::RenderSink;
use crate::stream::ReadStream;

/// Upper bound on one RAW rectangle payload. A u16×u16 rectangle at
/// 4 bytes per pixel cannot legitimately exceed this.
const MAX_RECT_BYTES: usize = 64 * 1024 * 1024;

/// Upper bound on a server cut-text payload.
const MAX_CUT_TEXT_LEN: usize = 1 << 20;

/// Consumer of server-to-client messages.
pub struct PacketReceiver {
    input: ReadStream,
    sink: Box<dyn RenderSink>,
    screen: Arc<ScreenDescription>,
    sender: SenderHandle,
    alive: Arc<AtomicBool>,
}

impl PacketReceiver {
    pub fn new(
        input: ReadStream,
        sink: Box<dyn RenderSink>,
        screen: Arc<ScreenDescription>,
        sender: SenderHandle,
        alive: Arc<AtomicBool>,
    ) -> Self {
        Self {
            input,
            sink,
            screen,
            sender,
            alive,
        }
    }

    /// Run the dispatch loop until the session dies. Whatever ends the
    /// loop, the alive flag is lowered so the sender loop follows.
    pub async fn run(&mut self) -> Result<(), RfbError> {
        let result = self.dispatch_loop().await;
        self.alive.store(false, Ordering::Release);
        debug!(bytes = self.input.bytes_consumed(), "receiver loop ended");
        result
    }

    async fn dispatch_loop(&mut self) -> Result<(), RfbError> {
        while self.alive.load(Ordering::Acquire) {
            let tag = self.input.read_u8().await?;
            match tag {
                server_msg::FRAMEBUFFER_UPDATE => self.on_framebuffer_update().await?,
                server_msg::BELL => {
                    debug!("bell");
                    self.sink.bell();
                }
                server_msg::CUT_TEXT => self.on_cut_text().await?,
                other => return Err(RfbError::UnknownServerMessage(other)),
            }
        }
        Ok(())
    }

    async fn on_framebuffer_update(&mut self) -> Result<(), RfbError> {
        let _padding = self.input.read_u8().await?;
        let count = self.input.read_u16().await?;
        // The outstanding update request is satisfied; the front end may
        // ask for the next one while we decode.
        self.sender.frame_received();

        for _ in 0..count {
            let rect = RectHeader {
                x: self.input.read_u16().await?,
                y: self.input.read_u16().await?,
                width: self.input.read_u16().await?,
                height: self.input.read_u16().await?,
                encoding: self.input.read_i32().await?,
            };
            trace!(?rect, "rectangle");

            match rect.encoding {
                encoding::RAW => self.on_raw_rect(&rect).await?,
                encoding::COPY_RECT => {
                    let src_x = self.input.read_u16().await?;
                    let src_y = self.input.read_u16().await?;
                    self.sink
                        .copy_rect(src_x, src_y, rect.x, rect.y, rect.width, rect.height);
                }
                encoding::DESKTOP_SIZE => {
                    debug!(width = rect.width, height = rect.height, "desktop resized");
                    self.screen.resize(rect.width, rect.height);
                    self.sink.resize(rect.width, rect.height);
                }
                other => return Err(RfbError::UnknownEncoding(other)),
            }
        }
        Ok(())
    }

    async fn on_raw_rect(&mut self, rect: &RectHeader) -> Result<(), RfbError> {
        let len =
            usize::from(rect.width) * usize::from(rect.height) * self.screen.bytes_per_pixel();
        if len > MAX_RECT_BYTES {
            return Err(RfbError::ProtocolViolation("raw rectangle impossibly large"));
        }
        let pixels = self.input.read_exact_vec(len).await?;
        self.sink
            .paint_rect(rect.x, rect.y, rect.width, rect.height, &pixels);
        Ok(())
    }

    async fn on_cut_text(&mut self) -> Result<(), RfbError> {
        let mut padding = [0u8; 3];
        self.input.read_bytes(&mut padding).await?;
        let len = self.input.read_u32().await? as usize;
        if len > MAX_CUT_TEXT_LEN {
            return Err(RfbError::ProtocolViolation("cut text impossibly large"));
        }
        let text = String::from_utf8(self.input.read_exact_vec(len).await?)?;
        debug!(len, "server cut text");
        self.sink.clipboard_text(&text);
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::ClientMessage;
    use crate::screen::PixelFormat;
    use crate::stream::IoSource;
    use std::sync::Mutex;
    use tokio::sync::mpsc;
    use tokio_test::io::Builder;

    #[derive(Debug, PartialEq)]
    enum Event {
        Paint(u16, u16, u16, u16, usize),
        Copy(u16, u16, u16, u16, u16, u16),
        Resize(u16, u16),
        Bell,
        Clipboard(String),
    }

    #[derive(Clone)]
    struct RecordingSink(Arc<Mutex<Vec<Event>>>);

    impl RenderSink for RecordingSink {
        fn paint_rect(&mut self, x: u16, y: u16, width: u16, height: u16, pixels: &[u8]) {
            self.0
                .lock()
                .unwrap()
                .push(Event::Paint(x, y, width, height, pixels.len()));
        }
        fn copy_rect(&mut self, src_x: u16, src_y: u16, x: u16, y: u16, width: u16, height: u16) {
            self.0
                .lock()
                .unwrap()
                .push(Event::Copy(src_x, src_y, x, y, width, height));
        }
        fn resize(&mut self, width: u16, height: u16) {
            self.0.lock().unwrap().push(Event::Resize(width, height));
        }
        fn bell(&mut self) {
            self.0.lock().unwrap().push(Event::Bell);
        }
        fn clipboard_text(&mut self, text: &str) {
            self.0.lock().unwrap().push(Event::Clipboard(text.into()));
        }
    }

    struct Fixture {
        receiver: PacketReceiver,
        events: Arc<Mutex<Vec<Event>>>,
        queue: mpsc::Receiver<ClientMessage>,
    }

    fn fixture(wire: Vec<u8>) -> Fixture {
        let screen = ScreenDescription::new();
        screen.populate(800, 600, PixelFormat::default(), "test".into());
        let screen = Arc::new(screen);

        let (tx, queue) = mpsc::channel(crate::sender::OUTBOUND_QUEUE_CAPACITY);
        let sender = SenderHandle::for_tests(tx, screen.clone());
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = RecordingSink(events.clone());

        let input = ReadStream::new(Box::new(IoSource(
            Builder::new().read(&wire).build(),
        )));
        let receiver = PacketReceiver::new(
            input,
            Box::new(sink),
            screen,
            sender,
            Arc::new(AtomicBool::new(true)),
        );
        Fixture {
            receiver,
            events,
            queue,
        }
    }

    fn update_with_raw_rect() -> Vec<u8> {
        let mut wire = vec![0u8, 0]; // FramebufferUpdate + padding
        wire.extend(1u16.to_be_bytes()); // one rectangle
        wire.extend(2u16.to_be_bytes()); // x
        wire.extend(3u16.to_be_bytes()); // y
        wire.extend(10u16.to_be_bytes()); // width
        wire.extend(5u16.to_be_bytes()); // height
        wire.extend(0i32.to_be_bytes()); // RAW
        wire.extend(std::iter::repeat_n(0xAB, 10 * 5 * 4));
        wire
    }

    #[tokio::test]
    async fn raw_rectangle_reaches_the_sink() {
        let mut fx = fixture(update_with_raw_rect());
        // The wire ends after the update, so the loop exits with EOS.
        let err = fx.receiver.run().await.unwrap_err();
        assert!(matches!(err, RfbError::UnexpectedEos));
        assert_eq!(
            *fx.events.lock().unwrap(),
            vec![Event::Paint(2, 3, 10, 5, 200)]
        );
    }

    #[tokio::test]
    async fn copy_rect_and_desktop_size_rectangles() {
        let mut wire = vec![0u8, 0];
        wire.extend(2u16.to_be_bytes());
        // CopyRect to (4,5), 7x8, from (1,2).
        wire.extend(4u16.to_be_bytes());
        wire.extend(5u16.to_be_bytes());
        wire.extend(7u16.to_be_bytes());
        wire.extend(8u16.to_be_bytes());
        wire.extend(1i32.to_be_bytes());
        wire.extend(1u16.to_be_bytes());
        wire.extend(2u16.to_be_bytes());
        // DesktopSize 1024x768.
        wire.extend(0u16.to_be_bytes());
        wire.extend(0u16.to_be_bytes());
        wire.extend(1024u16.to_be_bytes());
        wire.extend(768u16.to_be_bytes());
        wire.extend((-223i32).to_be_bytes());

        let mut fx = fixture(wire);
        let _ = fx.receiver.run().await;

        assert_eq!(
            *fx.events.lock().unwrap(),
            vec![Event::Copy(1, 2, 4, 5, 7, 8), Event::Resize(1024, 768)]
        );
        assert_eq!(fx.receiver.screen.size(), (1024, 768));
    }

    #[tokio::test]
    async fn bell_and_cut_text() {
        let mut wire = vec![2u8]; // Bell
        wire.push(3); // CutText
        wire.extend([0, 0, 0]); // padding
        wire.extend(5u32.to_be_bytes());
        wire.extend(b"hello");

        let mut fx = fixture(wire);
        let _ = fx.receiver.run().await;

        assert_eq!(
            *fx.events.lock().unwrap(),
            vec![Event::Bell, Event::Clipboard("hello".into())]
        );
    }

    #[tokio::test]
    async fn unknown_message_tag_is_fatal() {
        let mut fx = fixture(vec![99u8]);
        match fx.receiver.run().await {
            Err(RfbError::UnknownServerMessage(99)) => {}
            other => panic!("expected UnknownServerMessage, got {other:?}"),
        }
        assert!(!fx.receiver.alive.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn unknown_encoding_is_fatal() {
        let mut wire = vec![0u8, 0];
        wire.extend(1u16.to_be_bytes());
        wire.extend([0u8; 8]); // x, y, w, h
        wire.extend(7i32.to_be_bytes()); // Tight: never negotiated

        let mut fx = fixture(wire);
        match fx.receiver.run().await {
            Err(RfbError::UnknownEncoding(7)) => {}
            other => panic!("expected UnknownEncoding, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn framebuffer_update_rearms_the_throttle() {
        let mut fx = fixture(update_with_raw_rect());
        // Arm the throttle, then let the update clear it.
        fx.receiver.sender.on_frame_rendered().unwrap();
        assert!(fx.queue.try_recv().is_ok());
        fx.receiver.sender.on_frame_rendered().unwrap();
        assert!(fx.queue.try_recv().is_err());

        let _ = fx.receiver.run().await;

        fx.receiver.sender.on_frame_rendered().unwrap();
        assert!(fx.queue.try_recv().is_ok());
    }
}
