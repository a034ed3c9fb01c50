//! External rendering boundary.

/// Receives decoded screen effects from the receiver loop.
///
/// Implementations own the actual framebuffer — a canvas, an encoder
/// toward a browser, a test recorder. The receiver calls these methods
/// from its own task, one at a time, in wire order.
pub trait RenderSink: Send {
    /// A decoded RAW rectangle. `pixels` holds `width * height` pixels
    /// in the negotiated format, rows top to bottom.
    fn paint_rect(&mut self, x: u16, y: u16, width: u16, height: u16, pixels: &[u8]);

    /// Copy a region from elsewhere in the framebuffer.
    fn copy_rect(&mut self, src_x: u16, src_y: u16, x: u16, y: u16, width: u16, height: u16);

    /// The remote desktop size: called once with the negotiated size
    /// before any rectangle, then again on every desktop resize.
    fn resize(&mut self, width: u16, height: u16);

    /// The server rang the bell.
    fn bell(&mut self) {}

    /// The server published clipboard text.
    fn clipboard_text(&mut self, _text: &str) {}
}
