//! Terminal-side render sink: keeps the framebuffer in memory and logs
//! what the server sends, so a console endpoint can be probed without a
//! display attached.

use spyglass_core::RenderSink;
use tracing::{debug, info};

/// In-memory framebuffer plus per-session counters.
pub struct ProbeSink {
    width: usize,
    height: usize,
    bytes_per_pixel: usize,
    framebuffer: Vec<u8>,
    rects: u64,
    pixel_bytes: u64,
}

impl ProbeSink {
    pub fn new(bytes_per_pixel: usize) -> Self {
        Self {
            width: 0,
            height: 0,
            bytes_per_pixel,
            framebuffer: Vec::new(),
            rects: 0,
            pixel_bytes: 0,
        }
    }

    fn row_len(&self) -> usize {
        self.width * self.bytes_per_pixel
    }
}

impl Drop for ProbeSink {
    fn drop(&mut self) {
        info!(
            rects = self.rects,
            pixel_bytes = self.pixel_bytes,
            "session totals"
        );
    }
}

impl RenderSink for ProbeSink {
    fn paint_rect(&mut self, x: u16, y: u16, width: u16, height: u16, pixels: &[u8]) {
        self.rects += 1;
        self.pixel_bytes += pixels.len() as u64;
        debug!(x, y, width, height, rects = self.rects, "paint");

        // Blit into the local framebuffer, clipping at its edges.
        let bpp = self.bytes_per_pixel;
        let rect_row = usize::from(width) * bpp;
        for row in 0..usize::from(height) {
            let dst_y = usize::from(y) + row;
            if dst_y >= self.height {
                break;
            }
            let dst_x = usize::from(x) * bpp;
            let dst_start = dst_y * self.row_len() + dst_x;
            let copy = rect_row.min(self.row_len().saturating_sub(dst_x));
            let src_start = row * rect_row;
            self.framebuffer[dst_start..dst_start + copy]
                .copy_from_slice(&pixels[src_start..src_start + copy]);
        }
    }

    fn copy_rect(&mut self, src_x: u16, src_y: u16, x: u16, y: u16, width: u16, height: u16) {
        self.rects += 1;
        debug!(src_x, src_y, x, y, width, height, "copy");

        let bpp = self.bytes_per_pixel;
        let rect_row = (usize::from(width) * bpp).min(self.row_len());
        // Row-by-row move; ranges may overlap, so go through a scratch row.
        let mut scratch = vec![0u8; rect_row];
        for row in 0..usize::from(height) {
            let from_y = usize::from(src_y) + row;
            let to_y = usize::from(y) + row;
            if from_y >= self.height || to_y >= self.height {
                break;
            }
            let from = from_y * self.row_len() + usize::from(src_x) * bpp;
            let to = to_y * self.row_len() + usize::from(x) * bpp;
            if from + rect_row > self.framebuffer.len() || to + rect_row > self.framebuffer.len() {
                break;
            }
            scratch.copy_from_slice(&self.framebuffer[from..from + rect_row]);
            self.framebuffer[to..to + rect_row].copy_from_slice(&scratch);
        }
    }

    fn resize(&mut self, width: u16, height: u16) {
        info!(width, height, "desktop resized");
        self.width = usize::from(width);
        self.height = usize::from(height);
        self.framebuffer = vec![0u8; self.width * self.height * self.bytes_per_pixel];
    }

    fn bell(&mut self) {
        info!("bell");
    }

    fn clipboard_text(&mut self, text: &str) {
        info!(len = text.len(), "server clipboard update");
    }
}

// ── Tests ────────────────────────────────────────────────────────
