//! Sliding-window buffered transport streams.
//!
//! One [`ReadStream`] and one [`WriteStream`] exist per session, each
//! owning a fixed-capacity buffer over a byte source/sink. The RFB wire
//! format is parsed directly out of the read window; client messages are
//! staged in the write buffer and pushed out with an explicit flush.
//!
//! ## Read window
//!
//! ```text
//!             pos            end
//!              │              │
//!  ┌───────────▼──────────────▼──────────────┐
//!  │ consumed  │ unread bytes │  free tail   │
//!  └───────────┴──────────────┴──────────────┘
//!  0                                  capacity
//! ```
//!
//! Invariant: `pos <= end <= capacity`. When the unread window is smaller
//! than a requested item, the window is compacted to the buffer start and
//! the free tail is refilled from the source until the item fits. An item
//! larger than the whole buffer is a configuration error, not a reason to
//! loop. A source read of 0 bytes while more data is expected is an
//! end-of-stream condition and always fatal.

use std::io;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::RfbError;

/// Default buffer capacity for plaintext streams.
pub const DEFAULT_STREAM_CAPACITY: usize = 16 * 1024;

// ── Byte source / sink seam ──────────────────────────────────────

/// Byte-oriented source feeding a [`ReadStream`].
///
/// Implemented by socket read halves and by the TLS tunnel's record
/// unwrapper, so the protocol code never cares which one it is on.
#[async_trait]
pub trait ByteSource: Send {
    /// Read up to `buf.len()` bytes. Returns 0 only at end of stream.
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Byte-oriented sink draining a [`WriteStream`].
#[async_trait]
pub trait ByteSink: Send {
    /// Write a prefix of `buf`, returning how many bytes were accepted.
    async fn send(&mut self, buf: &[u8]) -> io::Result<usize>;
}

/// Adapter exposing any tokio reader as a [`ByteSource`].
pub struct IoSource<R>(pub R);

#[async_trait]
impl<R: AsyncRead + Unpin + Send> ByteSource for IoSource<R> {
    async fn recv(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf).await
    }
}

/// Adapter exposing any tokio writer as a [`ByteSink`].
pub struct IoSink<W>(pub W);

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ByteSink for IoSink<W> {
    async fn send(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf).await
    }
}

// ── ReadStream ───────────────────────────────────────────────────

/// Inbound half of the transport: a compacting window buffer with typed
/// big-endian reads.
pub struct ReadStream {
    src: Box<dyn ByteSource>,
    buf: Vec<u8>,
    /// Read cursor within `buf`.
    pos: usize,
    /// High-water mark of valid bytes in `buf`.
    end: usize,
    /// Monotonic count of bytes consumed from the wire (diagnostics).
    consumed: u64,
}

impl ReadStream {
    /// Wrap a source with the default buffer capacity.
    pub fn new(src: Box<dyn ByteSource>) -> Self {
        Self::with_capacity(src, DEFAULT_STREAM_CAPACITY)
    }

    /// Wrap a source with an explicit buffer capacity.
    pub fn with_capacity(src: Box<dyn ByteSource>, capacity: usize) -> Self {
        Self {
            src,
            buf: vec![0u8; capacity],
            pos: 0,
            end: 0,
            consumed: 0,
        }
    }

    /// Unread bytes currently buffered.
    fn window(&self) -> usize {
        self.end - self.pos
    }

    /// Non-blocking check whether `n` bytes are already buffered.
    pub fn try_has_bytes(&self, n: usize) -> bool {
        self.window() >= n
    }

    /// Total bytes consumed from the wire so far.
    pub fn bytes_consumed(&self) -> u64 {
        self.consumed
    }

    /// Ensure the unread window covers at least `need` bytes, compacting
    /// and refilling as required.
    async fn fill(&mut self, need: usize) -> Result<(), RfbError> {
        if need > self.buf.len() {
            return Err(RfbError::ItemTooLarge {
                size: need,
                capacity: self.buf.len(),
            });
        }
        if self.window() >= need {
            return Ok(());
        }
        // Compact the unread window to the buffer start to free the tail.
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.end, 0);
            self.end -= self.pos;
            self.pos = 0;
        }
        while self.window() < need {
            let n = self.src.recv(&mut self.buf[self.end..]).await?;
            if n == 0 {
                return Err(RfbError::UnexpectedEos);
            }
            self.end += n;
        }
        Ok(())
    }

    /// Read a 1–4 byte network-byte-order unsigned integer.
    pub async fn read_uint(&mut self, bytes: usize) -> Result<u32, RfbError> {
        debug_assert!((1..=4).contains(&bytes));
        self.fill(bytes).await?;
        let mut value = 0u32;
        for i in 0..bytes {
            value = (value << 8) | u32::from(self.buf[self.pos + i]);
        }
        self.pos += bytes;
        self.consumed += bytes as u64;
        Ok(value)
    }

    pub async fn read_u8(&mut self) -> Result<u8, RfbError> {
        Ok(self.read_uint(1).await? as u8)
    }

    pub async fn read_u16(&mut self) -> Result<u16, RfbError> {
        Ok(self.read_uint(2).await? as u16)
    }

    pub async fn read_u32(&mut self) -> Result<u32, RfbError> {
        self.read_uint(4).await
    }

    pub async fn read_i32(&mut self) -> Result<i32, RfbError> {
        Ok(self.read_uint(4).await? as i32)
    }

    /// Copy exactly `dst.len()` bytes, refilling as needed. Payloads
    /// larger than the buffer are drained in windowed chunks.
    pub async fn read_bytes(&mut self, dst: &mut [u8]) -> Result<(), RfbError> {
        let mut filled = 0;
        while filled < dst.len() {
            if self.window() == 0 {
                self.fill(1).await?;
            }
            let n = self.window().min(dst.len() - filled);
            dst[filled..filled + n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
            self.pos += n;
            self.consumed += n as u64;
            filled += n;
        }
        Ok(())
    }

    /// Read exactly `len` bytes into a fresh vector.
    pub async fn read_exact_vec(&mut self, len: usize) -> Result<Vec<u8>, RfbError> {
        let mut v = vec![0u8; len];
        self.read_bytes(&mut v).await?;
        Ok(v)
    }

    /// Copy whatever is available — buffered bytes first, otherwise one
    /// source read — up to `dst.len()`. Used by the TLS tunnel, which
    /// cannot know record boundaries before unwrapping.
    pub async fn read_available(&mut self, dst: &mut [u8]) -> Result<usize, RfbError> {
        if self.window() == 0 {
            self.fill(1).await?;
        }
        let n = self.window().min(dst.len());
        dst[..n].copy_from_slice(&self.buf[self.pos..self.pos + n]);
        self.pos += n;
        self.consumed += n as u64;
        Ok(n)
    }
}

// ── WriteStream ──────────────────────────────────────────────────

/// Outbound half of the transport: local staging buffer with typed
/// big-endian writes and an explicit drain-to-sink flush.
pub struct WriteStream {
    sink: Box<dyn ByteSink>,
    buf: Vec<u8>,
    /// Write cursor: bytes staged and not yet flushed.
    pos: usize,
    /// Monotonic count of bytes flushed to the wire (diagnostics).
    flushed: u64,
}

impl WriteStream {
    /// Wrap a sink with the default buffer capacity.
    pub fn new(sink: Box<dyn ByteSink>) -> Self {
        Self::with_capacity(sink, DEFAULT_STREAM_CAPACITY)
    }

    /// Wrap a sink with an explicit buffer capacity.
    pub fn with_capacity(sink: Box<dyn ByteSink>, capacity: usize) -> Self {
        Self {
            sink,
            buf: vec![0u8; capacity],
            pos: 0,
            flushed: 0,
        }
    }

    /// Total bytes flushed to the wire so far.
    pub fn bytes_flushed(&self) -> u64 {
        self.flushed
    }

    /// Stage a 1–4 byte network-byte-order unsigned integer, flushing
    /// first when the buffer has no room for it.
    pub async fn write_uint(&mut self, bytes: usize, value: u32) -> Result<(), RfbError> {
        debug_assert!((1..=4).contains(&bytes));
        if self.buf.len() - self.pos < bytes {
            self.flush().await?;
            if self.buf.len() < bytes {
                return Err(RfbError::ItemTooLarge {
                    size: bytes,
                    capacity: self.buf.len(),
                });
            }
        }
        for i in (0..bytes).rev() {
            self.buf[self.pos] = (value >> (8 * i)) as u8;
            self.pos += 1;
        }
        Ok(())
    }

    pub async fn write_u8(&mut self, value: u8) -> Result<(), RfbError> {
        self.write_uint(1, u32::from(value)).await
    }

    pub async fn write_u16(&mut self, value: u16) -> Result<(), RfbError> {
        self.write_uint(2, u32::from(value)).await
    }

    pub async fn write_u32(&mut self, value: u32) -> Result<(), RfbError> {
        self.write_uint(4, value).await
    }

    pub async fn write_i32(&mut self, value: i32) -> Result<(), RfbError> {
        self.write_uint(4, value as u32).await
    }

    /// Stage an arbitrary byte run, flushing between chunks when it is
    /// larger than the remaining room.
    pub async fn write_bytes(&mut self, src: &[u8]) -> Result<(), RfbError> {
        let mut rest = src;
        while !rest.is_empty() {
            if self.pos == self.buf.len() {
                self.flush().await?;
            }
            let n = (self.buf.len() - self.pos).min(rest.len());
            self.buf[self.pos..self.pos + n].copy_from_slice(&rest[..n]);
            self.pos += n;
            rest = &rest[n..];
        }
        Ok(())
    }

    /// Drain the staged bytes to the sink and reset the cursor. A sink
    /// write of 0 bytes means the peer is gone and is fatal.
    pub async fn flush(&mut self) -> Result<(), RfbError> {
        let mut sent = 0;
        while sent < self.pos {
            let n = self.sink.send(&self.buf[sent..self.pos]).await?;
            if n == 0 {
                return Err(RfbError::UnexpectedEos);
            }
            sent += n;
        }
        self.flushed += self.pos as u64;
        self.pos = 0;
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    fn reader_from(chunks: &[&[u8]], capacity: usize) -> ReadStream {
        let mut b = Builder::new();
        for c in chunks {
            b.read(c);
        }
        ReadStream::with_capacity(Box::new(IoSource(b.build())), capacity)
    }

    #[tokio::test]
    async fn typed_reads_across_chunk_boundaries() {
        // 1 + 2 + 4 bytes, delivered one byte at a time.
        let bytes = [0x01, 0x00, 0x02, 0xDE, 0xAD, 0xBE, 0xEF];
        let chunks: Vec<&[u8]> = bytes.chunks(1).collect();
        let mut s = reader_from(&chunks, 8);

        assert_eq!(s.read_u8().await.unwrap(), 0x01);
        assert_eq!(s.read_u16().await.unwrap(), 0x0002);
        assert_eq!(s.read_u32().await.unwrap(), 0xDEAD_BEEF);
        assert_eq!(s.bytes_consumed(), 7);
    }

    #[tokio::test]
    async fn read_uint_24_bits() {
        let mut s = reader_from(&[&[0x01, 0x02, 0x03]], 8);
        assert_eq!(s.read_uint(3).await.unwrap(), 0x0001_0203);
    }

    #[tokio::test]
    async fn compaction_reassembles_logical_stream() {
        // Total larger than the buffer, delivered in ragged chunks, read
        // back in mixed item sizes: the logical stream must be intact.
        let seed: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let chunks: Vec<&[u8]> = seed.chunks(7).collect();
        let mut s = reader_from(&chunks, 16);

        let mut out = Vec::with_capacity(seed.len());
        let mut i = 0;
        while out.len() < seed.len() {
            match i % 3 {
                0 => out.push(s.read_u8().await.unwrap()),
                1 => out.extend(s.read_u16().await.unwrap().to_be_bytes()),
                _ => {
                    let n = 5.min(seed.len() - out.len());
                    out.extend(s.read_exact_vec(n).await.unwrap());
                }
            }
            i += 1;
        }
        assert_eq!(out, seed);
        assert_eq!(s.bytes_consumed(), seed.len() as u64);
    }

    #[tokio::test]
    async fn read_bytes_larger_than_buffer() {
        let seed: Vec<u8> = (0..200u8).collect();
        let chunks: Vec<&[u8]> = seed.chunks(33).collect();
        let mut s = reader_from(&chunks, 16);

        let mut dst = vec![0u8; 200];
        s.read_bytes(&mut dst).await.unwrap();
        assert_eq!(dst, seed);
    }

    #[tokio::test]
    async fn item_larger_than_buffer_is_fatal() {
        let mut s = reader_from(&[&[0u8; 4]], 3);
        match s.read_u32().await {
            Err(RfbError::ItemTooLarge { size: 4, capacity: 3 }) => {}
            other => panic!("expected ItemTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn zero_byte_read_is_end_of_stream() {
        // One byte delivered, then the source ends while a u16 is pending.
        let mut s = reader_from(&[&[0xFF]], 8);
        match s.read_u16().await {
            Err(RfbError::UnexpectedEos) => {}
            other => panic!("expected UnexpectedEos, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn try_has_bytes_is_non_blocking() {
        let mut s = reader_from(&[&[1, 2, 3]], 8);
        assert!(!s.try_has_bytes(1));
        assert_eq!(s.read_u8().await.unwrap(), 1);
        // The whole 3-byte chunk was buffered by the refill.
        assert!(s.try_has_bytes(2));
        assert!(!s.try_has_bytes(3));
    }

    #[tokio::test]
    async fn write_stages_until_flush_and_survives_partial_sends() {
        // The mock acknowledges the staged bytes in two partial writes.
        let mock = Builder::new()
            .write(&[0x07, 0x01, 0x02])
            .write(&[0x00, 0x00, 0x00, 0x2A])
            .build();
        let mut s = WriteStream::with_capacity(Box::new(IoSink(mock)), 16);

        s.write_u8(0x07).await.unwrap();
        s.write_u16(0x0102).await.unwrap();
        s.write_u32(42).await.unwrap();
        assert_eq!(s.bytes_flushed(), 0);

        s.flush().await.unwrap();
        assert_eq!(s.bytes_flushed(), 7);
    }

    #[tokio::test]
    async fn write_flushes_when_buffer_has_no_room() {
        let mock = Builder::new()
            .write(&[0xAA, 0xBB, 0xCC, 0xDD])
            .write(&[0x01, 0x02])
            .build();
        let mut s = WriteStream::with_capacity(Box::new(IoSink(mock)), 4);

        s.write_u32(0xAABB_CCDD).await.unwrap();
        // No room left for a u16: the staged word is flushed first.
        s.write_u16(0x0102).await.unwrap();
        s.flush().await.unwrap();
        assert_eq!(s.bytes_flushed(), 6);
    }

    #[tokio::test]
    async fn write_bytes_chunks_runs_larger_than_buffer() {
        let payload: Vec<u8> = (0..10u8).collect();
        let mock = Builder::new()
            .write(&payload[0..4])
            .write(&payload[4..8])
            .write(&payload[8..10])
            .build();
        let mut s = WriteStream::with_capacity(Box::new(IoSink(mock)), 4);

        s.write_bytes(&payload).await.unwrap();
        s.flush().await.unwrap();
        assert_eq!(s.bytes_flushed(), 10);
    }
}
