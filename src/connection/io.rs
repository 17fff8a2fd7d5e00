//! Buffered connection I/O shared by both exchange variants.
//!
//! [`InputBuf`] is the read half every protocol parser pulls from: a byte
//! buffer over the type-erased socket stream with a two-byte pushback stack,
//! which is all the lookahead the HTTP grammar needs (CRLF peeking). The
//! buffer survives the HTTP-to-WebSocket exchange swap, so bytes the client
//! sent early are never lost.

use std::io;

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, BufWriter};

pub(crate) type ConnReader = Box<dyn AsyncRead + Send + Sync + Unpin>;
pub(crate) type ConnWriter = BufWriter<Box<dyn AsyncWrite + Send + Unpin>>;

pub(crate) struct InputBuf {
    reader: ConnReader,
    buf: BytesMut,
    capacity: usize,
    pushback: [u8; 2],
    pushed: usize,
}

impl InputBuf {
    pub fn new(reader: ConnReader, capacity: usize) -> Self {
        Self { reader, buf: BytesMut::with_capacity(capacity), capacity, pushback: [0; 2], pushed: 0 }
    }

    /// Reads the next byte, or `None` on a clean end of stream.
    pub async fn try_read_u8(&mut self) -> io::Result<Option<u8>> {
        if self.pushed > 0 {
            self.pushed -= 1;
            return Ok(Some(self.pushback[self.pushed]));
        }
        if self.buf.is_empty() && !self.fill().await? {
            return Ok(None);
        }
        Ok(Some(self.buf.get_u8()))
    }

    /// Reads the next byte, failing with `UnexpectedEof` on end of stream.
    pub async fn read_u8(&mut self) -> io::Result<u8> {
        self.try_read_u8()
            .await?
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "Unexpected end of stream"))
    }

    /// Pushes a byte back so the next read returns it. At most two bytes may
    /// be outstanding; pushed bytes are returned last-in first-out.
    pub fn unread(&mut self, byte: u8) {
        debug_assert!(self.pushed < self.pushback.len(), "pushback depth exceeded");
        self.pushback[self.pushed] = byte;
        self.pushed += 1;
    }

    /// Reads into `dst`, returning the number of bytes read; 0 means EOF.
    pub async fn read(&mut self, dst: &mut [u8]) -> io::Result<usize> {
        if dst.is_empty() {
            return Ok(0);
        }

        let mut filled = 0;
        while filled < dst.len() && self.pushed > 0 {
            self.pushed -= 1;
            dst[filled] = self.pushback[self.pushed];
            filled += 1;
        }
        if filled > 0 && self.buf.is_empty() {
            return Ok(filled);
        }

        if self.buf.is_empty() && !self.fill().await? {
            return Ok(filled);
        }

        let take = (dst.len() - filled).min(self.buf.len());
        dst[filled..filled + take].copy_from_slice(&self.buf[..take]);
        self.buf.advance(take);
        Ok(filled + take)
    }

    /// Reads exactly `dst.len()` bytes, failing with `UnexpectedEof` if the
    /// stream ends first. Bytes beyond the buffer are read straight from the
    /// underlying stream to avoid copying large payloads twice.
    pub async fn read_exact(&mut self, dst: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < dst.len() && self.pushed > 0 {
            self.pushed -= 1;
            dst[filled] = self.pushback[self.pushed];
            filled += 1;
        }

        let from_buf = (dst.len() - filled).min(self.buf.len());
        dst[filled..filled + from_buf].copy_from_slice(&self.buf[..from_buf]);
        self.buf.advance(from_buf);
        filled += from_buf;

        if filled < dst.len() {
            self.reader.read_exact(&mut dst[filled..]).await?;
        }
        Ok(())
    }

    async fn fill(&mut self) -> io::Result<bool> {
        self.buf.reserve(self.capacity);
        let n = self.reader.read_buf(&mut self.buf).await?;
        Ok(n > 0)
    }
}
