//! Readable adapters for the two request body framings.
//!
//! Both adapters present a plain byte-stream view of the body and both leave
//! the underlying connection open: finishing or discarding a body only ever
//! consumes bytes. Draining an unread body is what keeps the connection
//! usable for the next request in a keep-alive pipeline.

use bytes::{Buf, Bytes};

use crate::codec::HttpInput;
use crate::protocol::{BodyMode, HttpError, HttpRequest};

/// The request body as a readable stream.
pub(crate) enum RequestBody {
    /// The request declared no body.
    None,
    /// Reads at most `remaining` bytes, EOF thereafter.
    Fixed { remaining: u64 },
    /// Pulls chunks on demand, EOF after the terminal chunk.
    Chunked { current: Bytes, eof: bool },
}

impl RequestBody {
    pub fn for_request(request: &HttpRequest) -> Self {
        match request.body_mode() {
            BodyMode::None => Self::None,
            BodyMode::FixedLength(length) => Self::Fixed { remaining: length },
            BodyMode::Chunked => Self::Chunked { current: Bytes::new(), eof: false },
        }
    }

    /// Reads body bytes into `dst`; returns 0 at end of body.
    pub async fn read(
        &mut self,
        input: &mut HttpInput,
        max_chunk_size: usize,
        dst: &mut [u8],
    ) -> Result<usize, HttpError> {
        if dst.is_empty() {
            return Ok(0);
        }
        match self {
            Self::None => Ok(0),
            Self::Fixed { remaining } => {
                if *remaining == 0 {
                    return Ok(0);
                }
                let want = (dst.len() as u64).min(*remaining) as usize;
                let n = input.io_mut().read(&mut dst[..want]).await?;
                if n == 0 {
                    // peer closed early; present EOF and leave nothing owed
                    *remaining = 0;
                    return Ok(0);
                }
                *remaining -= n as u64;
                Ok(n)
            }
            Self::Chunked { current, eof } => {
                if *eof {
                    return Ok(0);
                }
                while current.is_empty() {
                    let chunk = input.read_chunk(max_chunk_size).await?;
                    if chunk.is_last() {
                        *eof = true;
                        return Ok(0);
                    }
                    *current = chunk.into_data();
                }
                let take = dst.len().min(current.len());
                dst[..take].copy_from_slice(&current[..take]);
                current.advance(take);
                Ok(take)
            }
        }
    }

    /// Reads the whole remaining body into a vector.
    pub async fn read_to_end(
        &mut self,
        input: &mut HttpInput,
        max_chunk_size: usize,
    ) -> Result<Vec<u8>, HttpError> {
        let mut body = Vec::new();
        let mut buf = [0u8; 8 * 1024];
        loop {
            let n = self.read(input, max_chunk_size, &mut buf).await?;
            if n == 0 {
                return Ok(body);
            }
            body.extend_from_slice(&buf[..n]);
        }
    }

    /// Consumes and discards whatever the handler left unread, so the next
    /// request in the pipeline starts at the right byte.
    pub async fn drain(
        &mut self,
        input: &mut HttpInput,
        max_chunk_size: usize,
    ) -> Result<(), HttpError> {
        let mut buf = [0u8; 4096];
        loop {
            let n = self.read(input, max_chunk_size, &mut buf).await?;
            if n == 0 {
                return Ok(());
            }
        }
    }
}
