//! The HTTP response state machine and its output layering.
//!
//! A response moves PENDING -> BODY -> COMPLETE. While PENDING every
//! property is mutable; committing (writing the status line and headers)
//! freezes them and opens the body surface; closing the body completes the
//! response and leaves the connection writer open for the next request.
//!
//! The original stack of stream wrappers (close interception, then chunked
//! framing, then gzip) is expressed here as explicit codec layers inside the
//! write path: handler bytes optionally pass through a buffered gzip encoder,
//! the encoder's output is framed into chunks when chunked transfer encoding
//! is active, and only [`HttpResponse::end`] interprets "close" - it flushes
//! and writes the chunk terminator without ever closing the underlying
//! writer.

use std::io::Write as _;

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

use crate::connection::io::ConnWriter;
use crate::protocol::{HttpError, HttpRequest};

/// Responses shorter than this are not worth gzip-compressing; deflate
/// overhead tends to expand them instead.
const COMPRESS_MIN_SIZE: usize = 850;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    /// Nothing on the wire yet; all properties mutable.
    Pending,
    /// Status line and headers are out; the body surface is open.
    Body,
    /// The body is finished; further writes are an error.
    Complete,
}

/// One in-flight response, borrowing the connection writer for the duration
/// of its request cycle.
pub struct HttpResponse<'c> {
    out: &'c mut ConnWriter,
    state: State,

    status: u16,
    reason: Option<String>,
    headers: Vec<(String, String)>,
    body: bool,
    auto_chunk: bool,
    auto_compress: bool,
    flush_chunks: bool,
    content_length: Option<u64>,
    close_after: bool,
    bytes_written: u64,

    chunked_active: bool,
    gzip: Option<GzEncoder<Vec<u8>>>,

    req_accept_gzip: bool,
    req_connection_close: bool,
}

impl<'c> HttpResponse<'c> {
    pub(crate) fn new(out: &'c mut ConnWriter, request: &HttpRequest) -> Self {
        let req_accept_gzip =
            request.header("accept-encoding").map(|v| v.contains("gzip")).unwrap_or(false);
        let req_connection_close = request.header("connection") == Some("close");

        Self {
            out,
            state: State::Pending,
            status: 200,
            reason: None,
            headers: Vec::new(),
            body: true,
            auto_chunk: true,
            auto_compress: true,
            flush_chunks: false,
            content_length: None,
            close_after: request.close_after(),
            bytes_written: 0,
            chunked_active: false,
            gzip: None,
            req_accept_gzip,
            req_connection_close,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// True once the status line and headers have been written.
    pub fn is_committed(&self) -> bool {
        self.state != State::Pending
    }

    pub fn is_complete(&self) -> bool {
        self.state == State::Complete
    }

    /// The number of encoded body bytes written to the connection so far.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub(crate) fn will_close(&self) -> bool {
        self.close_after
    }

    pub fn status(&mut self, status: u16) -> &mut Self {
        self.status = status;
        self
    }

    pub fn reason(&mut self, reason: impl Into<String>) -> &mut Self {
        self.reason = Some(reason.into());
        self
    }

    /// Adds a response header. Names are lowercased; insertion order is the
    /// order they appear on the wire.
    pub fn header(&mut self, name: &str, value: impl Into<String>) -> &mut Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    pub fn content_type(&mut self, content_type: &str) -> &mut Self {
        self.header("content-type", content_type)
    }

    /// Fixes the body length, switching off chunked framing. A length of
    /// zero means no body at all.
    pub fn content_length(&mut self, length: u64) -> &mut Self {
        self.content_length = Some(length);
        if length > 0 {
            self.auto_chunk = false;
            self.body = true;
        } else {
            self.body = false;
        }
        self
    }

    pub fn chunked(&mut self, chunked: bool) -> &mut Self {
        self.body = true;
        self.auto_chunk = chunked;
        self
    }

    pub fn compress(&mut self, compress: bool) -> &mut Self {
        self.auto_compress = compress;
        self
    }

    pub fn close_after(&mut self, close_after: bool) -> &mut Self {
        self.close_after = close_after;
        self
    }

    /// When set, every chunk is flushed to the socket as it is written.
    /// Required for server-sent events; off by default for throughput.
    pub fn flush_chunks(&mut self, flush_chunks: bool) -> &mut Self {
        self.flush_chunks = flush_chunks;
        self
    }

    /// Commits the response with no body at all.
    pub async fn skip_body(&mut self) -> Result<(), HttpError> {
        if self.state != State::Pending {
            return Err(HttpError::invalid_state("can only skip body in pending state"));
        }
        self.body = false;
        self.begin_response().await
    }

    /// Responds `304 Not Modified` with no body.
    pub async fn respond_no_content(&mut self) -> Result<(), HttpError> {
        self.status = 304;
        self.skip_body().await
    }

    /// Writes a complete string response.
    pub async fn write_string(&mut self, s: &str) -> Result<(), HttpError> {
        self.write_string_part(s, true).await
    }

    /// Writes a string to the body. With `is_final` the response is
    /// completed afterwards, and a small payload is sent with a
    /// content-length instead of compressed chunks.
    pub async fn write_string_part(&mut self, s: &str, is_final: bool) -> Result<(), HttpError> {
        self.check_not_complete()?;

        if self.state == State::Pending {
            if is_final {
                let length = s.len();
                if length < COMPRESS_MIN_SIZE || !self.auto_compress {
                    self.content_length = Some(length as u64);
                    self.auto_compress = false;
                    self.auto_chunk = false;
                }
            }
            self.body = true;
            self.begin_response().await?;
        }

        self.write_body(s.as_bytes()).await?;
        self.flush().await?;

        if is_final {
            self.end().await?;
        }
        Ok(())
    }

    /// Streams a reader into the body to completion.
    pub async fn write_stream<R>(&mut self, reader: R) -> Result<(), HttpError>
    where
        R: AsyncRead + Unpin,
    {
        self.write_stream_part(reader, true).await
    }

    pub async fn write_stream_part<R>(&mut self, mut reader: R, is_final: bool) -> Result<(), HttpError>
    where
        R: AsyncRead + Unpin,
    {
        self.check_not_complete()?;

        if self.state == State::Pending {
            self.body = true;
            self.begin_response().await?;
        }

        let mut buf = vec![0u8; 16 * 1024];
        loop {
            let n = reader.read(&mut buf).await.map_err(HttpError::io)?;
            if n == 0 {
                break;
            }
            self.write_body(&buf[..n]).await?;
        }
        self.flush().await?;

        if is_final {
            self.end().await?;
        }
        Ok(())
    }

    /// The raw body sink: commits the response on first use and appends the
    /// given bytes to the body. Call [`end`](HttpResponse::end) to finish.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), HttpError> {
        self.check_not_complete()?;

        if self.state == State::Pending {
            self.body = true;
            self.begin_response().await?;
        }

        self.write_body(data).await
    }

    /// Flushes buffered body bytes through every active layer down to the
    /// socket.
    pub async fn flush(&mut self) -> Result<(), HttpError> {
        if self.state != State::Body {
            return Ok(());
        }
        let pending = match self.gzip.as_mut() {
            Some(gz) => {
                gz.flush().map_err(HttpError::io)?;
                std::mem::take(gz.get_mut())
            }
            None => Vec::new(),
        };
        self.write_framed(&pending).await?;
        self.out.flush().await.map_err(HttpError::io)?;
        Ok(())
    }

    /// Closes the body surface: finishes compression, writes the chunked
    /// terminator, flushes, and marks the response COMPLETE. The underlying
    /// connection writer stays open.
    pub async fn end(&mut self) -> Result<(), HttpError> {
        match self.state {
            State::Complete => return Ok(()),
            State::Pending => {
                return Err(HttpError::invalid_state("response body was never started"));
            }
            State::Body => {}
        }

        if let Some(gz) = self.gzip.take() {
            let remaining = gz.finish().map_err(HttpError::io)?;
            self.write_framed(&remaining).await?;
        }
        if self.chunked_active {
            self.out.write_all(b"0\r\n\r\n").await.map_err(HttpError::io)?;
            self.bytes_written += 5;
        }
        self.out.flush().await.map_err(HttpError::io)?;
        self.state = State::Complete;
        Ok(())
    }

    /// Emits the status line and header section and opens the body layers.
    async fn begin_response(&mut self) -> Result<(), HttpError> {
        use std::fmt::Write as _;

        if self.state != State::Pending {
            return Err(HttpError::invalid_state("response already committed"));
        }

        if self.body && self.auto_compress {
            if self.req_accept_gzip {
                self.headers.push(("content-encoding".to_owned(), "gzip".to_owned()));
            } else {
                self.auto_compress = false;
            }
        }

        if !self.close_after && self.req_connection_close {
            self.close_after = true;
        }

        let mut head = String::with_capacity(256);
        let _ = write!(head, "HTTP/1.1 {} {}\r\n", self.status, self.reason.as_deref().unwrap_or(""));

        let mut has_connection_header = false;
        for (name, value) in &self.headers {
            has_connection_header |= name == "connection";
            let _ = write!(head, "{name}: {value}\r\n");
        }

        if self.body && self.auto_chunk {
            head.push_str("transfer-encoding: chunked\r\n");
        } else if let Some(length) = self.content_length {
            let _ = write!(head, "content-length: {length}\r\n");
        }

        if self.close_after {
            head.push_str("connection: close\r\n");
        } else if !has_connection_header {
            head.push_str("connection: keep-alive\r\n");
        }
        head.push_str("\r\n");

        self.out.write_all(head.as_bytes()).await.map_err(HttpError::io)?;

        if !self.body {
            self.out.flush().await.map_err(HttpError::io)?;
            self.state = State::Complete;
            return Ok(());
        }

        self.state = State::Body;
        self.chunked_active = self.auto_chunk;
        if self.auto_compress {
            self.gzip = Some(GzEncoder::new(Vec::with_capacity(8192), Compression::default()));
        }
        Ok(())
    }

    async fn write_body(&mut self, data: &[u8]) -> Result<(), HttpError> {
        if data.is_empty() {
            return Ok(());
        }
        let encoded = match self.gzip.as_mut() {
            Some(gz) => {
                gz.write_all(data).map_err(HttpError::io)?;
                Some(std::mem::take(gz.get_mut()))
            }
            None => None,
        };
        match encoded {
            Some(pending) => self.write_framed(&pending).await,
            None => self.write_framed(data).await,
        }
    }

    /// Writes already-encoded body bytes, applying chunked framing when
    /// active. An empty slice writes nothing: a zero-length chunk would read
    /// as the body terminator.
    async fn write_framed(&mut self, data: &[u8]) -> Result<(), HttpError> {
        if data.is_empty() {
            return Ok(());
        }
        if self.chunked_active {
            let size_line = format!("{:X}\r\n", data.len());
            self.out.write_all(size_line.as_bytes()).await.map_err(HttpError::io)?;
            self.out.write_all(data).await.map_err(HttpError::io)?;
            self.out.write_all(b"\r\n").await.map_err(HttpError::io)?;
            self.bytes_written += (size_line.len() + data.len() + 2) as u64;
            if self.flush_chunks {
                self.out.flush().await.map_err(HttpError::io)?;
            }
        } else {
            self.out.write_all(data).await.map_err(HttpError::io)?;
            self.bytes_written += data.len() as u64;
        }
        Ok(())
    }

    fn check_not_complete(&self) -> Result<(), HttpError> {
        if self.state == State::Complete {
            return Err(HttpError::invalid_state("response already completed"));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Header;
    use tokio::io::{AsyncReadExt, BufWriter, DuplexStream};

    fn request(headers: &[(&str, &str)]) -> HttpRequest {
        let mut request = HttpRequest::new("GET".into(), "/".into(), "HTTP/1.1".into());
        for (name, value) in headers {
            request.push_header(Header::new((*name).into(), (*value).into()));
        }
        request
    }

    fn wire() -> (DuplexStream, ConnWriter) {
        let (client, server) = tokio::io::duplex(1024 * 1024);
        let (_read_half, write_half) = tokio::io::split(server);
        let out: ConnWriter = BufWriter::with_capacity(8192, Box::new(write_half));
        (client, out)
    }

    async fn written(out: ConnWriter, mut client: DuplexStream) -> Vec<u8> {
        drop(out);
        let mut bytes = Vec::new();
        client.read_to_end(&mut bytes).await.unwrap();
        bytes
    }

    #[tokio::test]
    async fn small_final_string_uses_content_length() {
        let (client, mut out) = wire();
        let req = request(&[("Accept-Encoding", "gzip")]);
        let mut response = HttpResponse::new(&mut out, &req);
        response.write_string("Hello World!").await.unwrap();
        assert!(response.is_complete());
        drop(response);

        assert_eq!(
            written(out, client).await,
            b"HTTP/1.1 200 \r\ncontent-length: 12\r\nconnection: keep-alive\r\n\r\nHello World!"
        );
    }

    #[tokio::test]
    async fn connection_close_request_closes_response() {
        let (client, mut out) = wire();
        let req = request(&[("Connection", "close")]);
        let mut response = HttpResponse::new(&mut out, &req);
        response.write_string("bye").await.unwrap();
        assert!(response.will_close());
        drop(response);

        assert_eq!(
            written(out, client).await,
            b"HTTP/1.1 200 \r\ncontent-length: 3\r\nconnection: close\r\n\r\nbye"
        );
    }

    #[tokio::test]
    async fn headers_keep_insertion_order() {
        let (client, mut out) = wire();
        let req = request(&[]);
        let mut response = HttpResponse::new(&mut out, &req);
        response
            .status(404)
            .header("content-type", "text/plain")
            .header("x-first", "1")
            .header("X-Second", "2");
        response.write_string("Not found.").await.unwrap();
        drop(response);

        let expected: &[u8] = b"HTTP/1.1 404 \r\ncontent-type: text/plain\r\nx-first: 1\r\nx-second: 2\r\ncontent-length: 10\r\nconnection: keep-alive\r\n\r\nNot found.";
        assert_eq!(written(out, client).await, expected);
    }

    #[tokio::test]
    async fn reason_phrase_is_emitted() {
        let (client, mut out) = wire();
        let req = request(&[]);
        let mut response = HttpResponse::new(&mut out, &req);
        response.reason("OK");
        response.write_string("x").await.unwrap();
        drop(response);

        assert!(written(out, client).await.starts_with(b"HTTP/1.1 200 OK\r\n"));
    }

    #[tokio::test]
    async fn skip_body_completes_without_body() {
        let (client, mut out) = wire();
        let req = request(&[]);
        let mut response = HttpResponse::new(&mut out, &req);
        response.status(304);
        response.skip_body().await.unwrap();
        assert!(response.is_complete());
        drop(response);

        assert_eq!(written(out, client).await, b"HTTP/1.1 304 \r\nconnection: keep-alive\r\n\r\n");
    }

    #[tokio::test]
    async fn chunked_body_has_hex_framing_and_terminator() {
        let (client, mut out) = wire();
        let req = request(&[]);
        let mut response = HttpResponse::new(&mut out, &req);
        response.compress(false).chunked(true);
        response.write(b"hello, ").await.unwrap();
        response.write(b"world").await.unwrap();
        response.end().await.unwrap();
        drop(response);

        let expected: &[u8] = b"HTTP/1.1 200 \r\ntransfer-encoding: chunked\r\nconnection: keep-alive\r\n\r\n7\r\nhello, \r\n5\r\nworld\r\n0\r\n\r\n";
        assert_eq!(written(out, client).await, expected);
    }

    #[tokio::test]
    async fn empty_writes_do_not_emit_chunks() {
        let (client, mut out) = wire();
        let req = request(&[]);
        let mut response = HttpResponse::new(&mut out, &req);
        response.compress(false).chunked(true);
        response.write(b"").await.unwrap();
        response.write(b"data").await.unwrap();
        response.write(b"").await.unwrap();
        response.end().await.unwrap();
        drop(response);

        let bytes = written(out, client).await;
        assert_eq!(&bytes[find_body(&bytes)..], b"4\r\ndata\r\n0\r\n\r\n");
    }

    #[tokio::test]
    async fn large_string_is_gzipped_when_accepted() {
        let payload = "abcdefgh".repeat(200);

        let (client, mut out) = wire();
        let req = request(&[("Accept-Encoding", "gzip")]);
        let mut response = HttpResponse::new(&mut out, &req);
        response.write_string(&payload).await.unwrap();
        drop(response);

        let bytes = written(out, client).await;
        let head = String::from_utf8_lossy(&bytes[..find_body(&bytes)]).to_string();
        assert!(head.contains("content-encoding: gzip"));
        assert!(head.contains("transfer-encoding: chunked"));

        let body = dechunk(&bytes[find_body(&bytes)..]);
        let mut decoder = flate2::read::GzDecoder::new(&body[..]);
        let mut decoded = String::new();
        std::io::Read::read_to_string(&mut decoder, &mut decoded).unwrap();
        assert_eq!(decoded, payload);
    }

    #[tokio::test]
    async fn compression_needs_accept_encoding() {
        let payload = "abcdefgh".repeat(200);

        let (client, mut out) = wire();
        let req = request(&[]);
        let mut response = HttpResponse::new(&mut out, &req);
        response.write_string(&payload).await.unwrap();
        drop(response);

        let bytes = written(out, client).await;
        let head = String::from_utf8_lossy(&bytes[..find_body(&bytes)]).to_string();
        assert!(!head.contains("content-encoding"));
        assert!(head.contains(&format!("content-length: {}", payload.len())));
        assert!(bytes.ends_with(payload.as_bytes()));
    }

    #[tokio::test]
    async fn write_after_complete_is_an_error() {
        let (client, mut out) = wire();
        let req = request(&[]);
        let mut response = HttpResponse::new(&mut out, &req);
        response.write_string("done").await.unwrap();
        let err = response.write_string("more").await.unwrap_err();
        assert!(matches!(err, HttpError::InvalidState { .. }));
        drop(response);
        drop(written(out, client).await);
    }

    #[tokio::test]
    async fn explicit_connection_header_suppresses_keep_alive() {
        let (client, mut out) = wire();
        let req = request(&[]);
        let mut response = HttpResponse::new(&mut out, &req);
        response.status(101).header("connection", "Upgrade").header("upgrade", "websocket");
        response.skip_body().await.unwrap();
        drop(response);

        assert_eq!(
            written(out, client).await,
            b"HTTP/1.1 101 \r\nconnection: Upgrade\r\nupgrade: websocket\r\n\r\n"
        );
    }

    #[tokio::test]
    async fn write_stream_pipes_reader_to_body() {
        let (client, mut out) = wire();
        let req = request(&[]);
        let mut response = HttpResponse::new(&mut out, &req);
        response.compress(false);
        response.write_stream(&b"streamed contents"[..]).await.unwrap();
        assert!(response.is_complete());
        drop(response);

        let bytes = written(out, client).await;
        assert_eq!(dechunk(&bytes[find_body(&bytes)..]), b"streamed contents");
    }

    #[tokio::test]
    async fn bytes_written_tracks_encoded_output() {
        let (client, mut out) = wire();
        let req = request(&[]);
        let mut response = HttpResponse::new(&mut out, &req);
        response.compress(false).content_length(4);
        response.write(b"abcd").await.unwrap();
        response.end().await.unwrap();
        assert_eq!(response.bytes_written(), 4);
        drop(response);
        drop(written(out, client).await);
    }

    fn find_body(bytes: &[u8]) -> usize {
        bytes.windows(4).position(|w| w == b"\r\n\r\n").map(|i| i + 4).unwrap()
    }

    /// Minimal chunked-transfer decoder for assertions.
    fn dechunk(mut body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let line_end = body.windows(2).position(|w| w == b"\r\n").unwrap();
            let size =
                usize::from_str_radix(std::str::from_utf8(&body[..line_end]).unwrap(), 16).unwrap();
            body = &body[line_end + 2..];
            if size == 0 {
                break;
            }
            out.extend_from_slice(&body[..size]);
            body = &body[size + 2..];
        }
        out
    }
}
