//! Streaming HTTP/1.1 request parser following RFC 9112.
//!
//! The parser pulls bytes one at a time from the connection's [`InputBuf`],
//! using its two-byte pushback for the lookahead the grammar needs. Raw
//! message parsing lives here; semantic validation (Host requirements, body
//! framing) happens afterwards in [`HttpRequest::prepare`].

use crate::connection::io::InputBuf;
use crate::ensure;
use crate::protocol::{Chunk, Header, HttpError, HttpRequest};
use bytes::Bytes;
use tracing::trace;

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const SP: u8 = b' ';
const HTAB: u8 = b'\t';

const MAX_REQUEST_LINE_LENGTH: usize = 8000;
const MAX_HEADER_NAME_LENGTH: usize = 1024;
const MAX_HEADER_VALUE_LENGTH: usize = 8192;
// possibly almost 2mb of request header data, nothing valid should come close
const MAX_HEADERS: usize = 200;

pub struct HttpInput {
    io: InputBuf,
}

impl HttpInput {
    pub(crate) fn new(io: InputBuf) -> Self {
        Self { io }
    }

    pub(crate) fn into_io(self) -> InputBuf {
        self.io
    }

    pub(crate) fn io_mut(&mut self) -> &mut InputBuf {
        &mut self.io
    }

    /// Reads and parses one request message: request-line plus header
    /// section, per RFC 9112 Sections 2, 3 and 5.
    ///
    /// Returns `Ok(None)` if the stream ends before a request begins; the
    /// client simply closed the connection. An EOF in the middle of a
    /// request surfaces as an `UnexpectedEof` I/O error.
    pub async fn read_request(&mut self) -> Result<Option<HttpRequest>, HttpError> {
        // Section 2.2: ignore leading CRLF(s) before the request-line
        if !self.skip_leading_crlf().await? {
            return Ok(None);
        }

        // Section 3: request-line = method SP request-target SP HTTP-version CRLF
        let method = self.read_method().await?;
        self.expect_sp().await?;
        let target = self.read_target().await?;
        self.expect_sp().await?;
        let version = self.read_version().await?;
        self.expect_crlf().await?;

        trace!(method = %method, target = %target, "parsed request line");

        let mut request = HttpRequest::new(method, target, version);

        // Section 5: header fields until the empty line
        self.read_headers(&mut request).await?;

        Ok(Some(request))
    }

    /// Reads the next chunk of a chunked Transfer-Encoding body, per
    /// RFC 9112 Section 7.1:
    ///
    /// ```text
    /// chunked-body = *chunk last-chunk trailer-section CRLF
    /// chunk        = chunk-size [ chunk-ext ] CRLF chunk-data CRLF
    /// last-chunk   = 1*"0" [ chunk-ext ] CRLF
    /// ```
    ///
    /// Check [`Chunk::is_last`] to detect the terminal chunk; no further
    /// `read_chunk` calls may be made for this body afterwards.
    pub async fn read_chunk(&mut self, max_size: usize) -> Result<Chunk, HttpError> {
        let chunk_size = self.read_chunk_size().await?;
        let extensions = self.read_chunk_extensions().await?;
        self.expect_crlf().await?;

        if chunk_size == 0 {
            // terminal chunk: trailer-section then the final CRLF
            let trailers = self.read_trailer_section().await?;
            return Ok(Chunk::last(extensions, trailers));
        }

        if chunk_size > max_size as u64 {
            return Err(HttpError::bad_request(format!("Chunk size too large: {chunk_size}")));
        }

        let mut data = vec![0u8; chunk_size as usize];
        self.io.read_exact(&mut data).await?;
        self.expect_crlf().await?;

        trace!(len = data.len(), "read chunk");
        Ok(Chunk::data_chunk(Bytes::from(data), extensions))
    }

    /// chunk-size = 1*HEXDIG. Recipients MUST anticipate large hexadecimal
    /// numerals and prevent integer overflow; 16 digits is the 64-bit limit.
    async fn read_chunk_size(&mut self) -> Result<u64, HttpError> {
        let mut digit_count = 0u32;
        let mut size = 0u64;
        loop {
            let b = self.io.read_u8().await?;
            let digit = match hex_digit_value(b) {
                Some(digit) => digit,
                None => {
                    self.io.unread(b);
                    break;
                }
            };
            digit_count += 1;
            ensure!(digit_count <= 16, HttpError::bad_request("Chunk size field too long"));
            size = (size << 4) | digit as u64;
        }
        ensure!(digit_count > 0, HttpError::bad_request("Missing chunk-size"));
        Ok(size)
    }

    /// chunk-ext = *( BWS ";" BWS chunk-ext-name [ BWS "=" BWS chunk-ext-val ] )
    ///
    /// Unrecognized extensions are collected (insertion order, last value
    /// wins per name) but never acted on, as the RFC requires.
    async fn read_chunk_extensions(&mut self) -> Result<Vec<(String, Option<String>)>, HttpError> {
        let mut extensions: Vec<(String, Option<String>)> = Vec::new();

        loop {
            let b = self.io.read_u8().await?;
            if b == CR || b == LF {
                self.io.unread(b);
                break;
            }
            if b != b';' {
                return Err(HttpError::bad_request(format!(
                    "Expected ';' or CRLF in chunk extension, got: 0x{b:x}"
                )));
            }

            self.skip_ows().await?;

            let mut name = String::new();
            loop {
                let nb = self.io.read_u8().await?;
                if is_tchar(nb) {
                    name.push(nb as char);
                } else {
                    self.io.unread(nb);
                    break;
                }
            }
            ensure!(!name.is_empty(), HttpError::bad_request("Empty chunk extension name"));

            let eq = self.io.read_u8().await?;
            let value = if eq == b'=' {
                self.skip_ows().await?;
                let first = self.io.read_u8().await?;
                self.io.unread(first);
                if first == b'"' {
                    Some(self.read_quoted_string().await?)
                } else {
                    let mut token = String::new();
                    loop {
                        let tb = self.io.read_u8().await?;
                        if is_tchar(tb) {
                            token.push(tb as char);
                        } else {
                            self.io.unread(tb);
                            break;
                        }
                    }
                    Some(token)
                }
            } else {
                self.io.unread(eq);
                None
            };

            match extensions.iter().position(|(n, _)| *n == name) {
                Some(i) => extensions[i].1 = value,
                None => extensions.push((name, value)),
            }
        }

        Ok(extensions)
    }

    /// quoted-string per RFC 9110 Section 5.6.4:
    ///
    /// ```text
    /// quoted-string = DQUOTE *( qdtext / quoted-pair ) DQUOTE
    /// qdtext        = HTAB / SP / %x21 / %x23-5B / %x5D-7E / obs-text
    /// quoted-pair   = "\" ( HTAB / SP / VCHAR / obs-text )
    /// ```
    async fn read_quoted_string(&mut self) -> Result<String, HttpError> {
        let dquote = self.io.read_u8().await?;
        ensure!(dquote == b'"', HttpError::bad_request("Expected '\"' starting quoted-string"));

        let mut value = String::new();
        loop {
            let b = self.io.read_u8().await?;
            if b == b'"' {
                break;
            } else if b == b'\\' {
                let escaped = self.io.read_u8().await?;
                if escaped != HTAB && escaped != SP && !is_field_vchar(escaped) {
                    return Err(HttpError::bad_request(format!(
                        "Invalid quoted-pair in quoted-string: 0x{escaped:x}"
                    )));
                }
                value.push(escaped as char);
            } else if b == HTAB
                || b == SP
                || b == 0x21
                || (0x23..=0x5B).contains(&b)
                || (0x5D..=0x7E).contains(&b)
                || b >= 0x80
            {
                value.push(b as char);
            } else {
                return Err(HttpError::bad_request(format!(
                    "Invalid octet in quoted-string: 0x{b:x}"
                )));
            }
            ensure!(
                value.len() <= MAX_HEADER_VALUE_LENGTH,
                HttpError::bad_request("Chunk extension quoted-string too long")
            );
        }
        Ok(value)
    }

    /// trailer-section = *( field-line CRLF ), terminated by the blank line
    /// that ends the chunked body (RFC 9112 Section 7.1.2).
    async fn read_trailer_section(&mut self) -> Result<Vec<Header>, HttpError> {
        let mut trailers = Vec::new();
        loop {
            let b = self.io.read_u8().await?;
            if b == CR {
                let next = self.io.read_u8().await?;
                if next == LF {
                    break;
                }
                self.io.unread(next);
                self.io.unread(CR);
            } else if b == LF {
                // bare LF as blank line terminator, lenient per Section 2.2
                break;
            } else {
                self.io.unread(b);
            }

            let name = self.read_header_name().await?;
            let colon = self.io.read_u8().await?;
            if colon != b':' {
                return Err(HttpError::bad_request(format!(
                    "Expected ':' after trailer field name, got: 0x{colon:x}"
                )));
            }
            let value = self.read_header_value().await?;
            trailers.push(Header::new(name, value));
        }
        Ok(trailers)
    }

    /// Section 2.2: a server SHOULD ignore at least one empty line received
    /// prior to the request-line. Returns false on a clean end of stream.
    async fn skip_leading_crlf(&mut self) -> Result<bool, HttpError> {
        loop {
            let b = match self.io.try_read_u8().await? {
                Some(b) => b,
                None => return Ok(false),
            };
            if b == CR {
                let next = match self.io.try_read_u8().await? {
                    Some(next) => next,
                    None => return Ok(false),
                };
                if next == LF {
                    continue;
                }
                self.io.unread(next);
                self.io.unread(CR);
                return Ok(true);
            } else if b == LF {
                // Section 2.2: MAY recognize bare LF as a line terminator
                continue;
            } else {
                self.io.unread(b);
                return Ok(true);
            }
        }
    }

    /// Section 3.1: method = token = 1*tchar, uppercased.
    async fn read_method(&mut self) -> Result<String, HttpError> {
        let mut method = String::new();
        loop {
            let b = self.io.read_u8().await?;
            if is_tchar(b) {
                method.push(b as char);
                ensure!(
                    method.len() <= MAX_REQUEST_LINE_LENGTH,
                    HttpError::bad_request("Method token too long")
                );
            } else {
                self.io.unread(b);
                break;
            }
        }
        ensure!(!method.is_empty(), HttpError::bad_request("Empty method token"));
        Ok(method.to_ascii_uppercase())
    }

    /// Section 3.2: request-target, read until SP. No whitespace, CTLs or
    /// DEL are allowed inside the target.
    async fn read_target(&mut self) -> Result<String, HttpError> {
        let mut target = String::new();
        loop {
            let b = self.io.read_u8().await?;
            if b == SP || b == CR || b == LF {
                self.io.unread(b);
                break;
            }
            if b < 0x21 || b == 0x7F {
                return Err(HttpError::bad_request(format!(
                    "Invalid octet in request-target: 0x{b:x}"
                )));
            }
            target.push(b as char);
            ensure!(
                target.len() <= MAX_REQUEST_LINE_LENGTH,
                HttpError::bad_request("Request-target too long")
            );
        }
        ensure!(!target.is_empty(), HttpError::bad_request("Empty request-target"));
        Ok(target)
    }

    /// Section 2.3: HTTP-version = %s"HTTP" "/" DIGIT "." DIGIT
    async fn read_version(&mut self) -> Result<String, HttpError> {
        let mut prefix = [0u8; 5];
        self.io.read_exact(&mut prefix).await?;
        if &prefix != b"HTTP/" {
            return Err(HttpError::bad_request(format!(
                "Invalid HTTP-version prefix: {}",
                String::from_utf8_lossy(&prefix)
            )));
        }

        let major = self.io.read_u8().await?;
        if !major.is_ascii_digit() {
            return Err(HttpError::bad_request(format!(
                "Invalid major version digit: {}",
                major as char
            )));
        }

        let dot = self.io.read_u8().await?;
        if dot != b'.' {
            return Err(HttpError::bad_request(format!(
                "Expected '.' in HTTP-version, got: {}",
                dot as char
            )));
        }

        let minor = self.io.read_u8().await?;
        if !minor.is_ascii_digit() {
            return Err(HttpError::bad_request(format!(
                "Invalid minor version digit: {}",
                minor as char
            )));
        }

        Ok(format!("HTTP/{}.{}", major as char, minor as char))
    }

    /// Section 5: field-line = field-name ":" OWS field-value OWS, repeated
    /// until the empty line that terminates the header section.
    async fn read_headers(&mut self, request: &mut HttpRequest) -> Result<(), HttpError> {
        let mut header_count = 0usize;

        loop {
            let b = self.io.read_u8().await?;
            if b == CR {
                let next = self.io.read_u8().await?;
                if next == LF {
                    break;
                }
                self.io.unread(next);
                self.io.unread(CR);
            } else if b == LF {
                break;
            } else {
                self.io.unread(b);
            }

            let name = self.read_header_name().await?;
            let colon = self.io.read_u8().await?;
            if colon != b':' {
                return Err(HttpError::bad_request(format!(
                    "Expected ':' after header field name, got: 0x{colon:x}"
                )));
            }
            let value = self.read_header_value().await?;

            request.push_header(Header::new(name, value));
            header_count += 1;
            ensure!(
                header_count <= MAX_HEADERS,
                HttpError::bad_request(format!("Client sent more than {MAX_HEADERS} headers"))
            );
        }
        Ok(())
    }

    /// Section 5: field-name = token. Section 5.1: whitespace between the
    /// field name and the colon must be rejected.
    async fn read_header_name(&mut self) -> Result<String, HttpError> {
        let mut name = String::new();
        loop {
            let b = self.io.read_u8().await?;
            if is_tchar(b) {
                name.push(b as char);
                ensure!(
                    name.len() <= MAX_HEADER_NAME_LENGTH,
                    HttpError::bad_request("Header field name too long")
                );
            } else {
                self.io.unread(b);
                break;
            }
        }
        ensure!(!name.is_empty(), HttpError::bad_request("Empty header field name"));

        let next = self.io.read_u8().await?;
        self.io.unread(next);
        if next == SP || next == HTAB {
            return Err(HttpError::bad_request(
                "Whitespace between header field name and colon is not allowed (400 Bad Request)",
            ));
        }

        Ok(name)
    }

    /// Section 5: field-value with leading/trailing OWS stripped. obs-fold
    /// (CRLF followed by SP/HTAB) is replaced with a single SP per Section
    /// 5.2; a bare CR is replaced with SP and a bare LF terminates the line
    /// per Section 2.2.
    async fn read_header_value(&mut self) -> Result<String, HttpError> {
        self.skip_ows().await?;

        let mut value = String::new();
        loop {
            let b = self.io.read_u8().await?;

            if b == CR {
                let next = self.io.read_u8().await?;
                if next == LF {
                    let after_lf = self.io.read_u8().await?;
                    if after_lf == SP || after_lf == HTAB {
                        // obs-fold
                        value.push(SP as char);
                        self.skip_ows().await?;
                        continue;
                    }
                    self.io.unread(after_lf);
                    break;
                }
                // bare CR becomes SP; the byte after it is processed next
                value.push(SP as char);
                self.io.unread(next);
                continue;
            } else if b == LF {
                let after_lf = self.io.read_u8().await?;
                if after_lf == SP || after_lf == HTAB {
                    // obs-fold with bare LF
                    value.push(SP as char);
                    self.skip_ows().await?;
                    continue;
                }
                self.io.unread(after_lf);
                break;
            } else if is_field_vchar(b) || b == SP || b == HTAB {
                value.push(b as char);
                ensure!(
                    value.len() <= MAX_HEADER_VALUE_LENGTH,
                    HttpError::bad_request("Header field value too long")
                );
            } else {
                return Err(HttpError::bad_request(format!(
                    "Invalid octet in header field value: 0x{b:x}"
                )));
            }
        }

        while value.ends_with(' ') || value.ends_with('\t') {
            value.pop();
        }

        Ok(value)
    }

    async fn expect_sp(&mut self) -> Result<(), HttpError> {
        let b = self.io.read_u8().await?;
        ensure!(b == SP, HttpError::bad_request(format!("Expected SP, got: 0x{b:x}")));
        Ok(())
    }

    async fn expect_crlf(&mut self) -> Result<(), HttpError> {
        let b = self.io.read_u8().await?;
        if b == CR {
            let next = self.io.read_u8().await?;
            ensure!(
                next == LF,
                HttpError::bad_request(format!("Expected LF after CR, got: 0x{next:x}"))
            );
        } else if b != LF {
            // Section 2.2: a bare LF MAY be recognized as a line terminator
            return Err(HttpError::bad_request(format!(
                "Expected CRLF after HTTP-version, got: 0x{b:x}"
            )));
        }
        Ok(())
    }

    async fn skip_ows(&mut self) -> Result<(), HttpError> {
        loop {
            let b = self.io.read_u8().await?;
            if b != SP && b != HTAB {
                self.io.unread(b);
                return Ok(());
            }
        }
    }
}

/// tchar = "!" / "#" / "$" / "%" / "&" / "'" / "*" / "+" / "-" / "." /
/// "^" / "_" / "`" / "|" / "~" / DIGIT / ALPHA
fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#'
                | b'$'
                | b'%'
                | b'&'
                | b'\''
                | b'*'
                | b'+'
                | b'-'
                | b'.'
                | b'^'
                | b'_'
                | b'`'
                | b'|'
                | b'~'
        )
}

/// VCHAR = %x21-7E, obs-text = %x80-FF
fn is_field_vchar(b: u8) -> bool {
    (0x21..=0x7E).contains(&b) || b >= 0x80
}

fn hex_digit_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
