use std::collections::HashMap;

use crate::config::Config;
use crate::protocol::{Header, HttpError};

/// How the request body is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyMode {
    /// No Content-Length or Transfer-Encoding header; there is no body.
    None,
    /// Body is exactly this many bytes, per Content-Length.
    FixedLength(u64),
    /// Body uses chunked transfer encoding.
    Chunked,
}

/// One parsed HTTP request.
///
/// Headers are exposed two ways: the ordered list preserves every field in
/// arrival order with its original casing, while the by-name map is keyed by
/// lowercased name with duplicate values joined by `", "`.
#[derive(Debug)]
pub struct HttpRequest {
    method: String,
    target: String,
    version: String,
    headers_in_order: Vec<Header>,
    headers: HashMap<String, String>,
    body_mode: BodyMode,
    close_after: bool,
}

impl HttpRequest {
    pub(crate) fn new(method: String, target: String, version: String) -> Self {
        Self {
            method,
            target,
            version,
            headers_in_order: Vec::new(),
            headers: HashMap::new(),
            body_mode: BodyMode::None,
            close_after: false,
        }
    }

    pub(crate) fn push_header(&mut self, header: Header) {
        use std::collections::hash_map::Entry;

        match self.headers.entry(header.lowercase_name().to_owned()) {
            Entry::Occupied(mut entry) => {
                let merged = entry.get_mut();
                merged.push_str(", ");
                merged.push_str(header.value());
            }
            Entry::Vacant(entry) => {
                entry.insert(header.value().to_owned());
            }
        }
        self.headers_in_order.push(header);
    }

    /// The request method, uppercased.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// The raw request-target as received.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The HTTP version, e.g. `HTTP/1.1`.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// All header fields in arrival order with original casing.
    pub fn headers_in_order(&self) -> &[Header] {
        &self.headers_in_order
    }

    /// Header lookup by lowercased name. Duplicates are joined with `", "`.
    pub fn header(&self, lowercase_name: &str) -> Option<&str> {
        self.headers.get(lowercase_name).map(String::as_str)
    }

    pub fn has_header(&self, lowercase_name: &str) -> bool {
        self.headers.contains_key(lowercase_name)
    }

    pub fn body_mode(&self) -> BodyMode {
        self.body_mode
    }

    /// Whether this request carries a message body, per RFC 9112 Section 6:
    /// the presence of a body is signaled by Content-Length or
    /// Transfer-Encoding.
    pub fn has_body(&self) -> bool {
        !matches!(self.body_mode, BodyMode::None)
    }

    pub(crate) fn close_after(&self) -> bool {
        self.close_after
    }

    /// Validates and extracts derived request state after raw parsing.
    ///
    /// Kept separate from the byte-level parser so the parser can be tested
    /// against raw message grammar in isolation.
    pub fn prepare(&mut self, config: &Config) -> Result<(), HttpError> {
        match self.version.as_str() {
            "HTTP/1.1" => {
                // Section 3.2: a client MUST send exactly one Host header in
                // every HTTP/1.1 request; missing or duplicated is a 400.
                let host_count =
                    self.headers_in_order.iter().filter(|h| h.lowercase_name() == "host").count();
                if host_count == 0 {
                    return Err(HttpError::bad_request(
                        "Missing required Host header field in HTTP/1.1 request",
                    ));
                }
                if host_count > 1 {
                    return Err(HttpError::bad_request(
                        "Multiple Host header fields in HTTP/1.1 request",
                    ));
                }
            }
            "HTTP/1.0" => {
                self.close_after = !self
                    .header("connection")
                    .map(|v| v.eq_ignore_ascii_case("keep-alive"))
                    .unwrap_or(false);
            }
            other => {
                return Err(HttpError::bad_request(format!("Unsupported HTTP Version: {other}")));
            }
        }

        if let Some(te) = self.header("transfer-encoding") {
            if te.to_ascii_lowercase().contains("chunked") {
                self.body_mode = BodyMode::Chunked;
            }
        }

        // chunked wins when both are present
        if !matches!(self.body_mode, BodyMode::Chunked) {
            if let Some(cl) = self.header("content-length") {
                let content_length = parse_content_length(cl)?;
                if content_length > config.maximum_request_body_size {
                    return Err(HttpError::bad_request(format!(
                        "Request Content-Length exceeds maximum acceptable size: {content_length}"
                    )));
                }
                self.body_mode = BodyMode::FixedLength(content_length);
            }
        }

        Ok(())
    }
}

/// Parses a Content-Length value that may carry several comma-joined fields.
///
/// Section 6.3: repeated Content-Length fields are acceptable only when
/// every value is identical; differing values are a 400.
fn parse_content_length(value: &str) -> Result<u64, HttpError> {
    let invalid =
        || HttpError::bad_request(format!("Invalid Content-Length header: {value}"));

    let mut parts = value.split(',').map(str::trim);
    let first = parts.next().ok_or_else(invalid)?;
    let content_length = first.parse::<i64>().map_err(|_| invalid())?;
    if content_length < 0 {
        return Err(HttpError::bad_request(format!("Negative Content-Length: {content_length}")));
    }

    for part in parts {
        if part.parse::<i64>().map_err(|_| invalid())? != content_length {
            return Err(HttpError::bad_request(format!(
                "Conflicting Content-Length header values: {value}"
            )));
        }
    }

    Ok(content_length as u64)
}
