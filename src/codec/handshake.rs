//! WebSocket opening handshake pieces, per RFC 6455 Section 4.2.

use base64::prelude::*;
use sha1::{Digest, Sha1};

use crate::protocol::{HttpError, HttpRequest};

pub const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Computes the `Sec-WebSocket-Accept` value for a client key: the base64
/// encoding of the SHA-1 of the key concatenated with the protocol GUID
/// (Section 4.2.2).
pub fn compute_accept_key(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// Validates the upgrade request headers per Section 4.2.1 and returns the
/// client's `Sec-WebSocket-Key`.
pub(crate) fn validate_upgrade(request: &HttpRequest) -> Result<&str, HttpError> {
    let upgrade = request.header("upgrade");
    if !upgrade.map(|v| v.eq_ignore_ascii_case("websocket")).unwrap_or(false) {
        return Err(HttpError::upgrade("Missing or invalid Upgrade header"));
    }

    let connection = request.header("connection");
    if !connection.map(|v| v.to_ascii_lowercase().contains("upgrade")).unwrap_or(false) {
        return Err(HttpError::upgrade("Missing or invalid Connection header"));
    }

    let key = match request.header("sec-websocket-key") {
        Some(key) if !key.is_empty() => key,
        _ => return Err(HttpError::upgrade("Missing Sec-WebSocket-Key header")),
    };

    let version = request.header("sec-websocket-version");
    if version != Some("13") {
        return Err(HttpError::upgrade(format!(
            "Unsupported WebSocket version: {}",
            version.unwrap_or("<missing>")
        )));
    }

    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Header;

    #[test]
    fn accept_key_matches_rfc_example() {
        assert_eq!(compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    fn upgrade_request(headers: &[(&str, &str)]) -> HttpRequest {
        let mut request = HttpRequest::new("GET".into(), "/ws".into(), "HTTP/1.1".into());
        for (name, value) in headers {
            request.push_header(Header::new((*name).into(), (*value).into()));
        }
        request
    }

    #[test]
    fn valid_upgrade_request_is_accepted() {
        let request = upgrade_request(&[
            ("Host", "example.com"),
            ("Upgrade", "WebSocket"),
            ("Connection", "keep-alive, Upgrade"),
            ("Sec-WebSocket-Key", "dGhlIHNhbXBsZSBub25jZQ=="),
            ("Sec-WebSocket-Version", "13"),
        ]);
        assert_eq!(validate_upgrade(&request).unwrap(), "dGhlIHNhbXBsZSBub25jZQ==");
    }

    #[test]
    fn missing_pieces_are_rejected() {
        let request = upgrade_request(&[("Host", "a")]);
        assert!(validate_upgrade(&request).is_err());

        let request = upgrade_request(&[
            ("Upgrade", "websocket"),
            ("Connection", "Upgrade"),
            ("Sec-WebSocket-Key", "abc"),
            ("Sec-WebSocket-Version", "8"),
        ]);
        let err = validate_upgrade(&request).unwrap_err();
        assert!(err.to_string().contains("Unsupported WebSocket version: 8"));
    }
}
