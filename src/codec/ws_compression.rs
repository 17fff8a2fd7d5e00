//! permessage-deflate WebSocket extension per RFC 7692 Section 7.
//!
//! Compression (Section 7.2.1): compress the payload with raw DEFLATE (no
//! zlib wrapper), make sure the output ends with an empty stored block
//! (`0x00 0x00 0xff 0xff`), then strip those four trailing octets.
//!
//! Decompression (Section 7.2.2): append `0x00 0x00 0xff 0xff` to the
//! received payload and inflate with raw DEFLATE.
//!
//! The engines use a sync flush, never `finish`: finishing would write a
//! final block and require a full reset, destroying the LZ77 sliding window
//! that context takeover depends on.

use std::io;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};

const DEFLATE_TAIL: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

/// The agreed permessage-deflate parameters plus the deflate/inflate engines
/// for one WebSocket session. Dropped when the session ends.
pub struct WebSocketCompression {
    /// Server resets its deflater before each outgoing message.
    pub server_no_context_takeover: bool,
    /// Client sends each message with a fresh context; reset the inflater
    /// before each incoming message.
    pub client_no_context_takeover: bool,

    // raw DEFLATE, full 15-bit window
    deflate: Compress,
    inflate: Decompress,
}

impl WebSocketCompression {
    pub fn new(server_no_context_takeover: bool, client_no_context_takeover: bool) -> Self {
        Self {
            server_no_context_takeover,
            client_no_context_takeover,
            deflate: Compress::new(Compression::default(), false),
            inflate: Decompress::new(false),
        }
    }

    /// Parses the client's `Sec-WebSocket-Extensions` value. Offers are
    /// considered left to right and the first acceptable one wins. An offer
    /// is declined if it carries an unknown parameter, a window-bits value
    /// that does not parse, or a window-bits value other than 15 (only the
    /// full window is supported).
    pub fn negotiate(header_value: &str) -> Option<Self> {
        for offer in header_value.split(',') {
            let offer = offer.trim();
            if offer.is_empty() {
                continue;
            }

            let mut parts = offer.split(';');
            let ext_name = parts.next().unwrap_or("").trim();
            if !ext_name.eq_ignore_ascii_case("permessage-deflate") {
                continue;
            }

            let mut server_no_ctx = false;
            let mut client_no_ctx = false;
            let mut valid = true;

            for param in parts {
                let param = param.trim();
                if param.is_empty() {
                    continue;
                }
                let (key, value) = match param.split_once('=') {
                    Some((key, value)) => {
                        (key.trim().to_ascii_lowercase(), Some(value.trim().replace('"', "")))
                    }
                    None => (param.to_ascii_lowercase(), None),
                };

                match key.as_str() {
                    "server_no_context_takeover" => server_no_ctx = true,
                    "client_no_context_takeover" => client_no_ctx = true,
                    "server_max_window_bits" | "client_max_window_bits" => {
                        // absent value defaults to 15, which is what we run
                        if let Some(value) = value {
                            match value.parse::<u32>() {
                                Ok(15) => {}
                                _ => valid = false,
                            }
                        }
                    }
                    _ => valid = false,
                }

                if !valid {
                    break;
                }
            }

            if !valid {
                continue;
            }

            return Some(Self::new(server_no_ctx, client_no_ctx));
        }

        None
    }

    /// The `Sec-WebSocket-Extensions` value for the server's handshake
    /// response, echoing the agreed parameters.
    pub fn response_header_value(&self) -> String {
        let mut value = String::from("permessage-deflate");
        if self.server_no_context_takeover {
            value.push_str("; server_no_context_takeover");
        }
        if self.client_no_context_takeover {
            value.push_str("; client_no_context_takeover");
        }
        value
    }

    /// Compresses one message payload per Section 7.2.1. Empty input is a
    /// no-op returning empty bytes.
    pub fn compress(&mut self, input: &[u8]) -> io::Result<Vec<u8>> {
        if input.is_empty() {
            return Ok(Vec::new());
        }

        if self.server_no_context_takeover {
            self.deflate.reset();
        }

        let mut out = Vec::with_capacity(input.len() + 64);
        let mut consumed = 0usize;
        loop {
            if out.len() == out.capacity() {
                out.reserve(4096);
            }
            let before_in = self.deflate.total_in();
            self.deflate
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
            consumed += (self.deflate.total_in() - before_in) as usize;

            // the sync flush is complete once zlib stops short of the
            // available output space
            if consumed == input.len() && out.len() < out.capacity() {
                break;
            }
        }

        if out.ends_with(&DEFLATE_TAIL) {
            out.truncate(out.len() - DEFLATE_TAIL.len());
        }
        Ok(out)
    }

    /// Decompresses one message payload per Section 7.2.2.
    pub fn decompress(&mut self, input: &[u8]) -> io::Result<Vec<u8>> {
        if self.client_no_context_takeover {
            self.inflate.reset(false);
        }

        let mut data = Vec::with_capacity(input.len() + DEFLATE_TAIL.len());
        data.extend_from_slice(input);
        data.extend_from_slice(&DEFLATE_TAIL);

        let mut out = Vec::with_capacity((input.len() * 2).max(256));
        let mut consumed = 0usize;
        loop {
            if out.len() == out.capacity() {
                out.reserve(8192);
            }
            let before_in = self.inflate.total_in();
            let before_out = self.inflate.total_out();
            self.inflate
                .decompress_vec(&data[consumed..], &mut out, FlushDecompress::None)
                .map_err(|e| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("WebSocket permessage-deflate decompression failed: {e}"),
                    )
                })?;
            consumed += (self.inflate.total_in() - before_in) as usize;
            let produced = self.inflate.total_out() - before_out;

            if consumed == data.len() && (out.len() < out.capacity() || produced == 0) {
                break;
            }
        }

        Ok(out)
    }
}
