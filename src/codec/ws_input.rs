//! WebSocket frame reader for the server side, per RFC 6455 Section 5.
//!
//! Assumes the connection has already completed the opening handshake. The
//! reader owns the connection's [`InputBuf`], carried over from the HTTP
//! exchange so any bytes the client sent right after its handshake request
//! are not lost.

use crate::codec::WebSocketFrame;
use crate::connection::io::InputBuf;
use crate::protocol::WsError;

/// Section 5.5: control frames MUST have a payload of 125 bytes or less.
const MAX_CONTROL_FRAME_PAYLOAD: u64 = 125;

pub struct WebSocketInput {
    io: InputBuf,
    max_payload: u64,
    compression_negotiated: bool,
}

impl WebSocketInput {
    pub(crate) fn new(io: InputBuf, max_payload: u64, compression_negotiated: bool) -> Self {
        Self { io, max_payload, compression_negotiated }
    }

    /// Reads a single frame from the connection.
    ///
    /// Per Section 5.2 the base framing is:
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-------+-+-------------+-------------------------------+
    /// |F|R|R|R| opcode|M| Payload len |    Extended payload length    |
    /// |I|S|S|S|  (4)  |A|     (7)     |             (16/64)           |
    /// |N|V|V|V|       |S|             |   (if payload len==126/127)   |
    /// | |1|2|3|       |K|             |                               |
    /// +-+-+-+-+-------+-+-------------+-------------------------------+
    /// |     Masking-key, if MASK set  |          Payload Data         |
    /// +-------------------------------+ - - - - - - - - - - - - - - - +
    /// ```
    ///
    /// Returns `Ok(None)` if the stream ended cleanly before a frame began.
    pub async fn read_frame(&mut self) -> Result<Option<WebSocketFrame>, WsError> {
        let b0 = match self.io.try_read_u8().await? {
            Some(b0) => b0,
            None => return Ok(None),
        };

        let fin = b0 & 0x80 != 0;
        let rsv1 = b0 & 0x40 != 0;
        let rsv2 = b0 & 0x20 != 0;
        let rsv3 = b0 & 0x10 != 0;
        let opcode = b0 & 0x0F;

        validate_opcode(opcode)?;

        // Section 5.2: RSV1-3 MUST be 0 unless a negotiated extension gives
        // them meaning. permessage-deflate claims RSV1 on the first data
        // frame of a message only; RSV1 on control or continuation frames
        // stays a violation.
        let rsv1_allowed = self.compression_negotiated
            && (opcode == WebSocketFrame::OPCODE_TEXT || opcode == WebSocketFrame::OPCODE_BINARY);
        if rsv2 || rsv3 || (rsv1 && !rsv1_allowed) {
            return Err(WsError::protocol(
                1002,
                format!(
                    "Reserved bits set without negotiated extension: RSV1={rsv1} RSV2={rsv2} RSV3={rsv3}"
                ),
            ));
        }

        let b1 = self.io.read_u8().await?;
        let masked = b1 & 0x80 != 0;
        let payload_len7 = (b1 & 0x7F) as u64;

        // Section 5.1: a client MUST mask every frame it sends, and a server
        // MUST close the connection on receiving an unmasked frame.
        if !masked {
            return Err(WsError::protocol(1002, "Client frame is not masked (Section 5.1)"));
        }

        let payload_length = self.read_payload_length(payload_len7).await?;

        if opcode & 0x08 != 0 {
            if payload_length > MAX_CONTROL_FRAME_PAYLOAD {
                return Err(WsError::protocol(
                    1002,
                    "Control frame payload exceeds 125 bytes (Section 5.5)",
                ));
            }
            if !fin {
                return Err(WsError::protocol(
                    1002,
                    "Control frame must not be fragmented (Section 5.5)",
                ));
            }
        }

        // Section 10.4: implementation-specific payload limit
        if payload_length > self.max_payload {
            return Err(WsError::protocol(
                1009,
                format!("Frame payload too large: {payload_length} bytes (max {})", self.max_payload),
            ));
        }

        let mut masking_key = [0u8; 4];
        self.io.read_exact(&mut masking_key).await?;

        let mut payload = vec![0u8; payload_length as usize];
        self.io.read_exact(&mut payload).await?;

        // Section 5.3: transformed-octet-i = original-octet-i XOR masking-key-octet-(i MOD 4)
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= masking_key[i & 0x3];
        }

        Ok(Some(WebSocketFrame { fin, rsv1, rsv2, rsv3, opcode, payload }))
    }

    /// Extended payload length per Section 5.2: 7 bits, or 16/64 bits in
    /// network byte order when the 7-bit value is 126/127. The 64-bit form
    /// must not have its most significant bit set.
    async fn read_payload_length(&mut self, payload_len7: u64) -> Result<u64, WsError> {
        if payload_len7 <= 125 {
            return Ok(payload_len7);
        }
        if payload_len7 == 126 {
            let mut len = [0u8; 2];
            self.io.read_exact(&mut len).await?;
            return Ok(u16::from_be_bytes(len) as u64);
        }
        let mut len = [0u8; 8];
        self.io.read_exact(&mut len).await?;
        let length = u64::from_be_bytes(len);
        if length & (1 << 63) != 0 {
            return Err(WsError::protocol(
                1002,
                "Payload length has most significant bit set (Section 5.2)",
            ));
        }
        Ok(length)
    }
}

/// Known opcodes are 0x0-0x2 (data) and 0x8-0xA (control); the reserved
/// ranges are a protocol error per Section 5.2.
fn validate_opcode(opcode: u8) -> Result<(), WsError> {
    match opcode {
        WebSocketFrame::OPCODE_CONTINUATION
        | WebSocketFrame::OPCODE_TEXT
        | WebSocketFrame::OPCODE_BINARY
        | WebSocketFrame::OPCODE_CLOSE
        | WebSocketFrame::OPCODE_PING
        | WebSocketFrame::OPCODE_PONG => Ok(()),
        _ => Err(WsError::protocol(1002, format!("Unknown or reserved opcode: 0x{opcode:x}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn reader(data: Vec<u8>) -> WebSocketInput {
        reader_with(data, false)
    }

    fn reader_with(data: Vec<u8>, compression: bool) -> WebSocketInput {
        WebSocketInput::new(
            InputBuf::new(Box::new(Cursor::new(data)), 8192),
            16 * 1024 * 1024,
            compression,
        )
    }

    /// Builds a masked client frame the way a browser would.
    fn masked_frame(fin: bool, rsv1: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
        let mut data = Vec::new();
        data.push((fin as u8) << 7 | (rsv1 as u8) << 6 | opcode);
        let key = [0x12u8, 0x34, 0x56, 0x78];
        if payload.len() <= 125 {
            data.push(0x80 | payload.len() as u8);
        } else if payload.len() <= 0xFFFF {
            data.push(0x80 | 126);
            data.extend_from_slice(&(payload.len() as u16).to_be_bytes());
        } else {
            data.push(0x80 | 127);
            data.extend_from_slice(&(payload.len() as u64).to_be_bytes());
        }
        data.extend_from_slice(&key);
        data.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i & 3]));
        data
    }

    #[tokio::test]
    async fn reads_masked_text_frame() {
        let frame = reader(masked_frame(true, false, 0x1, b"hello"))
            .read_frame()
            .await
            .unwrap()
            .unwrap();
        assert!(frame.fin);
        assert!(frame.is_text());
        assert_eq!(frame.payload, b"hello");
    }

    #[tokio::test]
    async fn clean_eof_returns_none() {
        assert!(reader(Vec::new()).read_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unmasked_frame_is_1002() {
        let mut data = vec![0x81, 0x05];
        data.extend_from_slice(b"hello");
        match reader(data).read_frame().await.unwrap_err() {
            WsError::Protocol { code, .. } => assert_eq!(code, 1002),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn reserved_opcode_is_1002() {
        let data = masked_frame(true, false, 0x3, b"");
        match reader(data).read_frame().await.unwrap_err() {
            WsError::Protocol { code, .. } => assert_eq!(code, 1002),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn rsv_bits_without_extension_are_1002() {
        let data = masked_frame(true, true, 0x1, b"x");
        match reader(data).read_frame().await.unwrap_err() {
            WsError::Protocol { code, .. } => assert_eq!(code, 1002),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn rsv1_allowed_on_data_frame_with_compression() {
        let frame = reader_with(masked_frame(true, true, 0x1, b"x"), true)
            .read_frame()
            .await
            .unwrap()
            .unwrap();
        assert!(frame.rsv1);
    }

    #[tokio::test]
    async fn rsv1_on_continuation_is_1002_even_with_compression() {
        let data = masked_frame(true, true, 0x0, b"x");
        match reader_with(data, true).read_frame().await.unwrap_err() {
            WsError::Protocol { code, .. } => assert_eq!(code, 1002),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fragmented_control_frame_is_1002() {
        let data = masked_frame(false, false, 0x9, b"ping");
        match reader(data).read_frame().await.unwrap_err() {
            WsError::Protocol { code, .. } => assert_eq!(code, 1002),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn oversized_control_payload_is_1002() {
        let data = masked_frame(true, false, 0x9, &[0u8; 126]);
        match reader(data).read_frame().await.unwrap_err() {
            WsError::Protocol { code, .. } => assert_eq!(code, 1002),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn extended_16_bit_length() {
        let payload = vec![0xABu8; 300];
        let frame = reader(masked_frame(true, false, 0x2, &payload))
            .read_frame()
            .await
            .unwrap()
            .unwrap();
        assert!(frame.is_binary());
        assert_eq!(frame.payload, payload);
    }

    #[tokio::test]
    async fn oversized_payload_is_1009() {
        let mut input = WebSocketInput::new(
            InputBuf::new(Box::new(Cursor::new(masked_frame(true, false, 0x2, &[0u8; 2048]))), 8192),
            1024,
            false,
        );
        match input.read_frame().await.unwrap_err() {
            WsError::Protocol { code, .. } => assert_eq!(code, 1009),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn length_msb_set_is_1002() {
        let mut data = vec![0x82, 0x80 | 127];
        data.extend_from_slice(&(u64::MAX).to_be_bytes());
        data.extend_from_slice(&[0u8; 4]);
        match reader(data).read_frame().await.unwrap_err() {
            WsError::Protocol { code, .. } => assert_eq!(code, 1002),
            other => panic!("unexpected error: {other}"),
        }
    }
}
