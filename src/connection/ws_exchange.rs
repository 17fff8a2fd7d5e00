//! The WebSocket session: the inbound frame loop and the shared outbound
//! writer.
//!
//! The frame loop runs on the connection's task and is the only reader.
//! Outbound sends go through [`WebSocket`], a cloneable handle over a mutex
//! around the writer: concurrent senders serialize, so frames never
//! interleave on the wire. The permessage-deflate engines live with the
//! writer state so a single owner holds both directions; the frame loop
//! takes the lock briefly to inflate an incoming message and never holds it
//! across a read.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error};

use crate::codec::{WebSocketCompression, WebSocketFrame, WebSocketInput};
use crate::connection::io::{ConnWriter, InputBuf};
use crate::handler::WebSocketHandler;
use crate::protocol::WsError;

/// Messages larger than this are split into continuation frames.
const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Messages below this size are sent uncompressed even when
/// permessage-deflate is negotiated; RFC 7692 Section 6.1 allows opting out
/// per message, and small payloads tend to expand under deflate.
const COMPRESSION_MIN_SIZE: usize = 256;

struct WsWriter {
    out: ConnWriter,
    compression: Option<WebSocketCompression>,
    closed: bool,
    // 1006 = abnormal closure, kept unless a close frame goes out
    close_code: u16,
}

impl WsWriter {
    async fn send_frame(&mut self, fin: bool, rsv1: bool, opcode: u8, payload: &[u8]) -> std::io::Result<()> {
        // server frames are never masked (Section 5.1)
        let b0 = (fin as u8) << 7 | (rsv1 as u8) << 6 | (opcode & 0x0F);
        self.out.write_u8(b0).await?;

        let len = payload.len();
        if len <= 125 {
            self.out.write_u8(len as u8).await?;
        } else if len <= 0xFFFF {
            self.out.write_u8(126).await?;
            self.out.write_u16(len as u16).await?;
        } else {
            self.out.write_u8(127).await?;
            self.out.write_u64(len as u64).await?;
        }

        self.out.write_all(payload).await?;
        self.out.flush().await
    }

    /// Sends one data message, compressing and fragmenting per policy:
    /// compression only for payloads worth it, RSV1 on the first frame only,
    /// FIN on the last frame only.
    async fn send_message(&mut self, opcode: u8, payload: &[u8]) -> std::io::Result<()> {
        let compress = match &self.compression {
            Some(_) => payload.len() >= COMPRESSION_MIN_SIZE,
            None => false,
        };

        let compressed;
        let (rsv1, data): (bool, &[u8]) = if compress {
            match self.compression.as_mut() {
                Some(codec) => {
                    compressed = codec.compress(payload)?;
                    (true, &compressed)
                }
                None => (false, payload),
            }
        } else {
            (false, payload)
        };

        if data.len() <= MAX_FRAME_SIZE {
            return self.send_frame(true, rsv1, opcode, data).await;
        }

        self.send_frame(false, rsv1, opcode, &data[..MAX_FRAME_SIZE]).await?;
        let mut offset = MAX_FRAME_SIZE;
        while offset < data.len() {
            let end = (offset + MAX_FRAME_SIZE).min(data.len());
            let fin = end == data.len();
            self.send_frame(fin, false, WebSocketFrame::OPCODE_CONTINUATION, &data[offset..end])
                .await?;
            offset = end;
        }
        Ok(())
    }

    async fn send_close(&mut self, status_code: u16) -> std::io::Result<()> {
        let payload = status_code.to_be_bytes();
        self.send_frame(true, false, WebSocketFrame::OPCODE_CLOSE, &payload).await?;
        self.closed = true;
        self.close_code = status_code;
        Ok(())
    }
}

/// Handle for sending frames on a WebSocket session.
///
/// Clones share the session writer; sends from different tasks serialize on
/// the session lock and always land as whole, contiguous frames.
#[derive(Clone)]
pub struct WebSocket {
    writer: Arc<Mutex<WsWriter>>,
    open: Arc<AtomicBool>,
}

impl WebSocket {
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub async fn send_text(&self, text: &str) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send_message(WebSocketFrame::OPCODE_TEXT, text.as_bytes()).await
    }

    pub async fn send_binary(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send_message(WebSocketFrame::OPCODE_BINARY, payload).await
    }

    pub async fn send_ping(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send_frame(true, false, WebSocketFrame::OPCODE_PING, payload).await
    }

    pub async fn send_pong(&self, payload: &[u8]) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        writer.send_frame(true, false, WebSocketFrame::OPCODE_PONG, payload).await
    }

    /// Sends a Close frame with the given status code and marks the session
    /// closed; the frame loop ends after the current frame.
    pub async fn send_close(&self, status_code: u16) -> std::io::Result<()> {
        let mut writer = self.writer.lock().await;
        let result = writer.send_close(status_code).await;
        self.open.store(false, Ordering::Release);
        result
    }
}

/// The active exchange of a connection that has completed the WebSocket
/// handshake. Owns the frame reader; the writer is shared through
/// [`WebSocket`] handles.
pub struct WebSocketExchange {
    input: WebSocketInput,
    socket: WebSocket,
    handler: Box<dyn WebSocketHandler>,
}

impl WebSocketExchange {
    pub(crate) fn new(
        io: InputBuf,
        out: ConnWriter,
        handler: Box<dyn WebSocketHandler>,
        compression: Option<WebSocketCompression>,
        max_payload: u64,
    ) -> Self {
        let compression_negotiated = compression.is_some();
        let writer =
            Arc::new(Mutex::new(WsWriter { out, compression, closed: false, close_code: 1006 }));
        Self {
            input: WebSocketInput::new(io, max_payload, compression_negotiated),
            socket: WebSocket { writer, open: Arc::new(AtomicBool::new(true)) },
            handler,
        }
    }

    /// Runs the session until the close handshake, stream end, or a fatal
    /// error. The handler's `on_close` is invoked exactly once.
    pub(crate) async fn process(mut self) {
        let mut close_reason = String::new();

        match self.handler.on_start(&self.socket).await {
            Ok(Some(next)) => self.handler = next,
            Ok(None) => {}
            Err(e) => {
                error!("websocket handler failed to start: {e}");
                self.finish(close_reason).await;
                return;
            }
        }

        // state for assembling fragmented messages
        let mut in_fragmented = false;
        let mut fragmented_compressed = false;
        let mut fragmented_opcode = 0u8;
        let mut fragment_buffer: Vec<u8> = Vec::new();

        loop {
            let frame = match self.input.read_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => break,
                Err(WsError::Protocol { code, reason }) => {
                    debug!(code, "websocket protocol violation: {reason}");
                    if let Err(e) = self.send_close(code).await {
                        debug!("failed to send close frame: {e}");
                    }
                    break;
                }
                Err(WsError::Io { source })
                    if source.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(WsError::Io { source }) => {
                    error!("websocket read failed: {source}");
                    break;
                }
            };

            let step = if frame.is_control() {
                // Section 5.5: control frames may arrive in the middle of a
                // fragmented message
                if frame.is_close() {
                    let code = match frame.close_status_code() {
                        1005 => 1000,
                        code => code,
                    };
                    close_reason = frame.close_reason();
                    if let Err(e) = self.send_close(code).await {
                        debug!("failed to echo close frame: {e}");
                    }
                    Ok(None)
                } else if frame.is_ping() {
                    self.handler.on_ping(&self.socket, frame.payload).await
                } else {
                    self.handler.on_pong(&self.socket, frame.payload).await
                }
            } else if !frame.is_continuation() && frame.is_fin() {
                // unfragmented data frame
                match self.inflate_if(frame.rsv1, frame.payload).await {
                    Ok(payload) => self.dispatch_message(frame.opcode, payload).await,
                    Err(e) => {
                        error!("failed to decompress websocket message: {e}");
                        break;
                    }
                }
            } else if !frame.is_continuation() {
                // first fragment of a fragmented message
                in_fragmented = true;
                fragmented_compressed = frame.rsv1;
                fragmented_opcode = frame.opcode;
                fragment_buffer = frame.payload;
                Ok(None)
            } else {
                if !in_fragmented {
                    close_reason = "Unexpected CONTINUATION Frame".to_owned();
                    if let Err(e) = self.send_close(1002).await {
                        debug!("failed to send close frame: {e}");
                    }
                    break;
                }
                fragment_buffer.extend_from_slice(&frame.payload);
                if frame.is_fin() {
                    let assembled = std::mem::take(&mut fragment_buffer);
                    let opcode = fragmented_opcode;
                    let compressed = fragmented_compressed;
                    in_fragmented = false;
                    fragmented_compressed = false;
                    fragmented_opcode = 0;
                    match self.inflate_if(compressed, assembled).await {
                        Ok(payload) => self.dispatch_message(opcode, payload).await,
                        Err(e) => {
                            error!("failed to decompress websocket message: {e}");
                            break;
                        }
                    }
                } else {
                    Ok(None)
                }
            };

            match step {
                Ok(Some(next)) => self.handler = next,
                Ok(None) => {}
                Err(e) => {
                    error!("websocket handler error: {e}");
                    break;
                }
            }

            if !self.socket.is_open() {
                break;
            }
        }

        self.finish(close_reason).await;
    }

    async fn dispatch_message(
        &mut self,
        opcode: u8,
        payload: Vec<u8>,
    ) -> Result<Option<Box<dyn WebSocketHandler>>, WsError> {
        if opcode == WebSocketFrame::OPCODE_TEXT {
            let text = String::from_utf8_lossy(&payload).into_owned();
            self.handler.on_text(&self.socket, text).await
        } else if opcode == WebSocketFrame::OPCODE_BINARY {
            self.handler.on_binary(&self.socket, payload).await
        } else {
            Ok(None)
        }
    }

    async fn inflate_if(&self, compressed: bool, payload: Vec<u8>) -> std::io::Result<Vec<u8>> {
        if !compressed {
            return Ok(payload);
        }
        let mut writer = self.socket.writer.lock().await;
        match writer.compression.as_mut() {
            Some(codec) => codec.decompress(&payload),
            None => Ok(payload),
        }
    }

    async fn send_close(&self, code: u16) -> std::io::Result<()> {
        self.socket.send_close(code).await
    }

    /// Invokes `on_close` with the final status and releases the session's
    /// compression engines.
    async fn finish(mut self, close_reason: String) {
        let close_code = {
            let mut writer = self.socket.writer.lock().await;
            writer.compression.take();
            if writer.closed {
                writer.close_code
            } else {
                1006
            }
        };
        self.socket.open.store(false, Ordering::Release);

        self.handler.on_close(close_code, close_reason).await;
    }
}
