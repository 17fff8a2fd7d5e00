//! Handler contracts for both protocols.
//!
//! HTTP handlers form a chain: each gets a look at the request until one
//! commits a response. WebSocket handlers are small state machines: every
//! callback may return a replacement handler, so application code can swap
//! states without extra fields ("state <- step(state, event)"); returning
//! `None` keeps the current one.

use async_trait::async_trait;

use crate::connection::{HttpContext, WebSocket};
use crate::protocol::{HttpError, WsError};

/// Result of a WebSocket callback: optionally the handler that takes over.
pub type WsHandlerResult = Result<Option<Box<dyn WebSocketHandler>>, WsError>;

/// An HTTP request handler.
///
/// A handler indicates it handled the request by committing a response on
/// the context; otherwise the chain moves on to the next handler. Handlers
/// are shared across connections and run on the connection's task.
#[async_trait]
pub trait HttpHandler: Send + Sync {
    async fn handle(&self, context: &mut HttpContext<'_>) -> Result<(), HttpError>;

    /// Called when the handler is installed on a server.
    fn added_to_server(&self) {}

    /// Called when the handler is replaced or the server stops.
    fn cleanup(&self) {}
}

/// A WebSocket session handler.
///
/// Inbound messages arrive fully reassembled and decompressed. The `ws`
/// handle may be cloned and moved to other tasks for sending.
#[async_trait]
pub trait WebSocketHandler: Send + Sync {
    /// Invoked before the first frame is read.
    async fn on_start(&mut self, _ws: &WebSocket) -> WsHandlerResult {
        Ok(None)
    }

    /// A complete text message.
    async fn on_text(&mut self, _ws: &WebSocket, _text: String) -> WsHandlerResult {
        Ok(None)
    }

    /// A complete binary message.
    async fn on_binary(&mut self, _ws: &WebSocket, _payload: Vec<u8>) -> WsHandlerResult {
        Ok(None)
    }

    /// A Ping frame. The default replies with a Pong carrying the identical
    /// payload, as RFC 6455 Section 5.5.3 expects.
    async fn on_ping(&mut self, ws: &WebSocket, payload: Vec<u8>) -> WsHandlerResult {
        ws.send_pong(&payload).await?;
        Ok(None)
    }

    /// A Pong frame.
    async fn on_pong(&mut self, _ws: &WebSocket, _payload: Vec<u8>) -> WsHandlerResult {
        Ok(None)
    }

    /// Invoked exactly once when the session ends: with the peer's close
    /// code (1005 mapped to 1000), the code of a close we initiated, or
    /// 1006 when the stream ended without a close frame.
    async fn on_close(&mut self, _status_code: u16, _reason: String) {}
}
