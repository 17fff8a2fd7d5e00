//! Connection ownership and the exchange swap.
//!
//! A [`Connection`] owns one peer: the buffered read half (with pushback),
//! the buffered write half, and the currently active exchange. It starts in
//! HTTP; an upgrade hands the same buffers to a WebSocket exchange, so no
//! bytes buffered during the handshake are lost. There is no downgrade; a
//! WebSocket exchange is terminal.

pub(crate) mod io;

mod http_exchange;
mod response;
mod ws_exchange;

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, BufWriter};
use tracing::{debug, error};

pub use http_exchange::{HttpContext, HttpExchange};
pub use response::{HttpResponse, State as ResponseState};
pub use ws_exchange::{WebSocket, WebSocketExchange};

use crate::codec::HttpInput;
use crate::connection::http_exchange::Outcome;
use crate::connection::io::InputBuf;
use crate::server::ServerShared;

/// The active protocol engine on a connection.
pub(crate) enum Exchange {
    Http(HttpExchange),
    WebSocket(WebSocketExchange),
}

pub struct Connection {
    exchange: Exchange,
}

impl Connection {
    pub(crate) fn new(
        shared: Arc<ServerShared>,
        reader: impl AsyncRead + Send + Sync + Unpin + 'static,
        writer: impl AsyncWrite + Send + Unpin + 'static,
    ) -> Self {
        let input = InputBuf::new(Box::new(reader), shared.config.input_buffer_size);
        let boxed_writer: Box<dyn AsyncWrite + Send + Unpin> = Box::new(writer);
        let output = BufWriter::with_capacity(shared.config.output_buffer_size, boxed_writer);
        Self { exchange: Exchange::Http(HttpExchange::new(HttpInput::new(input), output, shared)) }
    }

    /// Drives the connection to completion: processes the active exchange,
    /// loops only when an exchange was replaced by an upgrade, and closes
    /// the socket (by dropping it) on the way out.
    pub async fn run(self) {
        let mut exchange = self.exchange;
        loop {
            exchange = match exchange {
                Exchange::Http(http) => match http.process().await {
                    Ok(Outcome::Upgraded(ws)) => Exchange::WebSocket(ws),
                    Ok(Outcome::Closed) => {
                        debug!("connection finished");
                        return;
                    }
                    Err(e) if e.is_disconnect() => {
                        debug!("client disconnected: {e}");
                        return;
                    }
                    Err(e) => {
                        error!("connection failed: {e}");
                        return;
                    }
                },
                Exchange::WebSocket(ws) => {
                    ws.process().await;
                    debug!("websocket session finished");
                    return;
                }
            };
        }
    }
}
