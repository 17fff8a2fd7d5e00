//! The keep-alive request loop and the per-request view handlers work with.
//!
//! One loop iteration: parse a request, run the handler chain until one
//! commits a response, fall back to a 404, enforce that the response was
//! completed, drain whatever body the handler left unread, then loop or
//! terminate. An upgrade requested by a handler ends the loop and hands the
//! connection's buffers to a freshly built WebSocket exchange.

use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tracing::{debug, trace};

use crate::codec::body::RequestBody;
use crate::codec::handshake;
use crate::codec::{HttpInput, WebSocketCompression};
use crate::connection::io::ConnWriter;
use crate::connection::response::HttpResponse;
use crate::connection::ws_exchange::WebSocketExchange;
use crate::handler::WebSocketHandler;
use crate::protocol::{HttpError, HttpRequest};
use crate::server::ServerShared;

/// How an HTTP exchange ended: the connection is done, or it graduated to a
/// WebSocket session that now owns the buffers.
pub(crate) enum Outcome {
    Closed,
    Upgraded(WebSocketExchange),
}

pub(crate) struct PendingUpgrade {
    handler: Box<dyn WebSocketHandler>,
    compression: Option<WebSocketCompression>,
}

pub struct HttpExchange {
    input: HttpInput,
    output: ConnWriter,
    shared: Arc<ServerShared>,
}

impl HttpExchange {
    pub(crate) fn new(input: HttpInput, output: ConnWriter, shared: Arc<ServerShared>) -> Self {
        Self { input, output, shared }
    }

    pub(crate) async fn process(mut self) -> Result<Outcome, HttpError> {
        loop {
            let mut request = match self.input.read_request().await {
                Ok(Some(request)) => request,
                Ok(None) => return Ok(Outcome::Closed),
                Err(e) if e.is_bad_request() => {
                    self.send_bad_request(&e.to_string()).await?;
                    return Ok(Outcome::Closed);
                }
                Err(e) => return Err(e),
            };

            if let Err(e) = request.prepare(&self.shared.config) {
                if e.is_bad_request() {
                    self.send_bad_request(&e.to_string()).await?;
                    return Ok(Outcome::Closed);
                }
                return Err(e);
            }

            trace!(method = request.method(), target = request.target(), "handling request");

            let body = RequestBody::for_request(&request);
            let response = HttpResponse::new(&mut self.output, &request);
            let mut context = HttpContext {
                request,
                response,
                input: &mut self.input,
                body,
                max_chunk_size: self.shared.config.maximum_chunk_size,
                pending_upgrade: None,
            };

            let handlers = self.shared.handlers.load_full();
            for handler in handlers.iter() {
                handler.handle(&mut context).await?;
                if context.response.is_committed() {
                    break;
                }
            }

            if !context.response.is_committed() {
                context.response.status(404).content_type("text/plain");
                context.response.write_string("Not found.").await?;
            }

            let complete = context.response.is_complete();
            let close_after = context.response.will_close();
            let HttpContext { mut body, pending_upgrade, .. } = context;

            if !complete {
                return Err(HttpError::ResponseNotCompleted);
            }

            // leave the connection at the next request boundary even when
            // the handler ignored the body
            body.drain(&mut self.input, self.shared.config.maximum_chunk_size).await?;

            if let Some(upgrade) = pending_upgrade {
                debug!("connection upgraded to websocket");
                return Ok(Outcome::Upgraded(WebSocketExchange::new(
                    self.input.into_io(),
                    self.output,
                    upgrade.handler,
                    upgrade.compression,
                    self.shared.config.maximum_ws_payload_size,
                )));
            }

            if close_after {
                return Ok(Outcome::Closed);
            }
        }
    }

    /// The canonical minimal 400: raw bytes, no response machinery, since
    /// there may not even be a parsed request to respond to.
    async fn send_bad_request(&mut self, message: &str) -> Result<(), HttpError> {
        debug!("bad request: {message}");
        let response = format!(
            "HTTP/1.1 400 \r\ncontent-type: text/plain\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
            message.len(),
            message
        );
        self.output.write_all(response.as_bytes()).await.map_err(HttpError::io)?;
        self.output.flush().await.map_err(HttpError::io)?;
        Ok(())
    }
}

/// A handler's view of one request/response cycle.
///
/// A handler may read the request, commit a response, request the WebSocket
/// upgrade, or return without acting so the next handler in the chain gets a
/// look.
pub struct HttpContext<'c> {
    pub(crate) request: HttpRequest,
    pub(crate) response: HttpResponse<'c>,
    pub(crate) input: &'c mut HttpInput,
    pub(crate) body: RequestBody,
    pub(crate) max_chunk_size: usize,
    pub(crate) pending_upgrade: Option<PendingUpgrade>,
}

impl<'c> HttpContext<'c> {
    pub fn request(&self) -> &HttpRequest {
        &self.request
    }

    pub fn response(&mut self) -> &mut HttpResponse<'c> {
        &mut self.response
    }

    /// True once a handler has committed a response for this request.
    pub fn did_respond(&self) -> bool {
        self.response.is_committed()
    }

    /// Reads request body bytes into `dst`; returns 0 at end of body.
    pub async fn read_body(&mut self, dst: &mut [u8]) -> Result<usize, HttpError> {
        self.body.read(self.input, self.max_chunk_size, dst).await
    }

    /// Reads the entire remaining request body.
    pub async fn body_to_vec(&mut self) -> Result<Vec<u8>, HttpError> {
        self.body.read_to_end(self.input, self.max_chunk_size).await
    }

    /// Reads the entire remaining request body as text, replacing invalid
    /// UTF-8.
    pub async fn body_to_string(&mut self) -> Result<String, HttpError> {
        let bytes = self.body_to_vec().await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Performs the WebSocket opening handshake (RFC 6455 Section 4.2) and
    /// schedules the exchange swap: validates the upgrade headers, answers
    /// 101 with the computed `Sec-WebSocket-Accept` and any negotiated
    /// permessage-deflate parameters, and installs `handler` as the
    /// session's message handler once this request cycle ends.
    pub async fn upgrade_to_websocket(
        &mut self,
        handler: Box<dyn WebSocketHandler>,
    ) -> Result<(), HttpError> {
        self.upgrade_to_websocket_with_protocol(handler, None).await
    }

    pub async fn upgrade_to_websocket_with_protocol(
        &mut self,
        handler: Box<dyn WebSocketHandler>,
        sub_protocol: Option<&str>,
    ) -> Result<(), HttpError> {
        let key = handshake::validate_upgrade(&self.request)?;
        let accept_key = handshake::compute_accept_key(key);

        let compression = self
            .request
            .header("sec-websocket-extensions")
            .and_then(WebSocketCompression::negotiate);

        self.response
            .status(101)
            .header("connection", "Upgrade")
            .header("upgrade", "websocket")
            .header("sec-websocket-accept", accept_key);

        if let Some(compression) = &compression {
            self.response.header("sec-websocket-extensions", compression.response_header_value());
        }
        if let Some(sub_protocol) = sub_protocol.filter(|p| !p.is_empty()) {
            self.response.header("sec-websocket-protocol", sub_protocol);
        }

        self.response.skip_body().await?;

        self.pending_upgrade = Some(PendingUpgrade { handler, compression });
        Ok(())
    }
}
