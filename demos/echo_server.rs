//! A small demo server: plain HTTP responses on `/`, a POST echo on
//! `/echo`, and a WebSocket echo session on `/ws`.
//!
//! Run with `cargo run --example echo_server`, then try:
//! - `curl http://127.0.0.1:8080/`
//! - `curl -d 'hello' http://127.0.0.1:8080/echo`
//! - `websocat ws://127.0.0.1:8080/ws`

use async_trait::async_trait;
use hatchway::connection::{HttpContext, WebSocket};
use hatchway::handler::{HttpHandler, WebSocketHandler, WsHandlerResult};
use hatchway::protocol::HttpError;
use hatchway::{Config, Server};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

struct DemoHandler;

#[async_trait]
impl HttpHandler for DemoHandler {
    async fn handle(&self, context: &mut HttpContext<'_>) -> Result<(), HttpError> {
        match context.request().target() {
            "/" => {
                context.response().content_type("text/plain");
                context.response().write_string("hello from hatchway\n").await
            }
            "/echo" => {
                let body = context.body_to_string().await?;
                context.response().content_type("text/plain");
                context.response().write_string(&body).await
            }
            "/ws" => context.upgrade_to_websocket(Box::new(WsEcho)).await,
            _ => Ok(()),
        }
    }
}

struct WsEcho;

#[async_trait]
impl WebSocketHandler for WsEcho {
    async fn on_text(&mut self, ws: &WebSocket, text: String) -> WsHandlerResult {
        info!("echoing {} bytes", text.len());
        ws.send_text(&text).await?;
        Ok(None)
    }

    async fn on_close(&mut self, status_code: u16, _reason: String) {
        info!(status_code, "websocket session closed");
    }
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::DEBUG).finish();
    tracing::subscriber::set_global_default(subscriber).expect("setting default subscriber failed");

    let server = Server::new(Config::default());
    server.set_handler(Box::new(DemoHandler));
    server.start(("127.0.0.1", 8080)).await?;
    server.join().await;
    Ok(())
}
