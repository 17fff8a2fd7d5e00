//! Wire codecs: the strict HTTP/1.1 request parser, request body adapters,
//! the WebSocket frame reader, permessage-deflate, and the upgrade
//! handshake helpers.

pub(crate) mod body;
pub mod handshake;
mod http_input;
mod ws_compression;
mod ws_frame;
mod ws_input;

pub use http_input::HttpInput;
pub use ws_compression::WebSocketCompression;
pub use ws_frame::WebSocketFrame;
pub use ws_input::WebSocketInput;
