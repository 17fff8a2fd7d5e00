//! Protocol-level data model: parsed requests, header and chunk records, and
//! the error taxonomy shared by the HTTP and WebSocket engines.

mod chunk;
mod error;
mod header;
mod request;

pub use chunk::Chunk;
pub use error::{HttpError, WsError};
pub use header::Header;
pub use request::{BodyMode, HttpRequest};
