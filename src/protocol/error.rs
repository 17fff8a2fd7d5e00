//! Error types for the connection protocol engine
//!
//! Two error stacks cover the two wire protocols a connection can speak:
//!
//! - [`HttpError`]: everything that can go wrong while parsing requests or
//!   emitting responses. The `BadRequest` variant carries the exact text that
//!   ends up in the canonical `400` response body.
//! - [`WsError`]: WebSocket failures. Protocol violations carry the RFC 6455
//!   close code that must be echoed to the peer before the session ends.

use std::io;
use thiserror::Error;

/// Errors raised by the HTTP side of a connection.
#[derive(Debug, Error)]
pub enum HttpError {
    /// Malformed bytes on the HTTP wire. Recovered by sending a minimal
    /// `400` response with `connection: close` and closing the connection.
    #[error("{reason}")]
    BadRequest { reason: String },

    /// A response surface was used in a state that does not permit it,
    /// e.g. writing after the response completed.
    #[error("response state error: {reason}")]
    InvalidState { reason: &'static str },

    /// A handler committed a response but never finished its body. This is a
    /// programmer error; the connection is torn down.
    #[error("handler committed a response but did not complete it")]
    ResponseNotCompleted,

    /// A WebSocket upgrade was requested on a request that does not qualify.
    #[error("websocket upgrade failed: {reason}")]
    Upgrade { reason: String },

    /// I/O error on the underlying connection.
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl HttpError {
    /// Creates a new BadRequest error carrying the user-visible reason text
    pub fn bad_request<S: ToString>(reason: S) -> Self {
        Self::BadRequest { reason: reason.to_string() }
    }

    /// Creates a new InvalidState error
    pub fn invalid_state(reason: &'static str) -> Self {
        Self::InvalidState { reason }
    }

    /// Creates a new Upgrade error
    pub fn upgrade<S: ToString>(reason: S) -> Self {
        Self::Upgrade { reason: reason.to_string() }
    }

    /// Creates a new I/O error
    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }

    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::BadRequest { .. })
    }

    /// Returns true for errors that just mean the peer went away.
    pub fn is_disconnect(&self) -> bool {
        match self {
            Self::Io { source } => matches!(
                source.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Errors raised by the WebSocket side of a connection.
#[derive(Debug, Error)]
pub enum WsError {
    /// A protocol violation with the close code to send before terminating
    /// the session: 1002 for framing violations, 1009 for oversized payloads.
    #[error("websocket protocol violation ({code}): {reason}")]
    Protocol { code: u16, reason: String },

    /// I/O error on the underlying connection.
    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl WsError {
    /// Creates a new Protocol error with the associated close code
    pub fn protocol<S: ToString>(code: u16, reason: S) -> Self {
        Self::Protocol { code, reason: reason.to_string() }
    }
}
