//! # Server Errors

use thiserror::Error;

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Transport-level server errors
#[derive(Debug, Error)]
pub enum ServerError {
    /// Bind address did not parse
    #[error("invalid bind address '{0}'")]
    InvalidBindAddr(String),

    /// Listener could not bind
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// WebSocket handshake failed
    #[error("websocket handshake failed: {0}")]
    Handshake(String),

    /// Accept loop failure
    #[error("accept failed: {0}")]
    Accept(String),
}
