//! # Connection Manager
//!
//! Owns the bidirectional transport: accepts WebSocket connections,
//! performs the init handshake, parses inbound frames, dispatches them to
//! the subscription engine, and writes outbound frames in enqueue order.

pub mod connection;
pub mod errors;
pub mod websocket;

pub use connection::{run_connection, ConnectionSettings, ConnectionState};
pub use errors::{ServerError, ServerResult};
pub use websocket::WebSocketServer;
