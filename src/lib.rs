//! murmur - real-time subscription fan-out for a group-chat backend
//!
//! The server accepts long-lived client subscriptions over WebSocket,
//! evaluates per-subscription filters against events published by mutation
//! resolvers, and delivers matching payloads to exactly the interested
//! subscribers.

pub mod bus;
pub mod cli;
pub mod config;
pub mod engine;
pub mod model;
pub mod protocol;
pub mod schema;
pub mod server;
