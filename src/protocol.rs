//! # Subscription Wire Protocol
//!
//! Self-describing JSON frames with a `type` discriminator, carried as text
//! messages over the WebSocket transport.
//!
//! Client to server: `init`, `start`, `stop`, `terminate`.
//! Server to client: `init_ack`, `init_err`, `data`, `error`, `complete`,
//! `keepalive`.
//!
//! `id` is a client-chosen opaque string, unique per connection.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// JSON object carried as `variables` in a `start` payload
pub type VariableMap = Map<String, Value>;

/// Frames sent by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Begin a session
    Init {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },

    /// Start a subscription
    Start { id: String, payload: StartPayload },

    /// Stop one subscription
    Stop { id: String },

    /// Close the session
    Terminate,
}

/// Payload of a `start` frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartPayload {
    /// Operation document
    pub query: String,

    /// Variable bindings for the operation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<VariableMap>,

    /// Selects the operation when the document declares more than one
    #[serde(
        default,
        rename = "operationName",
        skip_serializing_if = "Option::is_none"
    )]
    pub operation_name: Option<String>,
}

impl StartPayload {
    /// A payload with just a query document
    pub fn query(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            variables: None,
            operation_name: None,
        }
    }

    /// Attach variable bindings
    pub fn with_variables(mut self, variables: VariableMap) -> Self {
        self.variables = Some(variables);
        self
    }
}

/// Frames sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Session ready
    InitAck,

    /// Rejected init; the connection closes after this frame
    InitErr { reason: String },

    /// Projected event for one subscription
    Data { id: String, payload: Value },

    /// Per-subscription error (with `id`) or session error (without)
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        payload: ErrorPayload,
    },

    /// Subscription ended; the last frame bearing this `id`
    Complete { id: String },

    /// Liveness
    Keepalive,
}

impl ServerFrame {
    /// Build a `data` frame
    pub fn data(id: impl Into<String>, payload: Value) -> Self {
        ServerFrame::Data {
            id: id.into(),
            payload,
        }
    }

    /// Build a per-subscription `error` frame
    pub fn subscription_error(id: impl Into<String>, kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            id: Some(id.into()),
            payload: ErrorPayload::new(kind, message),
        }
    }

    /// Build a session-level `error` frame
    pub fn session_error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerFrame::Error {
            id: None,
            payload: ErrorPayload::new(kind, message),
        }
    }

    /// Subscription id when this is a `data` frame
    pub fn data_subscription_id(&self) -> Option<&str> {
        match self {
            ServerFrame::Data { id, .. } => Some(id),
            _ => None,
        }
    }
}

/// Error payload carried by `error` and `init_err` frames.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Error kind discriminator
    pub kind: ErrorKind,

    /// Human-readable description
    pub message: String,
}

impl ErrorPayload {
    /// Create an error payload
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Error kinds surfaced on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The `start` frame does not carry a single subscription operation
    InvalidOperation,
    /// Variables fail schema validation
    ValidationError,
    /// Subscription name not declared
    UnknownSubscription,
    /// `id` reused on a connection with an active instance
    DuplicateSubscription,
    /// Per-connection subscription cap reached
    TooManySubscriptions,
    /// Outbound queue overflow
    SlowConsumer,
    /// Malformed inbound frame or out-of-state frame
    ProtocolError,
    /// Failure inside subscription setup or projection
    InternalError,
}
