//! # Schema Errors

use thiserror::Error;

/// Result type for schema operations
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Errors raised while resolving a `start` request against the schema
#[derive(Debug, Clone, Error)]
pub enum SchemaError {
    /// The document does not carry a single subscription operation
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// Variables do not match the declared argument schema
    #[error("validation failed: {0}")]
    Validation(String),

    /// Subscription name not declared by the schema
    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),
}
