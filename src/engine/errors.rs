//! # Engine Errors

use thiserror::Error;

use crate::protocol::ErrorKind;
use crate::schema::SchemaError;

/// Result type for start requests
pub type StartResult = Result<(), StartError>;

/// Failure modes of a `start` request. Each maps onto a per-subscription
/// `error` frame; none of them disturbs other subscriptions.
#[derive(Debug, Error)]
pub enum StartError {
    /// Operation resolution or variable validation failed
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// `id` reused while an instance for it is live
    #[error("subscription '{0}' is already active on this connection")]
    DuplicateSubscription(String),

    /// Per-connection subscription cap reached
    #[error("too many subscriptions (max: {0})")]
    TooManySubscriptions(usize),

    /// Subscription setup failed
    #[error("subscription setup failed")]
    Internal,
}

impl StartError {
    /// The wire error kind for this failure
    pub fn kind(&self) -> ErrorKind {
        match self {
            StartError::Schema(SchemaError::InvalidOperation(_)) => ErrorKind::InvalidOperation,
            StartError::Schema(SchemaError::Validation(_)) => ErrorKind::ValidationError,
            StartError::Schema(SchemaError::UnknownSubscription(_)) => {
                ErrorKind::UnknownSubscription
            }
            StartError::DuplicateSubscription(_) => ErrorKind::DuplicateSubscription,
            StartError::TooManySubscriptions(_) => ErrorKind::TooManySubscriptions,
            StartError::Internal => ErrorKind::InternalError,
        }
    }
}
