//! # Event Bus Errors

use thiserror::Error;

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Event bus errors
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Topic name is not among the declared set
    #[error("invalid topic: {0}")]
    InvalidTopic(String),
}
