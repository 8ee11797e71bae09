//! CLI-specific error types
//!
//! All CLI errors are fatal: the process prints them and exits non-zero.

use thiserror::Error;

use crate::config::ConfigError;
use crate::server::ServerError;

/// Result type for CLI commands
pub type CliResult<T> = Result<T, CliError>;

/// CLI errors
#[derive(Debug, Error)]
pub enum CliError {
    /// Configuration loading or validation failed
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Server failed to bind or serve
    #[error("server error: {0}")]
    Server(#[from] ServerError),

    /// Async runtime could not be built
    #[error("runtime error: {0}")]
    Runtime(String),
}
