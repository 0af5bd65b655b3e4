//! CLI error types and conversions

use crate::fetcher::FetchError;
use crate::orchestrator::OrchestratorError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Fetcher error
    #[error("fetcher error: {0}")]
    FetchError(#[from] FetchError),

    /// Orchestrator error
    #[error("{0}")]
    OrchestratorError(#[from] OrchestratorError),

    /// Report could not be serialized
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),
}
