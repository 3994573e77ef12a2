//! Error types for the MACE runtime.

use mace_core::MaceError;
use thiserror::Error;

/// Error type for engine, store and source operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Kernel error (validation, insufficient data, run failure)
    #[error(transparent)]
    Core(#[from] MaceError),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Schema not configured for this engine
    #[error("unknown schema: {0}")]
    UnknownSchema(String),

    /// Item absent from the schema's current result
    #[error("item '{item_id}' not found in results for schema '{schema}'")]
    ItemNotFound { schema: String, item_id: String },

    /// Internal error
    #[error("{0}")]
    Internal(String),
}

/// Result type alias using the runtime Error.
pub type Result<T> = std::result::Result<T, Error>;
