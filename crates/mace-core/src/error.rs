//! Error types for the MACE kernel

use thiserror::Error;

/// Errors that can occur while validating inputs or fitting a model
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MaceError {
    /// Invalid engine or schema configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Schema type the estimator cannot handle (text, span, slider, ...)
    #[error("schema '{schema}' has unsupported annotation type '{annotation_type}' (expected radio, likert, select or multiselect)")]
    UnsupportedSchemaType {
        schema: String,
        annotation_type: String,
    },

    /// Not enough eligible items to run; a skip, not a fault
    #[error("insufficient data for schema '{schema}': {eligible_items} eligible items, {min_items} required")]
    InsufficientData {
        schema: String,
        eligible_items: usize,
        min_items: usize,
    },

    /// A single restart produced non-finite or degenerate parameters
    #[error("restart {restart} diverged: {reason}")]
    NumericDivergence { restart: usize, reason: String },

    /// Every restart diverged
    #[error("run failed: {0}")]
    RunFailure(String),

    /// The wall-clock ceiling for a run was exceeded
    #[error("run exceeded its deadline after {elapsed_ms}ms (limit {limit_ms}ms)")]
    DeadlineExceeded { elapsed_ms: u64, limit_ms: u64 },
}

impl MaceError {
    /// Whether this error means "skip the run" rather than "the run broke"
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, Self::InsufficientData { .. })
    }

    /// Whether the run failed after it started (all restarts diverged or timed out)
    pub fn is_run_failure(&self) -> bool {
        matches!(self, Self::RunFailure(_) | Self::DeadlineExceeded { .. })
    }
}

/// Result type for kernel operations
pub type Result<T> = std::result::Result<T, MaceError>;
