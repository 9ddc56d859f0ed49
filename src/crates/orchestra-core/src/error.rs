//! Error types for the pipeline engine
//!
//! All errors implement `std::error::Error` via the `thiserror` crate.

use thiserror::Error;

/// Convenience result type using [`OrchestraError`]
pub type Result<T> = std::result::Result<T, OrchestraError>;

/// Error type for graph construction, validation, and execution
#[derive(Error, Debug)]
pub enum OrchestraError {
    /// Malformed DOT source or condition expression
    #[error("Parse error: {0}")]
    Parse(String),

    /// Graph violates a structural invariant
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A stage referenced a node or handler that does not exist
    ///
    /// This is a programmer error in the graph or the registry, not a
    /// recoverable stage failure.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// A session could not be restored from its turn log
    #[error("Resume failed: {0}")]
    Resume(String),

    /// Prompt or command template could not be rendered
    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    /// Configuration file could not be read or parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestraError {
    /// Create an execution error with stage context
    pub fn execution(node: impl AsRef<str>, msg: impl AsRef<str>) -> Self {
        Self::Execution(format!("node '{}': {}", node.as_ref(), msg.as_ref()))
    }
}
