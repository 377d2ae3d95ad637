//! Error types for burrow-runtime.

use crate::types::SandboxId;
use thiserror::Error;

/// Result type alias for burrow-runtime operations.
pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Errors that can occur during sandbox lifecycle operations.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Sandbox not found
    #[error("sandbox not found: {0}")]
    NotFound(SandboxId),

    /// Invalid sandbox state for operation
    #[error("invalid state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state
        expected: String,
        /// Actual state
        actual: String,
    },

    /// Attach handles already handed out for this sandbox
    #[error("sandbox already attached: {0}")]
    AlreadyAttached(SandboxId),

    /// Sandbox spec failed validation
    #[error("invalid spec: {0}")]
    InvalidSpec(String),

    /// Failed to spawn the sandboxed process
    #[error("spawn failed: {0}")]
    Spawn(#[source] std::io::Error),

    /// Exit monitor failed to report a status
    #[error("exit watch failed: {0}")]
    ExitWatch(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
