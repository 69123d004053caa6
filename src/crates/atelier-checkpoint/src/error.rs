//! Error types for checkpoint operations.

use thiserror::Error;

/// Result type for checkpoint operations.
pub type Result<T> = std::result::Result<T, CheckpointError>;

/// Errors that can occur while saving or loading checkpoints.
#[derive(Debug, Error)]
pub enum CheckpointError {
    /// Snapshot could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend I/O failed (filesystem store).
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// The requested checkpoint does not exist.
    #[error("checkpoint not found: session={session_id} iteration={iteration}")]
    NotFound { session_id: String, iteration: u32 },

    /// Backend-specific failure.
    #[error("backend error: {0}")]
    Backend(String),
}
