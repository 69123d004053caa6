//! Engine error taxonomy.
//!
//! Two layers: [`EngineError`] is the fatal-path error raised to the graph,
//! while [`ErrorKind`] is the serializable classification attached to
//! recoverable per-agent error entries in workflow state and to `error`
//! events.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Classification of a recorded error, carried in state and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// LLM failure that is worth retrying at the adapter level.
    TransientLlmError,
    /// LLM failure that will not succeed on retry (auth, invalid request).
    PermanentLlmError,
    /// A tool call did not answer within its timeout.
    ToolCallTimeout,
    /// A tool call answered with a failure.
    ToolCallFailed,
    /// The bus could not spawn or reconnect the tool server.
    ToolServerUnavailable,
    /// A workflow-state invariant was violated (programming error).
    StateInvariantViolation,
    /// A generated file path resolved outside the workspace.
    PathEscape,
    /// The hard recursion ceiling tripped.
    RecursionLimitExceeded,
    /// Cooperative cancellation.
    Cancelled,
    /// A node exceeded its wall-clock budget.
    NodeTimeout,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// Whether errors of this kind are worth retrying.
    pub fn default_retriable(&self) -> bool {
        matches!(
            self,
            ErrorKind::TransientLlmError
                | ErrorKind::ToolCallTimeout
                | ErrorKind::ToolCallFailed
                | ErrorKind::ToolServerUnavailable
        )
    }

    /// Stable string form used in event payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::TransientLlmError => "transient_llm_error",
            ErrorKind::PermanentLlmError => "permanent_llm_error",
            ErrorKind::ToolCallTimeout => "tool_call_timeout",
            ErrorKind::ToolCallFailed => "tool_call_failed",
            ErrorKind::ToolServerUnavailable => "tool_server_unavailable",
            ErrorKind::StateInvariantViolation => "state_invariant_violation",
            ErrorKind::PathEscape => "path_escape",
            ErrorKind::RecursionLimitExceeded => "recursion_limit_exceeded",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::NodeTimeout => "node_timeout",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fatal-path errors raised to the workflow graph.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A workflow-state invariant was violated; the run aborts.
    #[error("state invariant violation: {0}")]
    StateInvariant(String),

    /// A path escaped the workspace boundary.
    #[error("path escapes workspace: {0}")]
    PathEscape(String),

    /// The recursion ceiling tripped.
    #[error("recursion limit exceeded after {transitions} transitions")]
    RecursionLimit { transitions: u32 },

    /// The run was cancelled cooperatively.
    #[error("workflow cancelled")]
    Cancelled,

    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(String),

    /// Workspace validation failed at session bind.
    #[error("workspace error: {0}")]
    Workspace(String),

    /// Snapshot persistence failed.
    #[error("checkpoint error: {0}")]
    Checkpoint(#[from] atelier_checkpoint::CheckpointError),

    /// Serialization of state or events failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem failure outside the path-safety cases.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Anything else that aborts a run.
    #[error("{0}")]
    Internal(String),
}

impl EngineError {
    /// The event-facing classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::StateInvariant(_) => ErrorKind::StateInvariantViolation,
            EngineError::PathEscape(_) => ErrorKind::PathEscape,
            EngineError::RecursionLimit { .. } => ErrorKind::RecursionLimitExceeded,
            EngineError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Internal,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serialization_is_snake_case() {
        let json = serde_json::to_string(&ErrorKind::PathEscape).unwrap();
        assert_eq!(json, "\"path_escape\"");
    }

    #[test]
    fn test_default_retriable() {
        assert!(ErrorKind::ToolCallTimeout.default_retriable());
        assert!(ErrorKind::TransientLlmError.default_retriable());
        assert!(!ErrorKind::PathEscape.default_retriable());
        assert!(!ErrorKind::PermanentLlmError.default_retriable());
    }

    #[test]
    fn test_engine_error_kind_mapping() {
        assert_eq!(
            EngineError::Cancelled.kind(),
            ErrorKind::Cancelled
        );
        assert_eq!(
            EngineError::RecursionLimit { transitions: 20 }.kind(),
            ErrorKind::RecursionLimitExceeded
        );
    }
}
