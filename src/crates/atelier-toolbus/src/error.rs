//! Error types for the tool bus.

use atelier_core::ErrorKind;
use thiserror::Error;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Errors surfaced to callers of the tool bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// The server subprocess could not be spawned.
    #[error("failed to spawn tool server `{server}`: {reason}")]
    Spawn { server: String, reason: String },

    /// The server is not in the manifest, or respawn already failed;
    /// subsequent calls fast-fail with this.
    #[error("tool server unavailable: {server}")]
    ServerUnavailable { server: String },

    /// The stdio pipe broke mid-conversation.
    #[error("transport error on `{server}`: {reason}")]
    Transport { server: String, reason: String },

    /// The server answered with something that is not JSON-RPC.
    #[error("protocol error from `{server}`: {reason}")]
    Protocol { server: String, reason: String },

    /// No response arrived within the call timeout.
    #[error("tool call timed out: {server}/{tool} after {timeout_ms}ms")]
    CallTimeout {
        server: String,
        tool: String,
        timeout_ms: u64,
    },

    /// The server answered with a JSON-RPC error object.
    #[error("tool call failed: {server}/{tool}: code={code} {message}")]
    CallFailed {
        server: String,
        tool: String,
        code: i64,
        message: String,
    },

    /// The call was cancelled cooperatively.
    #[error("tool call cancelled")]
    Cancelled,
}

impl BusError {
    /// Classification used for state error entries and events.
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            BusError::CallTimeout { .. } => ErrorKind::ToolCallTimeout,
            BusError::CallFailed { .. } | BusError::Protocol { .. } => ErrorKind::ToolCallFailed,
            BusError::Spawn { .. }
            | BusError::ServerUnavailable { .. }
            | BusError::Transport { .. } => ErrorKind::ToolServerUnavailable,
            BusError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Protocol errors mean the server is confused, not dead; they do not
    /// count toward crash accounting.
    pub fn counts_as_crash(&self) -> bool {
        matches!(
            self,
            BusError::Transport { .. } | BusError::CallTimeout { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_mapping() {
        let timeout = BusError::CallTimeout {
            server: "s".to_string(),
            tool: "t".to_string(),
            timeout_ms: 100,
        };
        assert_eq!(timeout.error_kind(), ErrorKind::ToolCallTimeout);
        assert!(timeout.counts_as_crash());

        let failed = BusError::CallFailed {
            server: "s".to_string(),
            tool: "t".to_string(),
            code: -32000,
            message: "boom".to_string(),
        };
        assert_eq!(failed.error_kind(), ErrorKind::ToolCallFailed);
        assert!(!failed.counts_as_crash());
    }
}
