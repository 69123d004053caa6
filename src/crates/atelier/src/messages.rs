//! Client-to-engine control messages.
//!
//! The transport shell (websocket, stdio, whatever fronts the engine)
//! decodes client traffic into these and feeds them to the session
//! controller. `init` must come first on every connection.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// What a client may send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind a workspace; must be the first message.
    Init { workspace_path: PathBuf },
    /// Start a workflow run.
    Query { text: String },
    /// Cooperatively cancel the in-flight run.
    Cancel {},
    /// Answer a pending `approval_request`.
    ApprovalResponse {
        correlation_id: String,
        decision: ApprovalDecision,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        feedback: Option<String>,
    },
}

/// Client verdict on an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalDecision {
    Approved,
    Rejected,
    Modified,
}
