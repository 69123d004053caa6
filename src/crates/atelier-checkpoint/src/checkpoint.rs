//! Checkpoint record: one state snapshot per node transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A serialized snapshot of workflow state taken after a node transition.
///
/// The `state` and `command` fields are stored as JSON values so the store
/// stays decoupled from the engine's state type. Structural equality of the
/// JSON is the round-trip guarantee tests assert against.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    /// Session this run belongs to.
    pub session_id: String,
    /// Iteration counter at the time of the snapshot.
    pub iteration: u32,
    /// Full workflow state, JSON-encoded.
    pub state: Value,
    /// The command that produced this transition, JSON-encoded.
    pub command: Value,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Create a checkpoint stamped with the current time.
    pub fn new(session_id: impl Into<String>, iteration: u32, state: Value, command: Value) -> Self {
        Self {
            session_id: session_id.into(),
            iteration,
            state,
            command,
            created_at: Utc::now(),
        }
    }
}
