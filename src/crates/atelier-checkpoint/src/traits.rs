//! Storage trait for checkpoint backends.

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use async_trait::async_trait;

/// Backend-agnostic checkpoint storage.
///
/// Implementations must keep checkpoints for a session ordered by
/// iteration; `latest` returns the highest iteration stored.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist one checkpoint.
    async fn put(&self, checkpoint: Checkpoint) -> Result<()>;

    /// Fetch the most recent checkpoint for a session, if any.
    async fn latest(&self, session_id: &str) -> Result<Option<Checkpoint>>;

    /// Fetch a specific checkpoint by iteration.
    async fn get(&self, session_id: &str, iteration: u32) -> Result<Option<Checkpoint>>;

    /// List all checkpoints for a session, ordered by iteration.
    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>>;
}
