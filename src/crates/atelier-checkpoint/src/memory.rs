//! In-memory checkpoint store.
//!
//! Keeps checkpoints in a per-session vector behind an async `RwLock`.
//! Suitable for tests and sessions that do not enable persistence.

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::traits::CheckpointStore;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Checkpoint store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointStore {
    sessions: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of checkpoints stored for a session.
    pub async fn len(&self, session_id: &str) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        let entries = sessions.entry(checkpoint.session_id.clone()).or_default();
        entries.push(checkpoint);
        entries.sort_by_key(|c| c.iteration);
        Ok(())
    }

    async fn latest(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .and_then(|entries| entries.last().cloned()))
    }

    async fn get(&self, session_id: &str, iteration: u32) -> Result<Option<Checkpoint>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).and_then(|entries| {
            entries.iter().find(|c| c.iteration == iteration).cloned()
        }))
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn checkpoint(session: &str, iteration: u32) -> Checkpoint {
        Checkpoint::new(session, iteration, json!({"iteration": iteration}), json!({}))
    }

    #[tokio::test]
    async fn test_put_and_latest() {
        let store = InMemoryCheckpointStore::new();
        store.put(checkpoint("s1", 1)).await.unwrap();
        store.put(checkpoint("s1", 2)).await.unwrap();

        let latest = store.latest("s1").await.unwrap().unwrap();
        assert_eq!(latest.iteration, 2);
    }

    #[tokio::test]
    async fn test_get_by_iteration() {
        let store = InMemoryCheckpointStore::new();
        store.put(checkpoint("s1", 1)).await.unwrap();
        store.put(checkpoint("s1", 2)).await.unwrap();

        let cp = store.get("s1", 1).await.unwrap().unwrap();
        assert_eq!(cp.iteration, 1);
        assert!(store.get("s1", 9).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let store = InMemoryCheckpointStore::new();
        store.put(checkpoint("a", 1)).await.unwrap();
        store.put(checkpoint("b", 5)).await.unwrap();

        assert_eq!(store.list("a").await.unwrap().len(), 1);
        assert_eq!(store.latest("b").await.unwrap().unwrap().iteration, 5);
        assert!(store.latest("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_ordered_by_iteration() {
        let store = InMemoryCheckpointStore::new();
        store.put(checkpoint("s", 3)).await.unwrap();
        store.put(checkpoint("s", 1)).await.unwrap();
        store.put(checkpoint("s", 2)).await.unwrap();

        let iterations: Vec<u32> = store
            .list("s")
            .await
            .unwrap()
            .iter()
            .map(|c| c.iteration)
            .collect();
        assert_eq!(iterations, vec![1, 2, 3]);
    }
}
