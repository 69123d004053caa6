//! Filesystem checkpoint store.
//!
//! Writes one JSON file per transition under
//! `<dir>/<session_id>/<iteration>.json`. Directory creation is lazy on the
//! first `put` for a session.

use crate::checkpoint::Checkpoint;
use crate::error::{CheckpointError, Result};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use crate::traits::CheckpointStore;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Checkpoint store that persists snapshots as JSON files.
#[derive(Debug)]
pub struct FileCheckpointStore {
    root: PathBuf,
    serializer: JsonSerializer,
}

impl FileCheckpointStore {
    /// Create a store rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            serializer: JsonSerializer::new(),
        }
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    fn checkpoint_path(&self, session_id: &str, iteration: u32) -> PathBuf {
        // Zero-padded so lexicographic order matches iteration order.
        self.session_dir(session_id).join(format!("{iteration:06}.json"))
    }

    async fn read_checkpoint(&self, path: &Path) -> Result<Checkpoint> {
        let data = tokio::fs::read(path).await?;
        self.serializer.loads(&data)
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<()> {
        let dir = self.session_dir(&checkpoint.session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.checkpoint_path(&checkpoint.session_id, checkpoint.iteration);
        let data = self.serializer.dumps(&checkpoint)?;
        tokio::fs::write(&path, data).await?;
        debug!(path = %path.display(), "checkpoint written");
        Ok(())
    }

    async fn latest(&self, session_id: &str) -> Result<Option<Checkpoint>> {
        let checkpoints = self.list(session_id).await?;
        Ok(checkpoints.into_iter().last())
    }

    async fn get(&self, session_id: &str, iteration: u32) -> Result<Option<Checkpoint>> {
        let path = self.checkpoint_path(session_id, iteration);
        if !path.exists() {
            return Ok(None);
        }
        self.read_checkpoint(&path).await.map(Some)
    }

    async fn list(&self, session_id: &str) -> Result<Vec<Checkpoint>> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths = Vec::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut checkpoints = Vec::with_capacity(paths.len());
        for path in paths {
            checkpoints.push(self.read_checkpoint(&path).await?);
        }
        Ok(checkpoints)
    }
}

impl FileCheckpointStore {
    /// Validate that the root directory can be created and written.
    pub async fn ensure_writable(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await?;
        let probe = self.root.join(".write-probe");
        tokio::fs::write(&probe, b"ok")
            .await
            .map_err(CheckpointError::Storage)?;
        tokio::fs::remove_file(&probe).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn checkpoint(session: &str, iteration: u32) -> Checkpoint {
        Checkpoint::new(session, iteration, json!({"iteration": iteration}), json!({}))
    }

    #[tokio::test]
    async fn test_put_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let cp = checkpoint("sess", 1);
        store.put(cp.clone()).await.unwrap();

        let restored = store.get("sess", 1).await.unwrap().unwrap();
        assert_eq!(restored, cp);
    }

    #[tokio::test]
    async fn test_latest_picks_highest_iteration() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        for i in [2, 11, 5] {
            store.put(checkpoint("sess", i)).await.unwrap();
        }

        // Zero padding keeps 11 after 5 in lexicographic order.
        let latest = store.latest("sess").await.unwrap().unwrap();
        assert_eq!(latest.iteration, 11);
    }

    #[tokio::test]
    async fn test_list_missing_session_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        assert!(store.list("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ensure_writable() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints"));
        store.ensure_writable().await.unwrap();
    }
}
