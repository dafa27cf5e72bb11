//! Serialized checkpoint writes to the shared configuration document.
//!
//! Chats running in parallel all write to the same file. Each commit is one
//! read-modify-write of the in-memory document followed by a full save, done
//! while holding the lock.

use crate::domain::{ChatCursor, DomainError, DownloaderConfig};
use crate::ports::ConfigStore;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub struct CheckpointStore {
    store: Arc<dyn ConfigStore>,
    document: Mutex<DownloaderConfig>,
}

impl CheckpointStore {
    pub fn new(store: Arc<dyn ConfigStore>, document: DownloaderConfig) -> Self {
        Self {
            store,
            document: Mutex::new(document),
        }
    }

    /// Write `cursor` into chat entry `index` and persist the whole document.
    ///
    /// The in-memory document is updated even when the save fails.
    pub async fn commit(&self, index: usize, cursor: &ChatCursor) -> Result<(), DomainError> {
        let mut document = self.document.lock().await;
        let entry = document
            .chats
            .get_mut(index)
            .ok_or_else(|| DomainError::Config(format!("no chat entry #{}", index)))?;
        entry.apply_cursor(cursor);
        debug!(
            chat_id = cursor.chat_id,
            last_read_message_id = cursor.last_read_message_id,
            retry = cursor.ids_to_retry.len(),
            "writing checkpoint"
        );
        self.store.save(&document).await
    }

    pub async fn snapshot(&self) -> DownloaderConfig {
        self.document.lock().await.clone()
    }

    pub fn into_document(self) -> DownloaderConfig {
        self.document.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::yaml_store::YamlConfigStore;
    use crate::domain::ChatConfig;

    #[tokio::test]
    async fn test_commit_persists_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(YamlConfigStore::new(dir.path().join("config.yaml")));
        let mut document = DownloaderConfig::default();
        document.chats = vec![ChatConfig::new(1), ChatConfig::new(2)];
        let checkpoints = CheckpointStore::new(Arc::clone(&store) as Arc<dyn ConfigStore>, document);

        checkpoints
            .commit(1, &ChatCursor::new(2, 40, &[7, 3]))
            .await
            .unwrap();

        let saved = store.load().await.unwrap();
        assert_eq!(saved.chats[0].last_read_message_id, 0);
        assert_eq!(saved.chats[1].last_read_message_id, 40);
        assert_eq!(saved.chats[1].ids_to_retry, vec![3, 7]);
        assert_eq!(checkpoints.snapshot().await, saved);
    }

    #[tokio::test]
    async fn test_commit_unknown_index() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(YamlConfigStore::new(dir.path().join("config.yaml")));
        let checkpoints = CheckpointStore::new(store, DownloaderConfig::default());
        let err = checkpoints.commit(3, &ChatCursor::new(1, 1, &[])).await;
        assert!(matches!(err, Err(DomainError::Config(_))));
    }
}
