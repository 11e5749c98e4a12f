//! In-memory snapshot store for tests

use async_trait::async_trait;
use dashmap::DashMap;

use super::{SnapshotStore, StoreError};

/// Snapshot store backed by process memory.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    objects: DashMap<String, Vec<u8>>,
}

impl InMemorySnapshotStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), StoreError> {
        self.objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.objects
            .get(key)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_list() {
        let store = InMemorySnapshotStore::new();
        store.put("a/1", b"one".to_vec()).await.unwrap();
        store.put("a/2", b"two".to_vec()).await.unwrap();
        store.put("b/1", b"other".to_vec()).await.unwrap();

        assert_eq!(store.get("a/1").await.unwrap(), b"one");
        assert_eq!(store.list("a/").await.unwrap(), vec!["a/1", "a/2"]);
        assert!(matches!(
            store.get("a/404").await,
            Err(StoreError::NotFound(_))
        ));
    }
}
