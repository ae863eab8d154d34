//! In-memory blob store for tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::traits::{BlobEntry, BlobStore, BlobStoreError, BlobStoreResult};

#[derive(Clone)]
struct StoredObject {
    data: Vec<u8>,
    last_modified: DateTime<Utc>,
}

/// Blob store backed by a shared in-memory map.
///
/// Clones share the same map, so a test can hand one handle to the service
/// under test and keep another for assertions.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Arc<Mutex<HashMap<String, StoredObject>>>,
    fail_next: Arc<Mutex<bool>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an object directly, bypassing `put` (for seeding fixtures).
    pub fn insert(&self, key: &str, data: Vec<u8>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
    }

    /// Insert an object whose `last_modified` lies `age` in the past, for
    /// exercising the orphan sweep's age guard.
    pub fn insert_aged(&self, key: &str, data: Vec<u8>, age: std::time::Duration) {
        let age = Duration::from_std(age).expect("age out of range");
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now() - age,
            },
        );
    }

    pub fn has(&self, key: &str) -> bool {
        self.objects.lock().unwrap().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).map(|o| o.data.clone())
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make the next operation fail with a backend error.
    pub fn fail_next(&self) {
        *self.fail_next.lock().unwrap() = true;
    }

    fn take_failure(&self) -> bool {
        std::mem::take(&mut *self.fail_next.lock().unwrap())
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, key: &str, _content_type: &str, data: Vec<u8>) -> BlobStoreResult<()> {
        if self.take_failure() {
            return Err(BlobStoreError::UploadFailed("injected failure".to_string()));
        }
        self.insert(key, data);
        Ok(())
    }

    async fn exists(&self, key: &str) -> BlobStoreResult<bool> {
        if self.take_failure() {
            return Err(BlobStoreError::BackendError("injected failure".to_string()));
        }
        Ok(self.has(key))
    }

    async fn delete(&self, key: &str) -> BlobStoreResult<()> {
        if self.take_failure() {
            return Err(BlobStoreError::DeleteFailed("injected failure".to_string()));
        }
        self.objects.lock().unwrap().remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> BlobStoreResult<Vec<BlobEntry>> {
        if self.take_failure() {
            return Err(BlobStoreError::ListFailed("injected failure".to_string()));
        }
        let objects = self.objects.lock().unwrap();
        let mut entries: Vec<BlobEntry> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| BlobEntry {
                key: key.clone(),
                last_modified: Some(object.last_modified),
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_exists_delete() {
        let store = MemoryBlobStore::new();
        store
            .put("wallpapers/a", "image/png", vec![1, 2, 3])
            .await
            .unwrap();
        assert!(store.exists("wallpapers/a").await.unwrap());
        store.delete("wallpapers/a").await.unwrap();
        assert!(!store.exists("wallpapers/a").await.unwrap());
        // Deleting an absent key is a no-op, matching the S3 backend.
        store.delete("wallpapers/a").await.unwrap();
    }

    #[tokio::test]
    async fn list_respects_prefix_and_reports_age() {
        let store = MemoryBlobStore::new();
        store.insert("wallpapers/a", vec![]);
        store.insert_aged("wallpapers/b", vec![], std::time::Duration::from_secs(7200));
        store.insert("thumbnails/c", vec![]);

        let entries = store.list("wallpapers/").await.unwrap();
        assert_eq!(entries.len(), 2);
        let aged = entries.iter().find(|e| e.key == "wallpapers/b").unwrap();
        let age = Utc::now() - aged.last_modified.unwrap();
        assert!(age.num_seconds() >= 7100);
    }

    #[tokio::test]
    async fn injected_failure_hits_once() {
        let store = MemoryBlobStore::new();
        store.fail_next();
        assert!(store.exists("wallpapers/a").await.is_err());
        assert!(store.exists("wallpapers/a").await.is_ok());
    }
}
