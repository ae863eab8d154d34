use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Blob store operation errors
#[derive(Debug, Error)]
pub enum BlobStoreError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("List failed: {0}")]
    ListFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type BlobStoreResult<T> = Result<T, BlobStoreError>;

/// One object returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobEntry {
    pub key: String,
    /// When the backend exposes it; the orphan sweep skips entries without
    /// an age rather than guessing.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Blob store abstraction.
///
/// Every operation is idempotent and safe to retry: deleting an absent key
/// succeeds, putting the same key twice overwrites. The bucket is bound at
/// construction; keys follow the [`crate::keys`] scheme.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Write an object under the given key.
    async fn put(&self, key: &str, content_type: &str, data: Vec<u8>) -> BlobStoreResult<()>;

    /// Check whether an object exists.
    async fn exists(&self, key: &str) -> BlobStoreResult<bool>;

    /// Delete an object. Deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> BlobStoreResult<()>;

    /// List all objects under a key prefix.
    async fn list(&self, prefix: &str) -> BlobStoreResult<Vec<BlobEntry>>;
}
