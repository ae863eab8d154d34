use async_trait::async_trait;
use thiserror::Error;

use wallcat_core::UploadStoredEvent;

/// Event channel errors
#[derive(Debug, Error)]
pub enum EventError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Publish timed out")]
    PublishTimeout,

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Durable, at-least-once publisher for upload completion events.
///
/// An `Ok` return means the channel has acknowledged durable persistence;
/// callers transition the row only after that. Errors leave the row
/// untouched for the next reconciliation cycle.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish_stored(&self, event: &UploadStoredEvent) -> Result<(), EventError>;
}
