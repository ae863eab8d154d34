//! Recording publisher for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use wallcat_core::UploadStoredEvent;

use crate::publisher::{EventError, EventPublisher};

/// Publisher that records every event in memory.
///
/// Clones share state. `publish_count` counts successful publishes only, so
/// at-most-once assertions compare it directly against the row count.
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<UploadStoredEvent>>>,
    publishes: Arc<AtomicUsize>,
    failing: Arc<AtomicBool>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<UploadStoredEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }

    /// While set, every publish fails without recording anything.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish_stored(&self, event: &UploadStoredEvent) -> Result<(), EventError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(EventError::PublishFailed("injected failure".to_string()));
        }
        self.events.lock().unwrap().push(event.clone());
        self.publishes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event() -> UploadStoredEvent {
        UploadStoredEvent {
            upload_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            content_hash: "cd".repeat(32),
            file_type: "image".to_string(),
            mime_type: "image/jpeg".to_string(),
            file_size_bytes: 2048,
            width: 1920,
            height: 1080,
            storage_bucket: "wallcat".to_string(),
            storage_key: "wallpapers/key".to_string(),
            original_filename: "ridge.jpg".to_string(),
            stored_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn records_successful_publishes() {
        let publisher = RecordingPublisher::new();
        let event = event();
        publisher.publish_stored(&event).await.unwrap();
        assert_eq!(publisher.publish_count(), 1);
        assert_eq!(publisher.published(), vec![event]);
    }

    #[tokio::test]
    async fn failures_record_nothing() {
        let publisher = RecordingPublisher::new();
        publisher.set_failing(true);
        assert!(publisher.publish_stored(&event()).await.is_err());
        assert_eq!(publisher.publish_count(), 0);
        publisher.set_failing(false);
        publisher.publish_stored(&event()).await.unwrap();
        assert_eq!(publisher.publish_count(), 1);
    }
}
