use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::upload::UploadRecord;

/// Completion event announcing a durably stored upload to downstream
/// consumers (indexing, variant generation).
///
/// The payload carries the full metadata so consumers never need a follow-up
/// read against the record store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadStoredEvent {
    pub upload_id: Uuid,
    pub user_id: Uuid,
    pub content_hash: String,
    pub file_type: String,
    pub mime_type: String,
    pub file_size_bytes: i64,
    pub width: i32,
    pub height: i32,
    pub storage_bucket: String,
    pub storage_key: String,
    pub original_filename: String,
    pub stored_at: DateTime<Utc>,
}

impl UploadStoredEvent {
    /// Build the event from a `stored` record.
    ///
    /// Fails with `AppError::MissingMetadata` when a metadata column that the
    /// record should carry in this state is absent; callers treat that as a
    /// data-integrity error and leave the row unresolved.
    pub fn from_record(record: &UploadRecord) -> Result<Self, AppError> {
        fn require<T: Clone>(
            id: Uuid,
            field: &'static str,
            value: &Option<T>,
        ) -> Result<T, AppError> {
            value
                .clone()
                .ok_or(AppError::MissingMetadata { id, field })
        }

        Ok(UploadStoredEvent {
            upload_id: record.id,
            user_id: record.user_id,
            content_hash: record.content_hash.clone(),
            file_type: require(record.id, "file_type", &record.file_type)?,
            mime_type: require(record.id, "mime_type", &record.mime_type)?,
            file_size_bytes: require(record.id, "file_size_bytes", &record.file_size_bytes)?,
            width: require(record.id, "width", &record.width)?,
            height: require(record.id, "height", &record.height)?,
            storage_bucket: require(record.id, "storage_bucket", &record.storage_bucket)?,
            storage_key: require(record.id, "storage_key", &record.storage_key)?,
            original_filename: require(
                record.id,
                "original_filename",
                &record.original_filename,
            )?,
            // state_changed_at on a stored row is the instant the blob write
            // was confirmed.
            stored_at: record.state_changed_at,
        })
    }

    /// Deterministic dedup id, stable across retried publishes of the same
    /// record so the event channel can drop duplicates.
    pub fn dedup_id(&self) -> String {
        format!("upload-stored-{}", self.upload_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::upload::UploadState;

    fn stored_record() -> UploadRecord {
        let now = Utc::now();
        UploadRecord {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            content_hash: "ab".repeat(32),
            upload_state: UploadState::Stored,
            state_changed_at: now,
            upload_attempts: 0,
            pending_metadata: None,
            file_type: Some("image".to_string()),
            mime_type: Some("image/png".to_string()),
            file_size_bytes: Some(1024),
            width: Some(3840),
            height: Some(2160),
            storage_key: Some("wallpapers/key".to_string()),
            storage_bucket: Some("wallcat".to_string()),
            original_filename: Some("sunset.png".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn builds_from_complete_record() {
        let record = stored_record();
        let event = UploadStoredEvent::from_record(&record).unwrap();
        assert_eq!(event.upload_id, record.id);
        assert_eq!(event.mime_type, "image/png");
        assert_eq!(event.stored_at, record.state_changed_at);
    }

    #[test]
    fn missing_metadata_is_an_integrity_error() {
        let mut record = stored_record();
        record.width = None;
        let err = UploadStoredEvent::from_record(&record).unwrap_err();
        match err {
            AppError::MissingMetadata { id, field } => {
                assert_eq!(id, record.id);
                assert_eq!(field, "width");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn dedup_id_is_stable_per_record() {
        let record = stored_record();
        let a = UploadStoredEvent::from_record(&record).unwrap();
        let b = UploadStoredEvent::from_record(&record).unwrap();
        assert_eq!(a.dedup_id(), b.dedup_id());
        assert!(a.dedup_id().contains(&record.id.to_string()));
    }
}
