//! Happy-path intake for validated uploads.
//!
//! The HTTP layer parses and validates the request (format, dimensions);
//! this service owns everything after that: record creation with per-user
//! dedup, the blob write, the stored confirmation, and the immediate
//! completion event. Each step leaves the record in a state the
//! reconciliation engine can repair from, so a crash anywhere in the
//! sequence is recovered on the next cycle — reconciliation is the safety
//! net, this service is the primary path.

use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use wallcat_core::models::{UploadMetadata, UploadRecord, UploadState};
use wallcat_core::UploadStoredEvent;
use wallcat_db::UploadRepository;
use wallcat_events::EventPublisher;
use wallcat_storage::{storage_key_for, BlobStore};

/// A validated upload ready for intake.
pub struct NewUpload {
    pub user_id: Uuid,
    pub metadata: UploadMetadata,
    pub data: Vec<u8>,
}

/// Result of an intake attempt.
#[derive(Debug)]
pub enum IngestOutcome {
    /// A new record, carried through the full happy path.
    Accepted(UploadRecord),
    /// The user already uploaded this content; the existing record is
    /// returned instead of a new row.
    Duplicate(UploadRecord),
}

impl IngestOutcome {
    pub fn record(&self) -> &UploadRecord {
        match self {
            IngestOutcome::Accepted(record) | IngestOutcome::Duplicate(record) => record,
        }
    }
}

pub struct IngestService {
    uploads: UploadRepository,
    blobs: Arc<dyn BlobStore>,
    events: Arc<dyn EventPublisher>,
    bucket: String,
}

impl IngestService {
    pub fn new(
        uploads: UploadRepository,
        blobs: Arc<dyn BlobStore>,
        events: Arc<dyn EventPublisher>,
        bucket: String,
    ) -> Self {
        Self {
            uploads,
            blobs,
            events,
            bucket,
        }
    }

    /// Run one upload through the pipeline.
    ///
    /// On any failure past record creation the error is returned to the
    /// caller, but the record is left in a recoverable state (`uploading`
    /// or `stored`) for the reconciler.
    #[tracing::instrument(skip(self, upload), fields(user_id = %upload.user_id))]
    pub async fn ingest(&self, upload: NewUpload) -> Result<IngestOutcome> {
        let content_hash = hex::encode(Sha256::digest(&upload.data));

        let (record, is_duplicate) = self
            .uploads
            .create_upload(upload.user_id, &content_hash)
            .await
            .context("Failed to create upload record")?;

        if is_duplicate {
            return Ok(IngestOutcome::Duplicate(record));
        }

        let record = self
            .uploads
            .begin_upload(record.id, &upload.metadata)
            .await
            .context("Failed to begin upload")?;

        let key = storage_key_for(record.id);
        self.blobs
            .put(&key, &upload.metadata.mime_type, upload.data)
            .await
            .with_context(|| format!("Failed to write blob for upload {}", record.id))?;

        let record = self
            .uploads
            .confirm_stored(record.id, &upload.metadata, &self.bucket, &key)
            .await
            .context("Failed to confirm upload stored")?;

        // Publish immediately; on failure the row stays in `stored` and the
        // missing-events pass picks it up after its window.
        let record = match self.publish_completion(&record).await {
            Ok(updated) => updated,
            Err(e) => {
                tracing::warn!(
                    upload_id = %record.id,
                    error = %e,
                    "Completion event publish failed on the happy path, leaving row for reconciliation"
                );
                record
            }
        };

        Ok(IngestOutcome::Accepted(record))
    }

    /// Publish the completion event and advance `stored -> processing`,
    /// using the same claim discipline as the reconciler so a concurrent
    /// instance can never double-publish.
    async fn publish_completion(&self, record: &UploadRecord) -> Result<UploadRecord> {
        let claim = self
            .uploads
            .claim_if_stale(record.id, UploadState::Stored, std::time::Duration::ZERO)
            .await?;

        let Some(claim) = claim else {
            // A reconciler instance beat us to it.
            return Ok(self
                .uploads
                .get_upload(record.id)
                .await?
                .unwrap_or_else(|| record.clone()));
        };

        let event = UploadStoredEvent::from_record(claim.record())?;
        if let Err(e) = self.events.publish_stored(&event).await {
            claim.release().await?;
            return Err(e.into());
        }

        Ok(claim.commit_processing().await?)
    }
}
