//! Claim-based row locking.
//!
//! A claim is exclusive working rights over one upload row for the duration
//! of one reconciliation attempt. It is backed by `SELECT ... FOR UPDATE
//! SKIP LOCKED` inside an open transaction: concurrent instances skip a
//! claimed row instead of blocking on it, so N schedulers can sweep the same
//! table without acting on the same row twice.
//!
//! The claim holds a pooled connection until committed or released, which is
//! why every external call made under a claim runs with a bounded timeout.

use std::time::Duration;

use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use wallcat_core::models::{UploadMetadata, UploadRecord, UploadState};
use wallcat_core::AppError;

use crate::uploads::UploadRepository;

/// An exclusively claimed upload row.
///
/// Every `commit_*` method checks the state-machine guard, applies the
/// transition together with its bookkeeping in the claim's transaction, and
/// releases the lock by committing. [`UploadClaim::release`] rolls back
/// without advancing state, leaving the row for the next cycle.
pub struct UploadClaim {
    tx: Transaction<'static, Postgres>,
    record: UploadRecord,
}

impl UploadRepository {
    /// Atomically claim a row if it is in `expected_state` and its state is
    /// at least `min_age` old.
    ///
    /// Returns `None` when the row is missing, in another state, too young,
    /// or currently claimed by another instance — all of which mean "not
    /// ours to repair this cycle".
    #[tracing::instrument(skip(self))]
    pub async fn claim_if_stale(
        &self,
        id: Uuid,
        expected_state: UploadState,
        min_age: Duration,
    ) -> Result<Option<UploadClaim>, AppError> {
        let mut tx = self.pool().begin().await?;

        let record: Option<UploadRecord> = sqlx::query_as::<Postgres, UploadRecord>(
            r#"
            SELECT
                id, user_id, content_hash, upload_state, state_changed_at,
                upload_attempts, pending_metadata, file_type, mime_type,
                file_size_bytes, width, height, storage_key, storage_bucket,
                original_filename, created_at, updated_at
            FROM uploads
            WHERE id = $1
                AND upload_state = $2
                AND state_changed_at <= NOW() - ($3 * interval '1 second')
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(id)
        .bind(expected_state)
        .bind(min_age.as_secs_f64())
        .fetch_optional(&mut *tx)
        .await?;

        match record {
            Some(record) => {
                tracing::debug!(upload_id = %id, upload_state = %expected_state, "Upload row claimed");
                Ok(Some(UploadClaim { tx, record }))
            }
            None => {
                tx.rollback().await.ok();
                Ok(None)
            }
        }
    }
}

impl UploadClaim {
    pub fn record(&self) -> &UploadRecord {
        &self.record
    }

    fn guard(&self, to: UploadState) -> Result<(), AppError> {
        let from = self.record.upload_state;
        if !from.can_transition_to(to) {
            return Err(AppError::InvalidTransition {
                id: self.record.id,
                from,
                to,
            });
        }
        Ok(())
    }

    /// `uploading -> stored`: the blob turned out to be present, promote the
    /// staged metadata.
    pub async fn commit_stored(
        mut self,
        metadata: &UploadMetadata,
        bucket: &str,
        key: &str,
    ) -> Result<UploadRecord, AppError> {
        self.guard(UploadState::Stored)?;

        let record: UploadRecord = sqlx::query_as::<Postgres, UploadRecord>(
            r#"
            UPDATE uploads
            SET upload_state = 'stored',
                file_type = $2,
                mime_type = $3,
                file_size_bytes = $4,
                width = $5,
                height = $6,
                storage_bucket = $7,
                storage_key = $8,
                original_filename = $9,
                pending_metadata = NULL,
                state_changed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, user_id, content_hash, upload_state, state_changed_at,
                upload_attempts, pending_metadata, file_type, mime_type,
                file_size_bytes, width, height, storage_key, storage_bucket,
                original_filename, created_at, updated_at
            "#,
        )
        .bind(self.record.id)
        .bind(&metadata.file_type)
        .bind(&metadata.mime_type)
        .bind(metadata.file_size_bytes)
        .bind(metadata.width)
        .bind(metadata.height)
        .bind(bucket)
        .bind(key)
        .bind(&metadata.original_filename)
        .fetch_one(&mut *self.tx)
        .await?;

        self.tx.commit().await?;
        tracing::info!(upload_id = %record.id, "Stuck upload recovered to stored");
        Ok(record)
    }

    /// `uploading -> uploading`: blob absent, hand the row another attempt.
    pub async fn commit_retry(mut self) -> Result<UploadRecord, AppError> {
        self.guard(UploadState::Uploading)?;

        let record: UploadRecord = sqlx::query_as::<Postgres, UploadRecord>(
            r#"
            UPDATE uploads
            SET upload_attempts = upload_attempts + 1,
                state_changed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, user_id, content_hash, upload_state, state_changed_at,
                upload_attempts, pending_metadata, file_type, mime_type,
                file_size_bytes, width, height, storage_key, storage_bucket,
                original_filename, created_at, updated_at
            "#,
        )
        .bind(self.record.id)
        .fetch_one(&mut *self.tx)
        .await?;

        self.tx.commit().await?;
        tracing::info!(
            upload_id = %record.id,
            upload_attempts = record.upload_attempts,
            "Stuck upload scheduled for retry"
        );
        Ok(record)
    }

    /// `uploading -> failed`: attempts exhausted with no blob. Terminal.
    pub async fn commit_failed(mut self) -> Result<UploadRecord, AppError> {
        self.guard(UploadState::Failed)?;

        let record: UploadRecord = sqlx::query_as::<Postgres, UploadRecord>(
            r#"
            UPDATE uploads
            SET upload_state = 'failed',
                state_changed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, user_id, content_hash, upload_state, state_changed_at,
                upload_attempts, pending_metadata, file_type, mime_type,
                file_size_bytes, width, height, storage_key, storage_bucket,
                original_filename, created_at, updated_at
            "#,
        )
        .bind(self.record.id)
        .fetch_one(&mut *self.tx)
        .await?;

        self.tx.commit().await?;
        tracing::warn!(
            upload_id = %record.id,
            upload_attempts = record.upload_attempts,
            "Upload failed after exhausting attempts"
        );
        Ok(record)
    }

    /// `stored -> processing`: the completion event has been durably
    /// acknowledged. Callers publish first, commit second; a crash between
    /// the two is absorbed by the event channel's dedup id.
    pub async fn commit_processing(mut self) -> Result<UploadRecord, AppError> {
        self.guard(UploadState::Processing)?;

        let record: UploadRecord = sqlx::query_as::<Postgres, UploadRecord>(
            r#"
            UPDATE uploads
            SET upload_state = 'processing',
                state_changed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1
            RETURNING
                id, user_id, content_hash, upload_state, state_changed_at,
                upload_attempts, pending_metadata, file_type, mime_type,
                file_size_bytes, width, height, storage_key, storage_bucket,
                original_filename, created_at, updated_at
            "#,
        )
        .bind(self.record.id)
        .fetch_one(&mut *self.tx)
        .await?;

        self.tx.commit().await?;
        tracing::info!(upload_id = %record.id, "Upload moved to processing");
        Ok(record)
    }

    /// Drop the claim without advancing state.
    pub async fn release(self) -> Result<(), AppError> {
        self.tx.rollback().await?;
        Ok(())
    }
}
