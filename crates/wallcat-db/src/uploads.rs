use std::time::Duration;

use sqlx::{PgPool, Postgres, Row};
use uuid::Uuid;

use wallcat_core::models::{UploadMetadata, UploadRecord, UploadState, UploadStats};
use wallcat_core::AppError;

/// Repository for upload records.
///
/// All state transitions are guarded compare-and-swap updates: the WHERE
/// clause names the expected current state, so a lost race shows up as zero
/// affected rows instead of a silently clobbered transition.
#[derive(Clone)]
pub struct UploadRepository {
    pool: PgPool,
}

impl UploadRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create a new upload record in `initiated`, or resolve to the existing
    /// record when `(user_id, content_hash)` already exists.
    ///
    /// Returns `(record, is_duplicate)`.
    #[tracing::instrument(skip(self))]
    pub async fn create_upload(
        &self,
        user_id: Uuid,
        content_hash: &str,
    ) -> Result<(UploadRecord, bool), AppError> {
        let id = Uuid::new_v4();

        let inserted: Option<UploadRecord> = sqlx::query_as::<Postgres, UploadRecord>(
            r#"
            INSERT INTO uploads (id, user_id, content_hash)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, content_hash) DO NOTHING
            RETURNING
                id, user_id, content_hash, upload_state, state_changed_at,
                upload_attempts, pending_metadata, file_type, mime_type,
                file_size_bytes, width, height, storage_key, storage_bucket,
                original_filename, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(user_id)
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(record) = inserted {
            tracing::info!(upload_id = %record.id, user_id = %user_id, "Upload record created");
            return Ok((record, false));
        }

        // Conflict: another attempt with the same content already exists.
        let existing: UploadRecord = sqlx::query_as::<Postgres, UploadRecord>(
            r#"
            SELECT
                id, user_id, content_hash, upload_state, state_changed_at,
                upload_attempts, pending_metadata, file_type, mime_type,
                file_size_bytes, width, height, storage_key, storage_bucket,
                original_filename, created_at, updated_at
            FROM uploads
            WHERE user_id = $1 AND content_hash = $2
            "#,
        )
        .bind(user_id)
        .bind(content_hash)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            upload_id = %existing.id,
            user_id = %user_id,
            upload_state = %existing.upload_state,
            "Duplicate upload resolved to existing record"
        );

        Ok((existing, true))
    }

    /// Move a record to `uploading` and stage the intake's validated
    /// metadata on it.
    ///
    /// Also accepted for a record already in `uploading` (a client retrying
    /// a crashed transfer): the metadata and `state_changed_at` refresh,
    /// pushing the row back out of the reconciler's stuck window.
    pub async fn begin_upload(
        &self,
        id: Uuid,
        metadata: &UploadMetadata,
    ) -> Result<UploadRecord, AppError> {
        let updated: Option<UploadRecord> = sqlx::query_as::<Postgres, UploadRecord>(
            r#"
            UPDATE uploads
            SET upload_state = 'uploading',
                pending_metadata = $2,
                state_changed_at = NOW(),
                updated_at = NOW()
            WHERE id = $1 AND upload_state IN ('initiated', 'uploading')
            RETURNING
                id, user_id, content_hash, upload_state, state_changed_at,
                upload_attempts, pending_metadata, file_type, mime_type,
                file_size_bytes, width, height, storage_key, storage_bucket,
                original_filename, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(sqlx::types::Json(metadata))
        .fetch_optional(&self.pool)
        .await?;

        match updated {
            Some(record) => Ok(record),
            None => {
                let current = self.get_upload(id).await?.ok_or(AppError::NotFound(id))?;
                Err(AppError::InvalidTransition {
                    id,
                    from: current.upload_state,
                    to: UploadState::Uploading,
                })
            }
        }
    }

    /// Confirm the blob write: `uploading -> stored`, promoting the metadata
    /// to the typed columns.
    ///
    /// Idempotent: confirming a record that already reached `stored` (or
    /// later) returns it unchanged, so the intake's direct confirmation and
    /// a concurrent reconciler cannot trample each other.
    #[tracing::instrument(skip(self, metadata))]
    pub async fn confirm_stored(
        &self,
        id: Uuid,
        metadata: &UploadMetadata,
        bucket: &str,
        key: &str,
    ) -> Result<UploadRecord, AppError> {
        let updated: Option<UploadRecord> = sqlx::query_as::<Postgres, UploadRecord>(
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
            WHERE id = $1 AND upload_state = 'uploading'
            RETURNING
                id, user_id, content_hash, upload_state, state_changed_at,
                upload_attempts, pending_metadata, file_type, mime_type,
                file_size_bytes, width, height, storage_key, storage_bucket,
                original_filename, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(&metadata.file_type)
        .bind(&metadata.mime_type)
        .bind(metadata.file_size_bytes)
        .bind(metadata.width)
        .bind(metadata.height)
        .bind(bucket)
        .bind(key)
        .bind(&metadata.original_filename)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(record) = updated {
            tracing::info!(upload_id = %id, storage_key = %key, "Upload confirmed stored");
            return Ok(record);
        }

        let current = self.get_upload(id).await?.ok_or(AppError::NotFound(id))?;
        if current.upload_state.owns_blob() {
            // Already confirmed, by us or by a reconciler.
            return Ok(current);
        }

        Err(AppError::InvalidTransition {
            id,
            from: current.upload_state,
            to: UploadState::Stored,
        })
    }

    pub async fn get_upload(&self, id: Uuid) -> Result<Option<UploadRecord>, AppError> {
        let record: Option<UploadRecord> = sqlx::query_as::<Postgres, UploadRecord>(
            r#"
            SELECT
                id, user_id, content_hash, upload_state, state_changed_at,
                upload_attempts, pending_metadata, file_type, mime_type,
                file_size_bytes, width, height, storage_key, storage_bucket,
                original_filename, created_at, updated_at
            FROM uploads
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    /// Ids of `uploading` rows whose state is at least `min_age` old,
    /// oldest first.
    pub async fn list_stuck_uploading(
        &self,
        min_age: Duration,
        limit: i64,
    ) -> Result<Vec<Uuid>, AppError> {
        self.list_stale(UploadState::Uploading, min_age, limit).await
    }

    /// Ids of `stored` rows whose completion event is at least `min_age`
    /// overdue, oldest first.
    pub async fn list_stale_stored(
        &self,
        min_age: Duration,
        limit: i64,
    ) -> Result<Vec<Uuid>, AppError> {
        self.list_stale(UploadState::Stored, min_age, limit).await
    }

    async fn list_stale(
        &self,
        state: UploadState,
        min_age: Duration,
        limit: i64,
    ) -> Result<Vec<Uuid>, AppError> {
        let rows = sqlx::query(
            r#"
            SELECT id
            FROM uploads
            WHERE upload_state = $1
                AND state_changed_at <= NOW() - ($2 * interval '1 second')
            ORDER BY state_changed_at ASC
            LIMIT $3
            "#,
        )
        .bind(state)
        .bind(min_age.as_secs_f64())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    /// Delete `initiated` rows older than `min_age`. Safe as a bulk
    /// statement: such rows have no blob and no event, and concurrent
    /// deleters simply affect zero rows.
    ///
    /// Returns the number of rows deleted.
    #[tracing::instrument(skip(self))]
    pub async fn delete_orphaned_intents(&self, min_age: Duration) -> Result<u64, AppError> {
        let row = sqlx::query(
            r#"
            WITH deleted AS (
                DELETE FROM uploads
                WHERE upload_state = 'initiated'
                    AND state_changed_at <= NOW() - ($1 * interval '1 second')
                RETURNING id
            )
            SELECT COUNT(*)::bigint AS count FROM deleted
            "#,
        )
        .bind(min_age.as_secs_f64())
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = row.get("count");
        let count = count.max(0) as u64;

        if count > 0 {
            tracing::info!(count = count, "Deleted orphaned upload intents");
        }

        Ok(count)
    }

    /// Of the given ids, those whose record still owns (or is about to own)
    /// a blob: `uploading`, `stored`, or `processing`. Used by the orphan
    /// sweep to decide which listed objects are safe to delete.
    pub async fn live_upload_ids(&self, ids: &[Uuid]) -> Result<Vec<Uuid>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT id
            FROM uploads
            WHERE id = ANY($1)
                AND upload_state IN ('uploading', 'stored', 'processing')
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    /// Aggregated per-state row counts.
    pub async fn get_stats(&self) -> Result<UploadStats, AppError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total,
                COUNT(*) FILTER (WHERE upload_state = 'initiated') AS initiated,
                COUNT(*) FILTER (WHERE upload_state = 'uploading') AS uploading,
                COUNT(*) FILTER (WHERE upload_state = 'stored') AS stored,
                COUNT(*) FILTER (WHERE upload_state = 'processing') AS processing,
                COUNT(*) FILTER (WHERE upload_state = 'failed') AS failed
            FROM uploads
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(UploadStats {
            total: row.get::<Option<i64>, _>("total").unwrap_or(0),
            initiated: row.get::<Option<i64>, _>("initiated").unwrap_or(0),
            uploading: row.get::<Option<i64>, _>("uploading").unwrap_or(0),
            stored: row.get::<Option<i64>, _>("stored").unwrap_or(0),
            processing: row.get::<Option<i64>, _>("processing").unwrap_or(0),
            failed: row.get::<Option<i64>, _>("failed").unwrap_or(0),
        })
    }
}
