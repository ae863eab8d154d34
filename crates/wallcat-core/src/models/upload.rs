use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use uuid::Uuid;

/// Lifecycle state of an upload record.
///
/// Transitions are strictly ordered and never skip states; see
/// [`UploadState::can_transition_to`]. Reconciliation windows are measured
/// from `state_changed_at`, never from creation time.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "upload_state", rename_all = "lowercase")]
#[serde(rename_all = "snake_case")]
pub enum UploadState {
    Initiated,
    Uploading,
    Stored,
    Processing,
    Failed,
}

impl Display for UploadState {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            UploadState::Initiated => write!(f, "initiated"),
            UploadState::Uploading => write!(f, "uploading"),
            UploadState::Stored => write!(f, "stored"),
            UploadState::Processing => write!(f, "processing"),
            UploadState::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for UploadState {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initiated" => Ok(UploadState::Initiated),
            "uploading" => Ok(UploadState::Uploading),
            "stored" => Ok(UploadState::Stored),
            "processing" => Ok(UploadState::Processing),
            "failed" => Ok(UploadState::Failed),
            _ => Err(anyhow::anyhow!("Invalid upload state: {}", s)),
        }
    }
}

impl UploadState {
    /// Whether `self -> next` is a legal transition.
    ///
    /// `Uploading -> Uploading` is the retry transition (attempt counter
    /// bump); `Failed` and `Processing` are terminal for this pipeline.
    pub fn can_transition_to(self, next: UploadState) -> bool {
        use UploadState::*;
        matches!(
            (self, next),
            (Initiated, Uploading)
                | (Uploading, Uploading)
                | (Uploading, Stored)
                | (Uploading, Failed)
                | (Stored, Processing)
        )
    }

    /// States whose rows own a durable blob (and must never be deleted).
    pub fn owns_blob(self) -> bool {
        matches!(self, UploadState::Stored | UploadState::Processing)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, UploadState::Processing | UploadState::Failed)
    }
}

/// File metadata validated by the intake path before bytes start streaming.
///
/// Staged on the row as JSON while the upload is in flight, promoted to the
/// typed columns when the blob write is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadMetadata {
    pub file_type: String,
    pub mime_type: String,
    pub file_size_bytes: i64,
    pub width: i32,
    pub height: i32,
    pub original_filename: String,
}

/// One upload attempt, as tracked in the upload record store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub content_hash: String,
    pub upload_state: UploadState,
    pub state_changed_at: DateTime<Utc>,
    pub upload_attempts: i32,
    /// Metadata staged at `begin_upload`, cleared once promoted.
    pub pending_metadata: Option<UploadMetadata>,
    // Populated only once the blob write is confirmed (stored and later).
    pub file_type: Option<String>,
    pub mime_type: Option<String>,
    pub file_size_bytes: Option<i64>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub storage_key: Option<String>,
    pub storage_bucket: Option<String>,
    pub original_filename: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl sqlx::FromRow<'_, sqlx::postgres::PgRow> for UploadRecord {
    fn from_row(row: &sqlx::postgres::PgRow) -> Result<Self, sqlx::Error> {
        use sqlx::Row;
        Ok(UploadRecord {
            id: row.get("id"),
            user_id: row.get("user_id"),
            content_hash: row.get("content_hash"),
            upload_state: row.get("upload_state"),
            state_changed_at: row.get("state_changed_at"),
            upload_attempts: row.get("upload_attempts"),
            pending_metadata: row
                .get::<Option<sqlx::types::Json<UploadMetadata>>, _>("pending_metadata")
                .map(|json| json.0),
            file_type: row.get("file_type"),
            mime_type: row.get("mime_type"),
            file_size_bytes: row.get("file_size_bytes"),
            width: row.get("width"),
            height: row.get("height"),
            storage_key: row.get("storage_key"),
            storage_bucket: row.get("storage_bucket"),
            original_filename: row.get("original_filename"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

impl UploadRecord {
    /// Age of the current state, against the given instant.
    pub fn state_age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.state_changed_at)
    }

    /// True once every typed metadata column is populated.
    pub fn has_metadata(&self) -> bool {
        self.file_type.is_some()
            && self.mime_type.is_some()
            && self.file_size_bytes.is_some()
            && self.width.is_some()
            && self.height.is_some()
            && self.storage_key.is_some()
            && self.storage_bucket.is_some()
            && self.original_filename.is_some()
    }
}

/// Per-state row counts for operator monitoring.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UploadStats {
    pub total: i64,
    pub initiated: i64,
    pub uploading: i64,
    pub stored: i64,
    pub processing: i64,
    pub failed: i64,
}
