//! Error types module
//!
//! Domain errors shared across the wallcat crates. External-backend failures
//! (blob store, event channel) carry their own error types in their crates;
//! this enum covers the record store and the state-machine contract.

use uuid::Uuid;

use crate::models::UploadState;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[source] sqlx::Error),

    #[error("Upload not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A requested state change violates the upload state machine.
    #[error("Invalid transition for upload {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: UploadState,
        to: UploadState,
    },

    /// A row lacks metadata its state requires. Data-integrity error: the row
    /// is left unresolved for investigation, never force-advanced.
    #[error("Upload {id} is missing required metadata field `{field}`")]
    MissingMetadata { id: Uuid, field: &'static str },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InvalidInput(format!("JSON error: {}", err))
    }
}

impl AppError {
    /// Whether a retry on a later reconciliation cycle can succeed.
    ///
    /// Integrity and transition errors are deterministic; retrying them only
    /// repeats the log line.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::Database(_) | AppError::Internal(_) => true,
            AppError::NotFound(_)
            | AppError::InvalidInput(_)
            | AppError::InvalidTransition { .. }
            | AppError::MissingMetadata { .. } => false,
        }
    }
}
