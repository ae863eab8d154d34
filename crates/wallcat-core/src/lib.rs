//! Wallcat Core Library
//!
//! This crate provides the domain models, error types, and configuration
//! shared across all wallcat components: the upload record and its state
//! machine, the completion event payload, and the reconciliation settings.

pub mod config;
pub mod error;
pub mod models;

// Re-export commonly used types
pub use config::{Config, ReconcileSettings, ScheduleSettings};
pub use error::AppError;
pub use models::{UploadMetadata, UploadRecord, UploadState, UploadStats, UploadStoredEvent};
