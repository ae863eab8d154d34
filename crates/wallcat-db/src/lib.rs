//! Wallcat Database Layer
//!
//! This crate provides the upload record repository and the claim primitives
//! the reconciliation engine builds on. The record store is the single
//! source of truth for upload state; every transition goes through the
//! guarded operations here.

pub mod claim;
pub mod uploads;

pub use claim::UploadClaim;
pub use uploads::UploadRepository;

/// Embedded migrations; run by the server at startup and by tests.
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!();
