//! Blob store abstraction for the upload pipeline.
//!
//! The reconciliation engine treats object storage as an eventually
//! observable external: it re-checks existence every pass instead of
//! trusting a one-time result, so the trait surface is deliberately small
//! (put, exists, delete, list).

pub mod keys;
pub mod s3;
pub mod test_support;
pub mod traits;

pub use keys::{storage_key_for, upload_id_from_key, WALLPAPER_PREFIX};
pub use s3::S3BlobStore;
pub use traits::{BlobEntry, BlobStore, BlobStoreError, BlobStoreResult};
