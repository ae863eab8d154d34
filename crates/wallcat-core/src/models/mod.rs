pub mod event;
pub mod upload;

pub use event::UploadStoredEvent;
pub use upload::{UploadMetadata, UploadRecord, UploadState, UploadStats};
