//! Shared key derivation for the wallpaper bucket.
//!
//! The original file of an upload lives at `wallpapers/{upload_id}`. The
//! orphan sweep relies on this being invertible: a listed key maps back to
//! the upload id it belongs to.

use uuid::Uuid;

/// Prefix under which all original uploads are stored.
pub const WALLPAPER_PREFIX: &str = "wallpapers/";

/// Storage key for an upload's original file.
pub fn storage_key_for(upload_id: Uuid) -> String {
    format!("{}{}", WALLPAPER_PREFIX, upload_id)
}

/// Inverse of [`storage_key_for`]. Returns `None` for keys outside the
/// wallpaper prefix or with a non-uuid remainder (foreign objects are never
/// touched by the orphan sweep).
pub fn upload_id_from_key(key: &str) -> Option<Uuid> {
    key.strip_prefix(WALLPAPER_PREFIX)?.parse().ok()
}
