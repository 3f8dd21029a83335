//! Represents one uploaded image asset.

use crate::models::metadata::ImageMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single uploaded image.
///
/// The row stores everything needed to serve the image back (storage path,
/// public URL) plus the original file details. The binary payload itself
/// lives in the object store, never in the database.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct Image {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Owner of the image. Immutable after creation; every read and write
    /// is scoped to this id.
    pub user_id: Uuid,

    /// Key under which the payload is stored in the object store.
    pub storage_path: String,

    /// Original filename of the uploaded file.
    pub file_name: String,

    /// Content type (MIME type) as supplied at upload time.
    pub content_type: String,

    /// Size in bytes.
    pub size_bytes: i64,

    /// Externally-resolvable URL for retrieving the payload.
    pub url: String,

    /// Timestamp when the image was created.
    pub created_at: DateTime<Utc>,
}

/// An image merged with its (possibly absent) derived metadata. This is
/// the uniform shape returned by every search response.
#[derive(Serialize, Clone, Debug)]
pub struct ImageWithMetadata {
    #[serde(flatten)]
    pub image: Image,

    /// `null` when analysis failed or has not produced a record.
    pub metadata: Option<ImageMetadata>,
}
