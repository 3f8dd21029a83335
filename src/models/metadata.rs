//! Represents the derived, searchable description of one image.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

/// Vision-model-derived metadata attached 1:1 to an image.
///
/// The four label sets are stored as JSON arrays so the push-down search
/// can run membership tests with `json_each` without a join table.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct ImageMetadata {
    /// Internal UUID for DB indexing.
    pub id: Uuid,

    /// Owning image. Unique: at most one metadata row per image.
    pub image_id: Uuid,

    /// Keywords most useful for search.
    pub tags: Json<Vec<String>>,

    /// Objects detected in the image.
    pub objects: Json<Vec<String>>,

    /// Scene labels (e.g. "outdoor", "urban").
    pub scenes: Json<Vec<String>>,

    /// Dominant color names.
    pub colors: Json<Vec<String>>,

    /// Free-text description of the image content.
    pub description: String,

    /// Timestamp when analysis completed.
    pub created_at: DateTime<Utc>,
}
