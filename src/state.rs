//! Shared application state carried by the router.

use crate::services::{image_service::ImageService, object_store::ObjectStore};
use sqlx::SqlitePool;
use std::sync::Arc;

/// Explicitly constructed state handed to every handler. Nothing here is
/// global; tests build their own instances.
#[derive(Clone)]
pub struct AppState {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,

    /// Ingestion pipeline + search engine.
    pub images: ImageService,

    /// Payload store, used directly by the public file route.
    pub store: ObjectStore,
}
