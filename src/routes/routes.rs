//! Route table for the image vault API.
//!
//! ## Structure
//! - **API endpoints** (require a valid session token)
//!   - `POST /api/images`        — multipart upload of one image
//!   - `GET  /api/images/search` — keyword search (query, page, limit)
//!
//! - **Public endpoints**
//!   - `GET /files/{*key}` — streamed payload read (target of issued URLs)
//!   - `GET /healthz`, `GET /readyz`
//!
//! The wildcard `*key` allows nested keys like `{user}/{user}_123.jpg`.

use crate::{
    handlers::{
        health_handlers::{healthz, readyz},
        image_handlers::{get_file, search_images, upload_image},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for all endpoints.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // authenticated API
        .route("/api/images", post(upload_image))
        .route("/api/images/search", get(search_images))
        // public file retrieval
        .route("/files/{*key}", get(get_file))
}
