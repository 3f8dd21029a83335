//! Core data models for the image vault service.
//!
//! These entities map to database tables via `sqlx::FromRow` and serialize
//! naturally as JSON via `serde`.

pub mod analysis;
pub mod image;
pub mod metadata;
