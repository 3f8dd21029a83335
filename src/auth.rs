//! Session validation boundary.
//!
//! Session issuance lives outside this service; rows in the `sessions`
//! table map opaque bearer tokens to user ids. The extractor resolves the
//! token on every request and rejects with 401 before any handler logic
//! runs. The resolved user id is the sole access-control scope for all
//! reads and writes.

use crate::{errors::AppError, state::AppState};
use axum::{extract::FromRequestParts, http::header::AUTHORIZATION, http::request::Parts};
use uuid::Uuid;

/// The authenticated caller. Never derived from client-supplied ids, only
/// from a validated session token.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub Uuid);

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| AppError::unauthorized("Authentication required"))?;

        let user_id: Option<Uuid> =
            sqlx::query_scalar("SELECT user_id FROM sessions WHERE token = ?")
                .bind(token)
                .fetch_optional(&*state.db)
                .await
                .map_err(|err| AppError::internal(format!("session lookup failed: {err}")))?;

        user_id
            .map(AuthUser)
            .ok_or_else(|| AppError::unauthorized("Authentication required"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::models::analysis::ImageAnalysis;
    use crate::services::image_service::{ImageService, SearchOptions};
    use crate::services::object_store::ObjectStore;
    use crate::services::vision::{AnalysisError, ImageAnalyzer};
    use async_trait::async_trait;
    use axum::http::Request;
    use chrono::Utc;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct NoAnalyzer;

    #[async_trait]
    impl ImageAnalyzer for NoAnalyzer {
        async fn analyze(&self, _: &str, _: &str) -> Result<ImageAnalysis, AnalysisError> {
            Err(AnalysisError::Disabled)
        }
    }

    async fn state(dir: &TempDir) -> AppState {
        let pool = Arc::new(
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .unwrap(),
        );
        db::migrate(&pool).await.unwrap();
        let store = ObjectStore::new(dir.path(), "http://localhost:3000");
        AppState {
            db: pool.clone(),
            images: ImageService::new(pool, store.clone(), Arc::new(NoAnalyzer), SearchOptions::default()),
            store,
        }
    }

    async fn extract(state: &AppState, header: Option<&str>) -> Result<AuthUser, AppError> {
        let mut builder = Request::builder().uri("/api/images/search");
        if let Some(value) = header {
            builder = builder.header(AUTHORIZATION, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        AuthUser::from_request_parts(&mut parts, state).await
    }

    #[tokio::test]
    async fn valid_token_resolves_the_session_user() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir).await;
        let user = uuid::Uuid::new_v4();

        sqlx::query("INSERT INTO sessions (token, user_id, created_at) VALUES (?, ?, ?)")
            .bind("tok-1")
            .bind(user)
            .bind(Utc::now())
            .execute(&*state.db)
            .await
            .unwrap();

        let AuthUser(resolved) = extract(&state, Some("Bearer tok-1")).await.unwrap();
        assert_eq!(resolved, user);
    }

    #[tokio::test]
    async fn missing_or_unknown_tokens_are_rejected() {
        let dir = TempDir::new().unwrap();
        let state = state(&dir).await;

        for header in [None, Some("Bearer nope"), Some("Basic abc")] {
            let err = extract(&state, header).await.unwrap_err();
            assert_eq!(err.status, axum::http::StatusCode::UNAUTHORIZED);
        }
    }
}
