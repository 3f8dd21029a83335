//! HTTP handlers for image upload, search and public file retrieval.
//! Request parsing and status mapping only; the work happens in
//! `ImageService`.

use crate::{
    auth::AuthUser,
    errors::AppError,
    models::{image::Image, metadata::ImageMetadata},
    services::image_service::{DEFAULT_PAGE_LIMIT, NewUpload, SearchPage, SearchParams},
    services::object_store::ObjectStoreError,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderValue, StatusCode, header},
    response::Response,
};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;

/// Query params accepted by the search endpoint. Values arrive as strings
/// so malformed numbers degrade to defaults instead of a 400.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Serialize)]
pub struct UploadResponse {
    pub image: Image,
    pub metadata: Option<ImageMetadata>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// POST `/api/images` — multipart upload with a single `file` field.
pub async fn upload_image(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    mut multipart: Multipart,
) -> Result<Json<UploadResponse>, AppError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("invalid multipart body: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|err| AppError::bad_request(format!("failed to read file field: {err}")))?;
        upload = Some(NewUpload {
            file_name,
            content_type,
            bytes,
        });
        break;
    }

    let upload = upload.ok_or_else(|| AppError::bad_request("No file provided"))?;
    let outcome = state.images.ingest(user, upload).await?;

    Ok(Json(UploadResponse {
        image: outcome.image,
        metadata: outcome.metadata,
        warning: outcome.warning,
    }))
}

/// GET `/api/images/search?query=&page=&limit=`
pub async fn search_images(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Query(q): Query<SearchQuery>,
) -> Result<Json<SearchPage>, AppError> {
    let params = SearchParams {
        query: q.query.unwrap_or_default(),
        page: parse_positive(q.page.as_deref(), 1),
        limit: parse_positive(q.limit.as_deref(), DEFAULT_PAGE_LIMIT),
    };

    let page = state.images.search(user, params).await?;
    Ok(Json(page))
}

/// Non-numeric or non-positive values fall back to the default.
fn parse_positive(raw: Option<&str>, default: u32) -> u32 {
    raw.and_then(|s| s.parse::<u32>().ok())
        .filter(|v| *v >= 1)
        .unwrap_or(default)
}

/// GET `/files/{*key}` — streamed public read of a stored payload. The
/// content type comes from the image row recorded at upload time.
pub async fn get_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Response, AppError> {
    let image = state
        .images
        .find_by_path(&key)
        .await?
        .ok_or_else(|| AppError::not_found("file not found"))?;

    let (file, len) = match state.store.open(&key).await {
        Ok(opened) => opened,
        Err(ObjectStoreError::NotFound(_)) | Err(ObjectStoreError::InvalidKey) => {
            return Err(AppError::not_found("file not found"));
        }
        Err(err) => return Err(AppError::internal(err.to_string())),
    };

    let stream = ReaderStream::new(file);
    let mut response = Response::new(Body::from_stream(stream));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&image.content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&len.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pagination_params_degrade_to_defaults() {
        assert_eq!(parse_positive(None, 20), 20);
        assert_eq!(parse_positive(Some("3"), 1), 3);
        assert_eq!(parse_positive(Some("0"), 1), 1);
        assert_eq!(parse_positive(Some("-2"), 20), 20);
        assert_eq!(parse_positive(Some("abc"), 20), 20);
    }
}
