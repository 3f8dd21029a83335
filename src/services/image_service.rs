//! Ingestion pipeline and search engine over image records.
//!
//! `ImageService` owns the two request paths of the application: `ingest`
//! (persist the payload, commit the image row, best-effort analysis) and
//! `search` (deterministic, paginated retrieval by keyword). It holds no
//! state across calls; everything is a function of the database contents.

use crate::models::{
    analysis::ImageAnalysis,
    image::{Image, ImageWithMetadata},
    metadata::ImageMetadata,
};
use crate::services::object_store::{ObjectStore, ObjectStoreError};
use crate::services::vision::ImageAnalyzer;
use base64::{Engine as _, engine::general_purpose};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite, types::Json};
use std::{str::FromStr, sync::Arc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("object storage failure: {0}")]
    Storage(#[from] ObjectStoreError),
    #[error(transparent)]
    Store(#[from] sqlx::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Which of the two supported query semantics the engine runs with.
///
/// `PushDown` filters in SQL: description by case-insensitive substring,
/// the four label sets by exact element membership. `AppSide` fetches the
/// owner's rows unfiltered and keeps any row where the lowercased query is
/// a substring of the description or of any label element. The two modes
/// deliberately diverge on label matching (membership vs substring).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    PushDown,
    AppSide,
}

#[derive(Debug, Error)]
#[error("unknown search mode `{0}` (expected `push-down` or `app-side`)")]
pub struct ParseSearchModeError(String);

impl FromStr for SearchMode {
    type Err = ParseSearchModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "push-down" | "pushdown" => Ok(SearchMode::PushDown),
            "app-side" | "appside" => Ok(SearchMode::AppSide),
            other => Err(ParseSearchModeError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SearchOptions {
    pub mode: SearchMode,
    /// Whether exact-element matching in push-down mode ignores case.
    pub membership_case_insensitive: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            mode: SearchMode::PushDown,
            membership_case_insensitive: true,
        }
    }
}

pub const DEFAULT_PAGE_LIMIT: u32 = 20;

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub query: String,
    pub page: u32,
    pub limit: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            query: String::new(),
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Pagination {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    #[serde(rename = "totalPages")]
    pub total_pages: u64,
}

/// One page of search results in the uniform merged shape.
#[derive(Debug, Serialize)]
pub struct SearchPage {
    pub images: Vec<ImageWithMetadata>,
    pub pagination: Pagination,
}

/// A raw upload as received from the client.
#[derive(Debug, Clone)]
pub struct NewUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Outcome of one ingestion. `warning` is set when the image committed but
/// analysis did not produce metadata.
#[derive(Debug)]
pub struct IngestOutcome {
    pub image: Image,
    pub metadata: Option<ImageMetadata>,
    pub warning: Option<String>,
}

const ANALYSIS_WARNING: &str = "Image was uploaded, but AI analysis failed.";

const JOINED_COLUMNS: &str = "i.id, i.user_id, i.storage_path, i.file_name, i.content_type, \
     i.size_bytes, i.url, i.created_at, \
     m.id AS meta_id, m.image_id AS meta_image_id, m.tags, m.objects, m.scenes, m.colors, \
     m.description, m.created_at AS meta_created_at";

#[derive(Clone)]
pub struct ImageService {
    db: Arc<SqlitePool>,
    store: ObjectStore,
    analyzer: Arc<dyn ImageAnalyzer>,
    options: SearchOptions,
}

impl ImageService {
    pub fn new(
        db: Arc<SqlitePool>,
        store: ObjectStore,
        analyzer: Arc<dyn ImageAnalyzer>,
        options: SearchOptions,
    ) -> Self {
        Self {
            db,
            store,
            analyzer,
            options,
        }
    }

    /// Accept one upload for `owner`.
    ///
    /// The payload is written to the object store first (a key collision
    /// fails the put rather than overwriting), then the image row is
    /// inserted. That insert is the commit point: everything after it is
    /// best-effort. Analysis failure of any kind (network, timeout,
    /// unparseable reply, metadata insert) is logged and downgraded to a
    /// warning on the response.
    pub async fn ingest(&self, owner: Uuid, upload: NewUpload) -> ServiceResult<IngestOutcome> {
        if !upload.content_type.starts_with("image/") {
            return Err(ServiceError::InvalidInput(
                "only image files are allowed".into(),
            ));
        }

        let key = derive_storage_key(owner, &upload.file_name);
        let stored = self.store.put(&key, &upload.bytes, false).await?;

        let image = sqlx::query_as::<_, Image>(
            "INSERT INTO images (id, user_id, storage_path, file_name, content_type, size_bytes, url, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id, user_id, storage_path, file_name, content_type, size_bytes, url, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(owner)
        .bind(&stored.key)
        .bind(&upload.file_name)
        .bind(&upload.content_type)
        .bind(stored.size_bytes)
        .bind(&stored.url)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        match self.analyze_and_store(&image, &upload).await {
            Ok(metadata) => Ok(IngestOutcome {
                image,
                metadata: Some(metadata),
                warning: None,
            }),
            Err(err) => {
                tracing::warn!("image analysis failed for {}: {:#}", image.id, err);
                Ok(IngestOutcome {
                    image,
                    metadata: None,
                    warning: Some(ANALYSIS_WARNING.to_string()),
                })
            }
        }
    }

    async fn analyze_and_store(
        &self,
        image: &Image,
        upload: &NewUpload,
    ) -> anyhow::Result<ImageMetadata> {
        let encoded = general_purpose::STANDARD.encode(&upload.bytes);
        let analysis = self
            .analyzer
            .analyze(&encoded, &upload.content_type)
            .await?;
        Ok(self.insert_metadata(image.id, &analysis).await?)
    }

    async fn insert_metadata(
        &self,
        image_id: Uuid,
        analysis: &ImageAnalysis,
    ) -> Result<ImageMetadata, sqlx::Error> {
        sqlx::query_as::<_, ImageMetadata>(
            "INSERT INTO image_metadata (id, image_id, tags, objects, scenes, colors, description, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             RETURNING id, image_id, tags, objects, scenes, colors, description, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(image_id)
        .bind(Json(&analysis.tags))
        .bind(Json(&analysis.objects))
        .bind(Json(&analysis.scenes))
        .bind(Json(&analysis.colors))
        .bind(&analysis.description)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await
    }

    /// Run one search for `owner`.
    ///
    /// Empty (or whitespace) query lists all of the owner's images, newest
    /// first, left-joined with metadata. A non-empty query runs under the
    /// configured `SearchMode`. Both paths report an exact total so
    /// `totalPages` is always correct.
    pub async fn search(&self, owner: Uuid, params: SearchParams) -> ServiceResult<SearchPage> {
        let page = params.page.max(1);
        let limit = params.limit.max(1);
        let offset = (page as i64 - 1).saturating_mul(limit as i64);
        let query = params.query.trim();

        let (images, total) = if query.is_empty() {
            self.list_all(owner, limit as i64, offset).await?
        } else {
            match self.options.mode {
                SearchMode::PushDown => {
                    self.search_push_down(owner, query, limit as i64, offset)
                        .await?
                }
                SearchMode::AppSide => {
                    self.search_app_side(owner, query, offset as usize, limit as usize)
                        .await?
                }
            }
        };

        let total_pages = if total == 0 {
            0
        } else {
            total.div_ceil(limit as u64)
        };

        Ok(SearchPage {
            images,
            pagination: Pagination {
                page,
                limit,
                total,
                total_pages,
            },
        })
    }

    async fn list_all(
        &self,
        owner: Uuid,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<(Vec<ImageWithMetadata>, u64)> {
        let sql = format!(
            "SELECT {JOINED_COLUMNS} FROM images i \
             LEFT JOIN image_metadata m ON m.image_id = i.id \
             WHERE i.user_id = ? \
             ORDER BY i.created_at DESC, i.id DESC LIMIT ? OFFSET ?"
        );
        let rows: Vec<JoinedRow> = sqlx::query_as(&sql)
            .bind(owner)
            .bind(limit)
            .bind(offset)
            .fetch_all(&*self.db)
            .await?;

        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM images WHERE user_id = ?")
            .bind(owner)
            .fetch_one(&*self.db)
            .await?;

        Ok((
            rows.into_iter().map(JoinedRow::into_image).collect(),
            total as u64,
        ))
    }

    /// Push-down semantics: one SQL predicate, evaluated by SQLite, for
    /// both the page fetch and the total count.
    ///
    /// Description matches by substring (`LIKE` on SQLite is ASCII
    /// case-insensitive, same as `ILIKE`); tags, objects, scenes and
    /// colors match by exact element via `json_each`, so a query that is
    /// merely a substring of a tag does not match here.
    async fn search_push_down(
        &self,
        owner: Uuid,
        query: &str,
        limit: i64,
        offset: i64,
    ) -> ServiceResult<(Vec<ImageWithMetadata>, u64)> {
        let pattern = format!("%{}%", query);

        let mut select = QueryBuilder::<Sqlite>::new(format!(
            "SELECT {JOINED_COLUMNS} FROM image_metadata m \
             JOIN images i ON i.id = m.image_id WHERE i.user_id = "
        ));
        select.push_bind(owner);
        self.push_match_predicate(&mut select, query, &pattern);
        select.push(" ORDER BY m.created_at DESC, m.id DESC LIMIT ");
        select.push_bind(limit);
        select.push(" OFFSET ");
        select.push_bind(offset);
        let rows: Vec<JoinedRow> = select.build_query_as().fetch_all(&*self.db).await?;

        let mut count = QueryBuilder::<Sqlite>::new(
            "SELECT COUNT(*) FROM image_metadata m \
             JOIN images i ON i.id = m.image_id WHERE i.user_id = ",
        );
        count.push_bind(owner);
        self.push_match_predicate(&mut count, query, &pattern);
        let total: i64 = count.build_query_scalar().fetch_one(&*self.db).await?;

        Ok((
            rows.into_iter().map(JoinedRow::into_image).collect(),
            total as u64,
        ))
    }

    fn push_match_predicate(
        &self,
        builder: &mut QueryBuilder<'_, Sqlite>,
        query: &str,
        pattern: &str,
    ) {
        builder.push(" AND (m.description LIKE ");
        builder.push_bind(pattern.to_string());
        for column in ["tags", "objects", "scenes", "colors"] {
            builder.push(format!(
                " OR EXISTS (SELECT 1 FROM json_each(m.{column}) WHERE json_each.value = "
            ));
            builder.push_bind(query.to_string());
            if self.options.membership_case_insensitive {
                builder.push(" COLLATE NOCASE");
            }
            builder.push(")");
        }
        builder.push(")");
    }

    /// Application-side semantics: fetch every metadata row the owner has,
    /// filter in memory by lowercase substring over the description and
    /// every label element, then slice. The total is the size of the
    /// filtered set, so it is exact by construction.
    async fn search_app_side(
        &self,
        owner: Uuid,
        query: &str,
        offset: usize,
        limit: usize,
    ) -> ServiceResult<(Vec<ImageWithMetadata>, u64)> {
        let sql = format!(
            "SELECT {JOINED_COLUMNS} FROM image_metadata m \
             JOIN images i ON i.id = m.image_id \
             WHERE i.user_id = ? ORDER BY m.created_at DESC, m.id DESC"
        );
        let rows: Vec<JoinedRow> = sqlx::query_as(&sql)
            .bind(owner)
            .fetch_all(&*self.db)
            .await?;

        let needle = query.to_lowercase();
        let matched: Vec<ImageWithMetadata> = rows
            .into_iter()
            .map(JoinedRow::into_image)
            .filter(|row| {
                row.metadata
                    .as_ref()
                    .is_some_and(|meta| metadata_matches(meta, &needle))
            })
            .collect();

        let total = matched.len() as u64;
        let images = matched.into_iter().skip(offset).take(limit).collect();
        Ok((images, total))
    }

    /// Look up an image row by its object-store key. Used by the public
    /// file route to recover the content type.
    pub async fn find_by_path(&self, storage_path: &str) -> ServiceResult<Option<Image>> {
        Ok(sqlx::query_as::<_, Image>(
            "SELECT id, user_id, storage_path, file_name, content_type, size_bytes, url, created_at
             FROM images WHERE storage_path = ?",
        )
        .bind(storage_path)
        .fetch_optional(&*self.db)
        .await?)
    }
}

fn metadata_matches(meta: &ImageMetadata, needle: &str) -> bool {
    if meta.description.to_lowercase().contains(needle) {
        return true;
    }
    [&meta.tags, &meta.objects, &meta.scenes, &meta.colors]
        .into_iter()
        .any(|set| set.iter().any(|value| value.to_lowercase().contains(needle)))
}

/// Time-derived storage key: `{owner}/{owner}_{nanos}.{ext}`.
///
/// Collisions are accepted rather than deduplicated; the put runs with
/// overwrite disabled so a collision fails the upload instead of silently
/// replacing an earlier payload. Extensions that are missing or contain
/// non-alphanumeric characters fall back to `bin`.
fn derive_storage_key(owner: Uuid, file_name: &str) -> String {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("bin");
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    format!("{owner}/{owner}_{nanos}.{ext}")
}

/// Image columns plus the (possibly NULL) metadata columns of one joined
/// result row.
#[derive(sqlx::FromRow)]
struct JoinedRow {
    id: Uuid,
    user_id: Uuid,
    storage_path: String,
    file_name: String,
    content_type: String,
    size_bytes: i64,
    url: String,
    created_at: DateTime<Utc>,
    meta_id: Option<Uuid>,
    meta_image_id: Option<Uuid>,
    tags: Option<Json<Vec<String>>>,
    objects: Option<Json<Vec<String>>>,
    scenes: Option<Json<Vec<String>>>,
    colors: Option<Json<Vec<String>>>,
    description: Option<String>,
    meta_created_at: Option<DateTime<Utc>>,
}

impl JoinedRow {
    fn into_image(self) -> ImageWithMetadata {
        let metadata = match (
            self.meta_id,
            self.meta_image_id,
            self.tags,
            self.objects,
            self.scenes,
            self.colors,
            self.description,
            self.meta_created_at,
        ) {
            (
                Some(id),
                Some(image_id),
                Some(tags),
                Some(objects),
                Some(scenes),
                Some(colors),
                Some(description),
                Some(created_at),
            ) => Some(ImageMetadata {
                id,
                image_id,
                tags,
                objects,
                scenes,
                colors,
                description,
                created_at,
            }),
            _ => None,
        };

        ImageWithMetadata {
            image: Image {
                id: self.id,
                user_id: self.user_id,
                storage_path: self.storage_path,
                file_name: self.file_name,
                content_type: self.content_type,
                size_bytes: self.size_bytes,
                url: self.url,
                created_at: self.created_at,
            },
            metadata,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::services::vision::AnalysisError;
    use async_trait::async_trait;
    use sqlx::sqlite::SqlitePoolOptions;
    use tempfile::TempDir;

    struct FixedAnalyzer(ImageAnalysis);

    #[async_trait]
    impl ImageAnalyzer for FixedAnalyzer {
        async fn analyze(&self, _: &str, _: &str) -> Result<ImageAnalysis, AnalysisError> {
            Ok(self.0.clone())
        }
    }

    struct FailingAnalyzer;

    #[async_trait]
    impl ImageAnalyzer for FailingAnalyzer {
        async fn analyze(&self, _: &str, _: &str) -> Result<ImageAnalysis, AnalysisError> {
            Err(AnalysisError::EmptyResponse)
        }
    }

    async fn service(analyzer: Arc<dyn ImageAnalyzer>, options: SearchOptions) -> (ImageService, TempDir) {
        let dir = TempDir::new().unwrap();
        // A single connection so the in-memory database is shared
        let pool = Arc::new(
            SqlitePoolOptions::new()
                .max_connections(1)
                .connect("sqlite::memory:")
                .await
                .unwrap(),
        );
        db::migrate(&pool).await.unwrap();
        let store = ObjectStore::new(dir.path(), "http://localhost:3000");
        (ImageService::new(pool, store, analyzer, options), dir)
    }

    fn options(mode: SearchMode) -> SearchOptions {
        SearchOptions {
            mode,
            membership_case_insensitive: true,
        }
    }

    fn upload(name: &str) -> NewUpload {
        NewUpload {
            file_name: name.to_string(),
            content_type: "image/png".to_string(),
            bytes: Bytes::from_static(b"not a real png"),
        }
    }

    fn analysis(description: &str, tags: &[&str]) -> ImageAnalysis {
        ImageAnalysis {
            description: description.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            objects: vec!["tree".into()],
            scenes: vec!["outdoor".into()],
            colors: vec!["green".into()],
            ..ImageAnalysis::default()
        }
    }

    fn params(query: &str, page: u32, limit: u32) -> SearchParams {
        SearchParams {
            query: query.to_string(),
            page,
            limit,
        }
    }

    #[tokio::test]
    async fn non_image_upload_is_rejected_without_side_effects() {
        let (svc, _dir) = service(Arc::new(FailingAnalyzer), options(SearchMode::PushDown)).await;
        let owner = Uuid::new_v4();

        let err = svc
            .ingest(
                owner,
                NewUpload {
                    file_name: "notes.txt".into(),
                    content_type: "text/plain".into(),
                    bytes: Bytes::from_static(b"hello"),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));

        let page = svc.search(owner, SearchParams::default()).await.unwrap();
        assert!(page.images.is_empty());
        assert_eq!(page.pagination.total, 0);
    }

    #[tokio::test]
    async fn analysis_failure_still_commits_the_image_with_a_warning() {
        let (svc, _dir) = service(Arc::new(FailingAnalyzer), options(SearchMode::PushDown)).await;
        let owner = Uuid::new_v4();

        let outcome = svc.ingest(owner, upload("a.png")).await.unwrap();
        assert!(outcome.metadata.is_none());
        assert!(outcome.warning.is_some());

        let page = svc.search(owner, SearchParams::default()).await.unwrap();
        assert_eq!(page.images.len(), 1);
        assert_eq!(page.images[0].image.id, outcome.image.id);
        assert!(page.images[0].metadata.is_none());
    }

    #[tokio::test]
    async fn successful_ingest_persists_metadata() {
        let (svc, _dir) = service(
            Arc::new(FixedAnalyzer(analysis("a red bicycle", &["bicycle"]))),
            options(SearchMode::PushDown),
        )
        .await;
        let owner = Uuid::new_v4();

        let outcome = svc.ingest(owner, upload("bike.jpg")).await.unwrap();
        let metadata = outcome.metadata.expect("metadata should be stored");
        assert_eq!(metadata.image_id, outcome.image.id);
        assert_eq!(metadata.description, "a red bicycle");
        assert_eq!(metadata.tags.0, vec!["bicycle"]);
        assert!(outcome.warning.is_none());
        assert!(outcome.image.storage_path.ends_with(".jpg"));
        assert!(outcome.image.url.contains("/files/"));
    }

    #[tokio::test]
    async fn owners_never_see_each_others_images() {
        for mode in [SearchMode::PushDown, SearchMode::AppSide] {
            let (svc, _dir) = service(
                Arc::new(FixedAnalyzer(analysis("a shared word: lighthouse", &["lighthouse"]))),
                options(mode),
            )
            .await;
            let alice = Uuid::new_v4();
            let bob = Uuid::new_v4();

            svc.ingest(alice, upload("a.png")).await.unwrap();
            svc.ingest(bob, upload("b.png")).await.unwrap();

            for query in ["", "lighthouse"] {
                let page = svc.search(alice, params(query, 1, 20)).await.unwrap();
                assert_eq!(page.images.len(), 1, "mode {mode:?} query {query:?}");
                assert_eq!(page.images[0].image.user_id, alice);
            }
        }
    }

    #[tokio::test]
    async fn listing_paginates_newest_first_with_exact_total() {
        let (svc, _dir) = service(Arc::new(FailingAnalyzer), options(SearchMode::PushDown)).await;
        let owner = Uuid::new_v4();

        let mut ids = Vec::new();
        for i in 0..5 {
            let outcome = svc.ingest(owner, upload(&format!("img{i}.png"))).await.unwrap();
            ids.push(outcome.image.id);
        }

        let first = svc.search(owner, params("", 1, 2)).await.unwrap();
        assert_eq!(first.images.len(), 2);
        assert_eq!(first.pagination.total, 5);
        assert_eq!(first.pagination.total_pages, 3);
        // Newest first
        assert_eq!(first.images[0].image.id, ids[4]);
        assert_eq!(first.images[1].image.id, ids[3]);

        // Last page holds the remainder
        let last = svc.search(owner, params("", 3, 2)).await.unwrap();
        assert_eq!(last.images.len(), 1);
        assert_eq!(last.images[0].image.id, ids[0]);
        assert_eq!(last.pagination.total, 5);

        // Past the end: empty, total unchanged
        let beyond = svc.search(owner, params("", 4, 2)).await.unwrap();
        assert!(beyond.images.is_empty());
        assert_eq!(beyond.pagination.total, 5);
        assert_eq!(beyond.pagination.total_pages, 3);
    }

    #[tokio::test]
    async fn push_down_matches_exact_elements_but_not_tag_substrings() {
        let (svc, _dir) = service(
            Arc::new(FixedAnalyzer(analysis("city at night", &["lighthouse"]))),
            options(SearchMode::PushDown),
        )
        .await;
        let owner = Uuid::new_v4();
        svc.ingest(owner, upload("a.png")).await.unwrap();

        // Exact tag element matches, case-insensitively
        for query in ["lighthouse", "LightHouse"] {
            let page = svc.search(owner, params(query, 1, 20)).await.unwrap();
            assert_eq!(page.images.len(), 1, "query {query:?}");
            assert_eq!(page.pagination.total, 1);
        }

        // A substring of a tag is not an element of the tag set
        let page = svc.search(owner, params("light", 1, 20)).await.unwrap();
        assert!(page.images.is_empty());
        assert_eq!(page.pagination.total, 0);
        assert_eq!(page.pagination.total_pages, 0);

        // Description still matches by substring
        let page = svc.search(owner, params("night", 1, 20)).await.unwrap();
        assert_eq!(page.images.len(), 1);
    }

    #[tokio::test]
    async fn app_side_matches_tag_substrings() {
        let (svc, _dir) = service(
            Arc::new(FixedAnalyzer(analysis("city at night", &["lighthouse"]))),
            options(SearchMode::AppSide),
        )
        .await;
        let owner = Uuid::new_v4();
        svc.ingest(owner, upload("a.png")).await.unwrap();

        // Substring of a tag element matches in this mode
        for query in ["light", "LIGHT", "Night"] {
            let page = svc.search(owner, params(query, 1, 20)).await.unwrap();
            assert_eq!(page.images.len(), 1, "query {query:?}");
            assert_eq!(page.pagination.total, 1);
        }

        let page = svc.search(owner, params("zebra", 1, 20)).await.unwrap();
        assert!(page.images.is_empty());
        assert_eq!(page.pagination.total, 0);
    }

    #[tokio::test]
    async fn app_side_reports_true_total_beyond_one_page() {
        let (svc, _dir) = service(
            Arc::new(FixedAnalyzer(analysis("a golden sunset", &["sunset"]))),
            options(SearchMode::AppSide),
        )
        .await;
        let owner = Uuid::new_v4();
        for i in 0..5 {
            svc.ingest(owner, upload(&format!("s{i}.png"))).await.unwrap();
        }

        let page = svc.search(owner, params("sunset", 2, 2)).await.unwrap();
        assert_eq!(page.images.len(), 2);
        assert_eq!(page.pagination.total, 5);
        assert_eq!(page.pagination.total_pages, 3);
    }

    #[tokio::test]
    async fn push_down_counts_the_whole_match_set() {
        let (svc, _dir) = service(
            Arc::new(FixedAnalyzer(analysis("a golden sunset", &["sunset"]))),
            options(SearchMode::PushDown),
        )
        .await;
        let owner = Uuid::new_v4();
        for i in 0..5 {
            svc.ingest(owner, upload(&format!("s{i}.png"))).await.unwrap();
        }

        let page = svc.search(owner, params("sunset", 1, 2)).await.unwrap();
        assert_eq!(page.images.len(), 2);
        // Exact total even though the page fetch window is smaller
        assert_eq!(page.pagination.total, 5);
        assert_eq!(page.pagination.total_pages, 3);
    }

    #[tokio::test]
    async fn repeated_searches_are_idempotent() {
        let (svc, _dir) = service(
            Arc::new(FixedAnalyzer(analysis("harbor at dawn", &["harbor"]))),
            options(SearchMode::PushDown),
        )
        .await;
        let owner = Uuid::new_v4();
        for i in 0..3 {
            svc.ingest(owner, upload(&format!("h{i}.png"))).await.unwrap();
        }

        let first = svc.search(owner, params("harbor", 1, 2)).await.unwrap();
        let second = svc.search(owner, params("harbor", 1, 2)).await.unwrap();

        let ids = |page: &SearchPage| page.images.iter().map(|i| i.image.id).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
        assert_eq!(first.pagination.total, second.pagination.total);
    }

    #[tokio::test]
    async fn sunset_scenario() {
        for mode in [SearchMode::PushDown, SearchMode::AppSide] {
            let (svc, _dir) = service(
                Arc::new(FixedAnalyzer(analysis("an empty parking lot", &["parking"]))),
                options(mode),
            )
            .await;
            let owner = Uuid::new_v4();
            for i in 0..3 {
                svc.ingest(owner, upload(&format!("p{i}.png"))).await.unwrap();
            }

            let page = svc.search(owner, params("sunset", 1, 20)).await.unwrap();
            assert!(page.images.is_empty(), "mode {mode:?}");
            assert_eq!(page.pagination.total, 0);
            assert_eq!(page.pagination.total_pages, 0);

            // Now a matching image arrives
            let svc = ImageService {
                analyzer: Arc::new(FixedAnalyzer(analysis(
                    "A golden sunset over the bay",
                    &["sunset", "bay"],
                ))),
                ..svc
            };
            let outcome = svc.ingest(owner, upload("sunset.png")).await.unwrap();

            let page = svc.search(owner, params("Sunset", 1, 20)).await.unwrap();
            assert_eq!(page.images.len(), 1, "mode {mode:?}");
            assert_eq!(page.images[0].image.id, outcome.image.id);
            assert_eq!(page.pagination.total, 1);
        }
    }

    #[tokio::test]
    async fn whitespace_query_lists_everything() {
        let (svc, _dir) = service(
            Arc::new(FixedAnalyzer(analysis("d", &["t"]))),
            options(SearchMode::AppSide),
        )
        .await;
        let owner = Uuid::new_v4();
        svc.ingest(owner, upload("a.png")).await.unwrap();

        let page = svc.search(owner, params("   ", 1, 20)).await.unwrap();
        assert_eq!(page.images.len(), 1);
        assert_eq!(page.pagination.total, 1);
    }

    #[tokio::test]
    async fn page_and_limit_are_clamped_to_one() {
        let (svc, _dir) = service(Arc::new(FailingAnalyzer), options(SearchMode::PushDown)).await;
        let owner = Uuid::new_v4();
        svc.ingest(owner, upload("a.png")).await.unwrap();

        let page = svc.search(owner, params("", 0, 0)).await.unwrap();
        assert_eq!(page.pagination.page, 1);
        assert_eq!(page.pagination.limit, 1);
        assert_eq!(page.images.len(), 1);
    }

    #[test]
    fn storage_keys_carry_only_safe_extensions() {
        let owner = Uuid::new_v4();
        assert!(derive_storage_key(owner, "photo.jpeg").ends_with(".jpeg"));
        assert!(derive_storage_key(owner, "no-extension").ends_with(".bin"));
        assert!(derive_storage_key(owner, "weird.na/me").ends_with(".bin"));
        assert!(derive_storage_key(owner, "trailing.").ends_with(".bin"));
    }

    #[test]
    fn search_mode_parses_both_spellings() {
        assert_eq!("push-down".parse::<SearchMode>().unwrap(), SearchMode::PushDown);
        assert_eq!("appside".parse::<SearchMode>().unwrap(), SearchMode::AppSide);
        assert!("fulltext".parse::<SearchMode>().is_err());
    }
}
