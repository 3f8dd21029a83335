use anyhow::Result;
use axum::Router;
use std::{fs, io::ErrorKind, path::Path, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod auth;
mod config;
mod db;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
mod state;

use services::{
    image_service::{ImageService, SearchOptions},
    object_store::ObjectStore,
    vision::{GeminiClient, ImageAnalyzer},
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate_only) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting image-vault with config: {:?}", cfg);

    // --- Ensure storage directory exists ---
    if !Path::new(&cfg.storage_dir).exists() {
        fs::create_dir_all(&cfg.storage_dir)?;
        tracing::info!("Created storage directory at {}", cfg.storage_dir);
    }

    // --- Initialize SQLite connection + schema ---
    let pool = db::connect(&cfg.database_url).await?;
    db::migrate(&pool).await?;

    if migrate_only {
        tracing::info!("Database migration complete.");
        return Ok(());
    }

    // --- Initialize core services ---
    let store = ObjectStore::new(cfg.storage_dir.clone(), cfg.public_base_url.clone());
    if cfg.gemini_api_key.is_none() {
        tracing::warn!("No vision API key configured; uploads will complete without metadata");
    }
    let analyzer: Arc<dyn ImageAnalyzer> = Arc::new(GeminiClient::new(
        cfg.gemini_base_url.clone(),
        cfg.gemini_model.clone(),
        cfg.gemini_api_key.clone(),
    ));
    let images = ImageService::new(
        pool.clone(),
        store.clone(),
        analyzer,
        SearchOptions {
            mode: cfg.search_mode,
            membership_case_insensitive: cfg.membership_case_insensitive,
        },
    );

    // --- Build router ---
    let app: Router = routes::routes::routes().with_state(state::AppState {
        db: pool,
        images,
        store,
    });

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
