//! SQLite pool construction and schema migration.

use anyhow::Result;
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::{fs, path::Path, sync::Arc};

/// Schema statements embedded at build time so tests and the `--migrate`
/// mode share one source of truth.
const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Open the SQLite pool, creating the database file and its parent
/// directory on first run.
pub async fn connect(database_url: &str) -> Result<Arc<SqlitePool>> {
    // Extract the local file path SQLx will use
    let db_path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    if !database_url.contains(":memory:") {
        let db_path_obj = Path::new(db_path);
        if let Some(parent) = db_path_obj.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent)?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
        // SQLx will not create the file itself with a plain URL
        if !db_path_obj.exists() {
            fs::OpenOptions::new()
                .create(true)
                .write(true)
                .open(db_path)?;
        }
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    Ok(Arc::new(pool))
}

/// Run the embedded schema statements. Idempotent; every statement uses
/// `IF NOT EXISTS`.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    let statements = INIT_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(pool).await?;
    }

    Ok(())
}
