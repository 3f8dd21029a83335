use crate::services::image_service::SearchMode;
use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Centralized application configuration.
/// Combines environment variables and CLI arguments (CLI wins).
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// Prefix for issued public file URLs, e.g. `http://localhost:3000`.
    pub public_base_url: String,
    /// API key for the vision model. When absent, analysis is disabled and
    /// every upload completes with a warning instead of metadata.
    pub gemini_api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub search_mode: SearchMode,
    /// Whether exact-element matching in push-down search ignores case.
    pub membership_case_insensitive: bool,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Image vault: upload, auto-tag, search")]
pub struct Args {
    /// Host to bind to (overrides IMAGE_VAULT_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides IMAGE_VAULT_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where image payloads are stored (overrides IMAGE_VAULT_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides IMAGE_VAULT_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Public base URL for file links (overrides IMAGE_VAULT_PUBLIC_BASE_URL)
    #[arg(long)]
    pub public_base_url: Option<String>,

    /// Vision model API key (overrides IMAGE_VAULT_GEMINI_API_KEY)
    #[arg(long)]
    pub gemini_api_key: Option<String>,

    /// Vision model name (overrides IMAGE_VAULT_GEMINI_MODEL)
    #[arg(long)]
    pub gemini_model: Option<String>,

    /// Vision API base URL (overrides IMAGE_VAULT_GEMINI_BASE_URL)
    #[arg(long)]
    pub gemini_base_url: Option<String>,

    /// Search semantics: `push-down` or `app-side` (overrides IMAGE_VAULT_SEARCH_MODE)
    #[arg(long)]
    pub search_mode: Option<String>,

    /// Make exact-element matching in push-down search case-sensitive
    #[arg(long)]
    pub membership_case_sensitive: bool,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("IMAGE_VAULT_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("IMAGE_VAULT_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing IMAGE_VAULT_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading IMAGE_VAULT_PORT"),
        };
        let env_storage =
            env::var("IMAGE_VAULT_STORAGE_DIR").unwrap_or_else(|_| "./data/objects".into());
        let env_db = env::var("IMAGE_VAULT_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/image_vault.db".into());
        let env_public_base = env::var("IMAGE_VAULT_PUBLIC_BASE_URL")
            .unwrap_or_else(|_| "http://localhost:3000".into());
        let env_api_key = env::var("IMAGE_VAULT_GEMINI_API_KEY").ok();
        let env_model =
            env::var("IMAGE_VAULT_GEMINI_MODEL").unwrap_or_else(|_| "gemini-2.0-flash".into());
        let env_vision_base = env::var("IMAGE_VAULT_GEMINI_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com/v1beta".into());
        let env_search_mode =
            env::var("IMAGE_VAULT_SEARCH_MODE").unwrap_or_else(|_| "push-down".into());

        let search_mode = args
            .search_mode
            .as_deref()
            .unwrap_or(&env_search_mode)
            .parse::<SearchMode>()
            .context("parsing search mode")?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            public_base_url: args.public_base_url.unwrap_or(env_public_base),
            gemini_api_key: args.gemini_api_key.or(env_api_key),
            gemini_model: args.gemini_model.unwrap_or(env_model),
            gemini_base_url: args.gemini_base_url.unwrap_or(env_vision_base),
            search_mode,
            membership_case_insensitive: !args.membership_case_sensitive,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
