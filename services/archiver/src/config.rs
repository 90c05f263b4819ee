//! Service configuration
//!
//! Settings are read once at startup from built-in defaults, an optional
//! `archiver.toml` next to the binary's working directory, and `ARCHIVER_*`
//! environment variables, in increasing order of precedence.

use anyhow::{Context, Result, bail};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::PathBuf;

/// Name of the metadata store file inside the storage root
pub const DATABASE_FILE_NAME: &str = "saved_media.db";

/// Largest file the Bot API lets a bot download
const BOT_API_DOWNLOAD_LIMIT: u64 = 20 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Token issued by BotFather
    pub bot_token: String,
    /// The only chat where `/save` is accepted
    pub log_group_id: i64,
    pub storage_root: PathBuf,
    pub api_base_url: String,
    /// Server-side long-poll duration for `getUpdates`
    pub poll_timeout_secs: u64,
    pub max_download_bytes: u64,
    pub database_max_connections: u32,
    pub list_limit: u32,
    pub search_limit: u32,
}

impl Settings {
    /// Load settings from the default sources
    ///
    /// # Environment Variables
    /// - `ARCHIVER_BOT_TOKEN`: bot token (required)
    /// - `ARCHIVER_LOG_GROUP_ID`: allow-listed chat id (required)
    /// - `ARCHIVER_STORAGE_ROOT`: storage directory (default: "saved_media")
    /// - `ARCHIVER_API_BASE_URL`: Bot API endpoint (default: "https://api.telegram.org")
    /// - `ARCHIVER_POLL_TIMEOUT_SECS`: long-poll timeout (default: 30)
    /// - `ARCHIVER_MAX_DOWNLOAD_BYTES`: download size cap (default: 20 MiB)
    /// - `ARCHIVER_DATABASE_MAX_CONNECTIONS`: SQLite pool size (default: 5)
    /// - `ARCHIVER_LIST_LIMIT`: rows shown by `/list` (default: 10)
    /// - `ARCHIVER_SEARCH_LIMIT`: rows shown by `/search` (default: 15)
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .set_default("storage_root", "saved_media")?
            .set_default("api_base_url", "https://api.telegram.org")?
            .set_default("poll_timeout_secs", 30)?
            .set_default("max_download_bytes", BOT_API_DOWNLOAD_LIMIT)?
            .set_default("database_max_connections", 5)?
            .set_default("list_limit", 10)?
            .set_default("search_limit", 15)?
            .add_source(File::with_name("archiver").required(false))
            .add_source(Environment::with_prefix("ARCHIVER").try_parsing(true))
            .build()
            .context("Failed to read configuration")?;

        let settings: Settings = config
            .try_deserialize()
            .context("Invalid configuration (ARCHIVER_BOT_TOKEN and ARCHIVER_LOG_GROUP_ID are required)")?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> Result<()> {
        if self.bot_token.trim().is_empty() {
            bail!("bot_token must not be empty");
        }
        if self.list_limit == 0 || self.search_limit == 0 {
            bail!("list_limit and search_limit must be at least 1");
        }
        self.api_url()?;
        Ok(())
    }

    /// Bot API endpoint the bot talks to
    pub fn api_url(&self) -> Result<reqwest::Url> {
        reqwest::Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid api_base_url: {}", self.api_base_url))
    }

    pub fn database_path(&self) -> PathBuf {
        self.storage_root.join(DATABASE_FILE_NAME)
    }
}
