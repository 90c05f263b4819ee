use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use teloxide::prelude::*;
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

mod bot;
mod classifier;
mod commands;
mod config;
mod database;
mod error;
mod models;
mod naming;
mod pipeline;
mod telegram;

use commands::CommandHandler;
use common::database::{DatabaseConfig, health_check, init_pool};
use crate::config::Settings;
use database::MediaStore;
use pipeline::{Clock, SavePipeline, SystemClock};
use telegram::TelegramFetcher;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(Level::INFO)
        .init();

    info!("Starting reply-save archiver");

    let settings = Settings::load()?;

    tokio::fs::create_dir_all(&settings.storage_root)
        .await
        .with_context(|| format!("Failed to create {}", settings.storage_root.display()))?;

    // Metadata store lives next to the media it indexes
    let db_config = DatabaseConfig::new(settings.database_path())
        .with_max_connections(settings.database_max_connections);
    let pool = init_pool(&db_config).await?;
    if !health_check(&pool).await? {
        warn!("Database health check returned an unexpected result");
    }
    let store = MediaStore::new(pool);
    store.ensure_schema().await?;

    let bot = Bot::new(&settings.bot_token).set_api_url(settings.api_url()?);
    let me = bot.get_me().await.context("Failed to reach the Bot API")?;
    info!("Authorized as @{}", me.username());

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let pipeline = Arc::new(SavePipeline::new(
        store.clone(),
        Arc::new(TelegramFetcher::new(bot.clone(), settings.max_download_bytes)),
        clock.clone(),
        settings.storage_root.clone(),
    ));
    pipeline.prepare_layout().await?;

    let handler = Arc::new(CommandHandler::new(
        pipeline,
        store,
        clock,
        settings.log_group_id,
        settings.list_limit,
        settings.search_limit,
    ));

    info!("Log group: {}", settings.log_group_id);
    info!("Storage root: {}", settings.storage_root.display());

    bot::run(bot, handler, Duration::from_secs(settings.poll_timeout_secs)).await;

    Ok(())
}
