//! Chat command parsing and replies

use crate::database::MediaStore;
use crate::error::SaveError;
use crate::models::{KindStats, MediaDescriptor, MediaSummary, Operator, StoreTotals, StoredLocation};
use crate::pipeline::{Clock, SavePipeline};
use chrono::{DateTime, Utc};
use common::error::DatabaseError;
use std::fmt::Write;
use std::sync::Arc;
use teloxide::types::Message;
use teloxide::utils::command::{BotCommands, ParseError};
use tokio_util::task::TaskTracker;
use tracing::{error, info, warn};

/// Characters of a caption shown in search results
const CAPTION_PREVIEW_CHARS: usize = 50;

#[derive(BotCommands, Debug, Clone, PartialEq, Eq)]
#[command(rename_rule = "lowercase")]
pub enum Command {
    #[command(description = "show usage")]
    Start,
    #[command(description = "save the replied-to media")]
    Save,
    #[command(description = "show saved media statistics")]
    Stats,
    #[command(description = "list recently saved media")]
    List,
    #[command(description = "search saved media", parse_with = query_argument)]
    Search(String),
}

/// Everything after `/search`, trimmed; an empty query is still a command
fn query_argument(input: String) -> Result<(String,), ParseError> {
    Ok((input.trim().to_string(),))
}

/// Turns parsed commands into reply texts
pub struct CommandHandler {
    pipeline: Arc<SavePipeline>,
    store: MediaStore,
    clock: Arc<dyn Clock>,
    log_group_id: i64,
    list_limit: u32,
    search_limit: u32,
    saves: TaskTracker,
}

impl CommandHandler {
    pub fn new(
        pipeline: Arc<SavePipeline>,
        store: MediaStore,
        clock: Arc<dyn Clock>,
        log_group_id: i64,
        list_limit: u32,
        search_limit: u32,
    ) -> Self {
        Self {
            pipeline,
            store,
            clock,
            log_group_id,
            list_limit,
            search_limit,
            saves: TaskTracker::new(),
        }
    }

    /// Reply text for `command`, issued by `message`
    pub async fn handle(&self, message: &Message, command: Command) -> String {
        match command {
            Command::Start => self.start_text(),
            Command::Save => self.save(message).await,
            Command::Stats => self.stats().await,
            Command::List => self.list().await,
            Command::Search(query) => self.search(&query).await,
        }
    }

    /// Block until every save started so far has finished.
    ///
    /// Saves run on their own tracked tasks, so a caller that stops waiting
    /// for a reply never cuts a save off between the file write and the
    /// index commit.
    pub async fn finish_pending_saves(&self) {
        self.saves.close();
        self.saves.wait().await;
    }

    fn start_text(&self) -> String {
        format!(
            "🤖 <b>Reply Save Bot</b>\n\n\
             📋 <b>How to use:</b>\n\
             1. Send any media (video, photo, audio, etc.) to your log group\n\
             2. Reply to that media with <code>/save</code>\n\
             3. The media will be saved to the bot's storage\n\n\
             📌 <b>Commands:</b>\n\
             • <code>/save</code> - Save media (reply to media)\n\
             • <code>/stats</code> - Show saved media statistics\n\
             • <code>/list</code> - List recent saved media\n\
             • <code>/search &lt;query&gt;</code> - Search saved media\n\n\
             🏷️ <b>Supported Media:</b>\n\
             • Videos 📹\n\
             • Photos 📸\n\
             • Audio files 🎵\n\
             • Voice messages 🎤\n\
             • Documents 📄\n\
             • Animations/GIFs 🎬\n\
             • Video notes (round videos) 📹\n\n\
             The bot works in your log group: <code>{}</code>",
            self.log_group_id
        )
    }

    async fn save(&self, message: &Message) -> String {
        if message.chat.id.0 != self.log_group_id {
            warn!("Rejected /save from chat {}", message.chat.id.0);
            return "❌ This command only works in the designated log group!".to_string();
        }

        let Some(replied) = message.reply_to_message().cloned() else {
            return "❌ Please reply to a media message with /save command!".to_string();
        };

        let Some(user) = message.from.as_ref() else {
            return "❌ Could not identify who issued the command.".to_string();
        };
        let operator = Operator {
            user_id: user.id.0 as i64,
            username: user.username.clone(),
            display_name: user.first_name.clone(),
        };

        let pipeline = self.pipeline.clone();
        let task_operator = operator.clone();
        let outcome = self
            .saves
            .spawn(async move { pipeline.archive(&replied, &task_operator).await })
            .await;

        match outcome {
            Ok(Ok((descriptor, location))) => {
                info!(
                    "{} saved {} as {}",
                    operator.user_id, descriptor.content_id, location.filename
                );
                save_success_text(&descriptor, &location, &operator, self.clock.now())
            }
            Ok(Err(e @ SaveError::NoMediaFound)) => format!("❌ {}", e.user_message()),
            Ok(Err(e)) => {
                error!("Save failed: {}", e);
                format!("❌ {}", e.user_message())
            }
            Err(e) => {
                error!("Save task failed: {}", e);
                "❌ Failed to save media. Please try again.".to_string()
            }
        }
    }

    async fn stats(&self) -> String {
        let result = async {
            let stats = self.store.stats_by_kind().await?;
            let totals = self.store.totals().await?;
            Ok::<_, DatabaseError>((stats, totals))
        }
        .await;

        match result {
            Ok((stats, totals)) => stats_text(&stats, totals),
            Err(e) => {
                error!("Stats error: {}", e);
                "❌ Error retrieving statistics".to_string()
            }
        }
    }

    async fn list(&self) -> String {
        match self.store.recent(self.list_limit).await {
            Ok(items) => list_text(&items, self.list_limit),
            Err(e) => {
                error!("List error: {}", e);
                "❌ Error retrieving media list".to_string()
            }
        }
    }

    async fn search(&self, query: &str) -> String {
        if query.is_empty() {
            return "🔍 <b>Usage:</b> <code>/search &lt;query&gt;</code>\n\
                    Search in filenames, captions, and sender names"
                .to_string();
        }

        match self.store.search(query, self.search_limit).await {
            Ok(items) => search_text(query, &items),
            Err(e) => {
                error!("Search error: {}", e);
                "❌ Error performing search".to_string()
            }
        }
    }
}

/// Human-readable size with one decimal, stepping by 1024
pub fn format_file_size(size_bytes: Option<i64>) -> String {
    let bytes = match size_bytes {
        Some(bytes) if bytes > 0 => bytes as f64,
        _ => return "0 B".to_string(),
    };

    let mut size = bytes;
    for unit in ["B", "KB", "MB", "GB"] {
        if size < 1024.0 {
            return format!("{:.1} {}", size, unit);
        }
        size /= 1024.0;
    }
    format!("{:.1} TB", size)
}

/// Escape text for Telegram's HTML parse mode
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn save_success_text(
    descriptor: &MediaDescriptor,
    location: &StoredLocation,
    operator: &Operator,
    now: DateTime<Utc>,
) -> String {
    format!(
        "✅ <b>Media Saved Successfully!</b>\n\n\
         📁 <b>File:</b> <code>{}</code>\n\
         📂 <b>Type:</b> {}\n\
         📊 <b>Size:</b> {}\n\
         👤 <b>Original Sender:</b> {}\n\
         💾 <b>Saved By:</b> {}\n\
         📅 <b>Date:</b> {}",
        escape_html(&location.filename),
        location.kind.label(),
        format_file_size(descriptor.size_bytes),
        escape_html(descriptor.sender.display_name.as_deref().unwrap_or("Unknown")),
        escape_html(&operator.display_name),
        now.format("%Y-%m-%d %H:%M:%S")
    )
}

fn stats_text(stats: &[KindStats], totals: StoreTotals) -> String {
    if stats.is_empty() {
        return "📊 No saved media found!".to_string();
    }

    let mut text = String::from("📊 <b>Saved Media Statistics</b>\n\n");
    for entry in stats {
        let _ = writeln!(
            text,
            "📁 <b>{}:</b> {} files ({})",
            entry.kind.label(),
            entry.count,
            format_file_size(Some(entry.total_size))
        );
    }
    let _ = write!(
        text,
        "\n📈 <b>Total:</b> {} files ({})",
        totals.count,
        format_file_size(Some(totals.total_size))
    );
    text
}

fn summary_line(item: &MediaSummary) -> String {
    format!(
        "📄 <code>{}</code>\n   📂 {} • 👤 {} • 📅 {}\n",
        escape_html(&item.saved_filename),
        item.kind.label(),
        escape_html(item.sender_display_name.as_deref().unwrap_or("Unknown")),
        item.saved_at.format("%m/%d %H:%M")
    )
}

fn list_text(items: &[MediaSummary], limit: u32) -> String {
    if items.is_empty() {
        return "📂 No saved media found!".to_string();
    }

    let mut text = format!("📂 <b>Recent Saved Media (Last {})</b>\n\n", limit);
    for item in items {
        text.push_str(&summary_line(item));
        text.push('\n');
    }
    text
}

fn search_text(query: &str, items: &[MediaSummary]) -> String {
    if items.is_empty() {
        return format!("🔍 No results found for: <code>{}</code>", escape_html(query));
    }

    let mut text = format!(
        "🔍 <b>Search Results for:</b> <code>{}</code>\n\n",
        escape_html(query)
    );
    for item in items {
        text.push_str(&summary_line(item));
        if let Some(caption) = &item.caption {
            let _ = writeln!(text, "   💬 {}", escape_html(&caption_preview(caption)));
        }
        text.push('\n');
    }
    text
}

fn caption_preview(caption: &str) -> String {
    if caption.chars().count() > CAPTION_PREVIEW_CHARS {
        let head: String = caption.chars().take(CAPTION_PREVIEW_CHARS).collect();
        format!("{}...", head)
    } else {
        caption.to_string()
    }
}
