use crate::models::{KindStats, MediaKind, MediaSummary, SaveRecord, StoreTotals};
use common::error::{DatabaseError, DatabaseResult};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::info;

const CREATE_SAVED_MEDIA: &str = r#"
    CREATE TABLE IF NOT EXISTS saved_media (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        content_id TEXT UNIQUE NOT NULL,
        media_type TEXT NOT NULL,
        original_filename TEXT,
        saved_filename TEXT NOT NULL,
        storage_path TEXT NOT NULL,
        file_size INTEGER,
        sender_id INTEGER,
        sender_username TEXT,
        sender_display_name TEXT,
        chat_id INTEGER NOT NULL,
        message_id INTEGER NOT NULL,
        caption TEXT,
        saved_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
        saved_by_user_id INTEGER NOT NULL,
        saved_by_username TEXT,
        mime_type TEXT,
        duration INTEGER,
        width INTEGER,
        height INTEGER,
        search_filename TEXT NOT NULL,
        search_caption TEXT,
        search_sender TEXT
    )
"#;

const SUMMARY_COLUMNS: &str =
    "saved_filename, media_type, sender_display_name, caption, file_size, saved_at";

/// Metadata index of archived media, one row per content id
#[derive(Clone)]
pub struct MediaStore {
    pool: SqlitePool,
}

impl MediaStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the table when it does not exist yet
    pub async fn ensure_schema(&self) -> DatabaseResult<()> {
        sqlx::query(CREATE_SAVED_MEDIA)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Schema)?;

        info!("Metadata store schema ready");
        Ok(())
    }

    /// Where the indexed copy of `content_id` lives, if it is indexed
    pub async fn storage_path(&self, content_id: &str) -> DatabaseResult<Option<String>> {
        sqlx::query_scalar("SELECT storage_path FROM saved_media WHERE content_id = ?")
            .bind(content_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Query)
    }

    /// Insert `record`, or fully replace the row that shares its content id
    pub async fn upsert(&self, record: &SaveRecord) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            INSERT INTO saved_media (
                content_id, media_type, original_filename, saved_filename, storage_path,
                file_size, sender_id, sender_username, sender_display_name, chat_id, message_id,
                caption, saved_at, saved_by_user_id, saved_by_username, mime_type,
                duration, width, height, search_filename, search_caption, search_sender
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (content_id) DO UPDATE SET
                media_type = excluded.media_type,
                original_filename = excluded.original_filename,
                saved_filename = excluded.saved_filename,
                storage_path = excluded.storage_path,
                file_size = excluded.file_size,
                sender_id = excluded.sender_id,
                sender_username = excluded.sender_username,
                sender_display_name = excluded.sender_display_name,
                chat_id = excluded.chat_id,
                message_id = excluded.message_id,
                caption = excluded.caption,
                saved_at = excluded.saved_at,
                saved_by_user_id = excluded.saved_by_user_id,
                saved_by_username = excluded.saved_by_username,
                mime_type = excluded.mime_type,
                duration = excluded.duration,
                width = excluded.width,
                height = excluded.height,
                search_filename = excluded.search_filename,
                search_caption = excluded.search_caption,
                search_sender = excluded.search_sender
            "#,
        )
        .bind(&record.content_id)
        .bind(record.kind.as_str())
        .bind(&record.original_filename)
        .bind(&record.saved_filename)
        .bind(&record.storage_path)
        .bind(record.file_size)
        .bind(record.sender_id)
        .bind(&record.sender_username)
        .bind(&record.sender_display_name)
        .bind(record.chat_id)
        .bind(record.message_id)
        .bind(&record.caption)
        .bind(record.saved_at)
        .bind(record.saved_by_user_id)
        .bind(&record.saved_by_username)
        .bind(&record.mime_type)
        .bind(record.duration)
        .bind(record.width)
        .bind(record.height)
        .bind(fold_case(&record.saved_filename))
        .bind(record.caption.as_deref().map(fold_case))
        .bind(record.sender_display_name.as_deref().map(fold_case))
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(())
    }

    pub async fn get(&self, content_id: &str) -> DatabaseResult<Option<SaveRecord>> {
        let row = sqlx::query("SELECT * FROM saved_media WHERE content_id = ?")
            .bind(content_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        row.map(|row| record_from_row(&row)).transpose()
    }

    pub async fn count(&self) -> DatabaseResult<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM saved_media")
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::Query)
    }

    /// Record count and summed size per kind, most numerous kind first
    pub async fn stats_by_kind(&self) -> DatabaseResult<Vec<KindStats>> {
        let rows = sqlx::query(
            r#"
            SELECT media_type, COUNT(*) AS count, COALESCE(SUM(file_size), 0) AS total_size
            FROM saved_media
            GROUP BY media_type
            ORDER BY count DESC, media_type ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        rows.iter()
            .map(|row| -> DatabaseResult<KindStats> {
                Ok(KindStats {
                    kind: kind_from_row(row)?,
                    count: row.get("count"),
                    total_size: row.get("total_size"),
                })
            })
            .collect()
    }

    pub async fn totals(&self) -> DatabaseResult<StoreTotals> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS count, COALESCE(SUM(file_size), 0) AS total_size FROM saved_media",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(StoreTotals {
            count: row.get("count"),
            total_size: row.get("total_size"),
        })
    }

    /// Most recently saved items first
    pub async fn recent(&self, limit: u32) -> DatabaseResult<Vec<MediaSummary>> {
        let sql = format!(
            "SELECT {} FROM saved_media ORDER BY saved_at DESC, id DESC LIMIT ?",
            SUMMARY_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        rows.iter().map(summary_from_row).collect()
    }

    /// Items whose filename, caption or sender display name contains
    /// `query`, ignoring case, newest first
    ///
    /// Matching runs against case-folded copies written at upsert, so
    /// non-ASCII text folds the same way as ASCII.
    pub async fn search(&self, query: &str, limit: u32) -> DatabaseResult<Vec<MediaSummary>> {
        let pattern = format!("%{}%", escape_like(&fold_case(query)));

        let sql = format!(
            r#"
            SELECT {} FROM saved_media
            WHERE search_filename LIKE ? ESCAPE '\'
               OR search_caption LIKE ? ESCAPE '\'
               OR search_sender LIKE ? ESCAPE '\'
            ORDER BY saved_at DESC, id DESC
            LIMIT ?
            "#,
            SUMMARY_COLUMNS
        );

        let rows = sqlx::query(&sql)
            .bind(&pattern)
            .bind(&pattern)
            .bind(&pattern)
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        rows.iter().map(summary_from_row).collect()
    }
}

fn fold_case(text: &str) -> String {
    text.to_lowercase()
}

/// Make `%`, `_` and `\` match literally inside a LIKE pattern
fn escape_like(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len());
    for c in query.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn kind_from_row(row: &SqliteRow) -> DatabaseResult<MediaKind> {
    let raw: String = row.get("media_type");
    raw.parse().map_err(DatabaseError::CorruptRow)
}

fn summary_from_row(row: &SqliteRow) -> DatabaseResult<MediaSummary> {
    Ok(MediaSummary {
        saved_filename: row.get("saved_filename"),
        kind: kind_from_row(row)?,
        sender_display_name: row.get("sender_display_name"),
        caption: row.get("caption"),
        file_size: row.get("file_size"),
        saved_at: row.get("saved_at"),
    })
}

fn record_from_row(row: &SqliteRow) -> DatabaseResult<SaveRecord> {
    Ok(SaveRecord {
        id: row.get("id"),
        content_id: row.get("content_id"),
        kind: kind_from_row(row)?,
        original_filename: row.get("original_filename"),
        saved_filename: row.get("saved_filename"),
        storage_path: row.get("storage_path"),
        file_size: row.get("file_size"),
        sender_id: row.get("sender_id"),
        sender_username: row.get("sender_username"),
        sender_display_name: row.get("sender_display_name"),
        chat_id: row.get("chat_id"),
        message_id: row.get("message_id"),
        caption: row.get("caption"),
        saved_at: row.get("saved_at"),
        saved_by_user_id: row.get("saved_by_user_id"),
        saved_by_username: row.get("saved_by_username"),
        mime_type: row.get("mime_type"),
        duration: row.get("duration"),
        width: row.get("width"),
        height: row.get("height"),
    })
}
