use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of media categories the archiver accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Photo,
    Audio,
    Voice,
    VideoNote,
    Document,
    Animation,
}

impl MediaKind {
    pub const ALL: [MediaKind; 7] = [
        MediaKind::Video,
        MediaKind::Photo,
        MediaKind::Audio,
        MediaKind::Voice,
        MediaKind::VideoNote,
        MediaKind::Document,
        MediaKind::Animation,
    ];

    /// Stable name used as the database value and the storage subdirectory.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Video => "video",
            MediaKind::Photo => "photo",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
            MediaKind::VideoNote => "video_note",
            MediaKind::Document => "document",
            MediaKind::Animation => "animation",
        }
    }

    pub fn directory(&self) -> &'static str {
        self.as_str()
    }

    /// Extension used when the platform gives no original filename.
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Video | MediaKind::VideoNote => ".mp4",
            MediaKind::Photo => ".jpg",
            MediaKind::Audio => ".mp3",
            MediaKind::Voice => ".ogg",
            MediaKind::Document => "",
            MediaKind::Animation => ".gif",
        }
    }

    /// Human label for chat replies.
    pub fn label(&self) -> &'static str {
        match self {
            MediaKind::Video => "Video",
            MediaKind::Photo => "Photo",
            MediaKind::Audio => "Audio",
            MediaKind::Voice => "Voice",
            MediaKind::VideoNote => "Video Note",
            MediaKind::Document => "Document",
            MediaKind::Animation => "Animation",
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MediaKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown media kind: {}", s))
    }
}

/// Kind-specific attributes of one attachment. Each variant only carries
/// what the platform reports for that kind.
#[derive(Debug, Clone, PartialEq)]
pub enum MediaAttachment {
    Video {
        width: i64,
        height: i64,
        duration: i64,
        mime_type: Option<String>,
    },
    Photo {
        width: i64,
        height: i64,
    },
    Audio {
        duration: i64,
        file_name: Option<String>,
        mime_type: Option<String>,
    },
    Voice {
        duration: i64,
        mime_type: Option<String>,
    },
    VideoNote {
        duration: i64,
    },
    Document {
        file_name: Option<String>,
        mime_type: Option<String>,
    },
    Animation {
        width: i64,
        height: i64,
        duration: i64,
        mime_type: Option<String>,
    },
}

impl MediaAttachment {
    pub fn kind(&self) -> MediaKind {
        match self {
            MediaAttachment::Video { .. } => MediaKind::Video,
            MediaAttachment::Photo { .. } => MediaKind::Photo,
            MediaAttachment::Audio { .. } => MediaKind::Audio,
            MediaAttachment::Voice { .. } => MediaKind::Voice,
            MediaAttachment::VideoNote { .. } => MediaKind::VideoNote,
            MediaAttachment::Document { .. } => MediaKind::Document,
            MediaAttachment::Animation { .. } => MediaKind::Animation,
        }
    }

    /// Uploader-supplied name. Only documents and audio keep one; videos
    /// and animations are always renamed.
    pub fn original_filename(&self) -> Option<&str> {
        match self {
            MediaAttachment::Audio { file_name, .. }
            | MediaAttachment::Document { file_name, .. } => file_name.as_deref(),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> Option<&str> {
        match self {
            MediaAttachment::Video { mime_type, .. }
            | MediaAttachment::Audio { mime_type, .. }
            | MediaAttachment::Voice { mime_type, .. }
            | MediaAttachment::Document { mime_type, .. }
            | MediaAttachment::Animation { mime_type, .. } => mime_type.as_deref(),
            MediaAttachment::Photo { .. } | MediaAttachment::VideoNote { .. } => None,
        }
    }

    pub fn duration(&self) -> Option<i64> {
        match self {
            MediaAttachment::Video { duration, .. }
            | MediaAttachment::Audio { duration, .. }
            | MediaAttachment::Voice { duration, .. }
            | MediaAttachment::VideoNote { duration }
            | MediaAttachment::Animation { duration, .. } => Some(*duration),
            MediaAttachment::Photo { .. } | MediaAttachment::Document { .. } => None,
        }
    }

    /// Width and height, for the kinds that have them.
    pub fn dimensions(&self) -> Option<(i64, i64)> {
        match self {
            MediaAttachment::Video { width, height, .. }
            | MediaAttachment::Photo { width, height }
            | MediaAttachment::Animation { width, height, .. } => Some((*width, *height)),
            _ => None,
        }
    }
}

/// Who posted the media. Every field may be missing for anonymous posts.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sender {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub display_name: Option<String>,
}

/// Classified view of one attachment, built fresh for each save attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaDescriptor {
    pub content_id: String,
    pub attachment: MediaAttachment,
    pub size_bytes: Option<i64>,
    pub caption: Option<String>,
    pub sender: Sender,
    pub chat_id: i64,
    pub source_message_id: i64,
}

impl MediaDescriptor {
    pub fn kind(&self) -> MediaKind {
        self.attachment.kind()
    }
}

/// The administrator who issued the save command.
#[derive(Debug, Clone, PartialEq)]
pub struct Operator {
    pub user_id: i64,
    pub username: Option<String>,
    pub display_name: String,
}

/// One archived item, exactly as stored in the metadata table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SaveRecord {
    pub id: Option<i64>,
    pub content_id: String,
    pub kind: MediaKind,
    pub original_filename: Option<String>,
    pub saved_filename: String,
    pub storage_path: String,
    pub file_size: Option<i64>,
    pub sender_id: Option<i64>,
    pub sender_username: Option<String>,
    pub sender_display_name: Option<String>,
    pub chat_id: i64,
    pub message_id: i64,
    pub caption: Option<String>,
    pub saved_at: DateTime<Utc>,
    pub saved_by_user_id: i64,
    pub saved_by_username: Option<String>,
    pub mime_type: Option<String>,
    pub duration: Option<i64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

impl SaveRecord {
    /// Build the row for a descriptor whose binary is already on disk.
    pub fn new(
        descriptor: &MediaDescriptor,
        location: &StoredLocation,
        operator: &Operator,
        saved_at: DateTime<Utc>,
    ) -> Self {
        let attachment = &descriptor.attachment;
        let (width, height) = attachment.dimensions().unzip();

        Self {
            id: None,
            content_id: descriptor.content_id.clone(),
            kind: descriptor.kind(),
            original_filename: attachment.original_filename().map(str::to_string),
            saved_filename: location.filename.clone(),
            storage_path: location.path.to_string_lossy().into_owned(),
            file_size: descriptor.size_bytes,
            sender_id: descriptor.sender.id,
            sender_username: descriptor.sender.username.clone(),
            sender_display_name: descriptor.sender.display_name.clone(),
            chat_id: descriptor.chat_id,
            message_id: descriptor.source_message_id,
            caption: descriptor.caption.clone(),
            saved_at,
            saved_by_user_id: operator.user_id,
            saved_by_username: operator.username.clone(),
            mime_type: attachment.mime_type().map(str::to_string),
            duration: attachment.duration(),
            width,
            height,
        }
    }
}

/// Where a saved binary ended up.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredLocation {
    pub kind: MediaKind,
    pub relative_dir: &'static str,
    pub filename: String,
    pub path: std::path::PathBuf,
    pub bytes_written: u64,
}

/// Short view of a record for list and search replies.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MediaSummary {
    pub saved_filename: String,
    pub kind: MediaKind,
    pub sender_display_name: Option<String>,
    pub caption: Option<String>,
    pub file_size: Option<i64>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub kind: MediaKind,
    pub count: i64,
    pub total_size: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreTotals {
    pub count: i64,
    pub total_size: i64,
}
