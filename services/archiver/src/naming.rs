//! Storage path derivation for archived media

use crate::models::MediaDescriptor;
use chrono::{DateTime, Utc};

/// Characters of the content id used in generated filenames
const CONTENT_ID_PREFIX_LEN: usize = 8;

/// Relative location of a binary inside the storage root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedPath {
    pub relative_dir: &'static str,
    pub filename: String,
}

/// Compute the subdirectory and filename for `descriptor` saved at `now`.
///
/// Filenames start with `YYYYMMDD_HHMMSS`. When the platform supplied an
/// original filename its stem and extension are kept; otherwise the first
/// eight characters of the content id and the kind's default extension are
/// used. The result is deterministic for identical inputs.
pub fn derive(descriptor: &MediaDescriptor, now: DateTime<Utc>) -> DerivedPath {
    let kind = descriptor.kind();
    let timestamp = now.format("%Y%m%d_%H%M%S");

    let filename = match descriptor
        .attachment
        .original_filename()
        .and_then(sanitize_filename)
    {
        Some(original) => format!("{}_{}", timestamp, original),
        None => format!(
            "{}_{}{}",
            timestamp,
            content_id_prefix(&descriptor.content_id),
            kind.default_extension()
        ),
    };

    DerivedPath {
        relative_dir: kind.directory(),
        filename,
    }
}

/// Reduce an untrusted filename to a bare, safe basename.
///
/// Only the last component survives, whichever separator style was used.
/// Control characters are dropped. Returns `None` when nothing usable is
/// left, including `.` and `..`.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let basename = raw.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or_default();
    let cleaned: String = basename.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();

    match cleaned {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

fn content_id_prefix(content_id: &str) -> String {
    content_id
        .chars()
        .take(CONTENT_ID_PREFIX_LEN)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MediaAttachment, Sender};
    use chrono::TimeZone;

    fn descriptor(content_id: &str, attachment: MediaAttachment) -> MediaDescriptor {
        MediaDescriptor {
            content_id: content_id.to_string(),
            attachment,
            size_bytes: None,
            caption: None,
            sender: Sender::default(),
            chat_id: -100,
            source_message_id: 1,
        }
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, h, m, s).unwrap()
    }

    #[test]
    fn test_photo_without_original_name() {
        let photo = descriptor(
            "ABC123XYZ",
            MediaAttachment::Photo {
                width: 10,
                height: 10,
            },
        );

        let derived = derive(&photo, at(10, 15, 30));
        assert_eq!(derived.relative_dir, "photo");
        assert_eq!(derived.filename, "20240301_101530_ABC123XY.jpg");
    }

    #[test]
    fn test_original_filename_is_kept() {
        let audio = descriptor(
            "AUDIOFILEID",
            MediaAttachment::Audio {
                duration: 1,
                file_name: Some("My Song.final.flac".to_string()),
                mime_type: None,
            },
        );

        let derived = derive(&audio, at(0, 0, 5));
        assert_eq!(derived.relative_dir, "audio");
        assert_eq!(derived.filename, "20240301_000005_My Song.final.flac");
    }

    #[test]
    fn test_document_without_name_has_no_extension() {
        let document = descriptor(
            "DOCUMENT99",
            MediaAttachment::Document {
                file_name: None,
                mime_type: None,
            },
        );

        let derived = derive(&document, at(23, 59, 59));
        assert_eq!(derived.relative_dir, "document");
        assert_eq!(derived.filename, "20240301_235959_DOCUMENT");
    }

    #[test]
    fn test_video_note_directory() {
        let note = descriptor("VN", MediaAttachment::VideoNote { duration: 3 });

        let derived = derive(&note, at(1, 2, 3));
        assert_eq!(derived.relative_dir, "video_note");
        assert_eq!(derived.filename, "20240301_010203_VN.mp4");
    }

    #[test]
    fn test_traversal_in_original_name_is_stripped() {
        let document = descriptor(
            "DOC",
            MediaAttachment::Document {
                file_name: Some("../../etc/passwd".to_string()),
                mime_type: None,
            },
        );
        assert_eq!(derive(&document, at(9, 0, 0)).filename, "20240301_090000_passwd");

        let windows = descriptor(
            "DOC",
            MediaAttachment::Document {
                file_name: Some("..\\..\\boot.ini".to_string()),
                mime_type: None,
            },
        );
        assert_eq!(derive(&windows, at(9, 0, 0)).filename, "20240301_090000_boot.ini");
    }

    #[test]
    fn test_unusable_original_name_falls_back_to_content_id() {
        let document = descriptor(
            "FALLBACK1234",
            MediaAttachment::Document {
                file_name: Some("uploads/..".to_string()),
                mime_type: None,
            },
        );
        assert_eq!(derive(&document, at(9, 0, 0)).filename, "20240301_090000_FALLBACK");
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("report.pdf"), Some("report.pdf".to_string()));
        assert_eq!(sanitize_filename("a/b/c.txt"), Some("c.txt".to_string()));
        assert_eq!(sanitize_filename("evil\u{0}name\n.txt"), Some("evilname.txt".to_string()));
        assert_eq!(sanitize_filename("dir/"), None);
        assert_eq!(sanitize_filename(".."), None);
        assert_eq!(sanitize_filename("   "), None);
    }

    #[test]
    fn test_content_id_prefix_is_filesystem_safe() {
        assert_eq!(content_id_prefix("ab/cd\\ef.gh"), "ab_cd_ef");
        assert_eq!(content_id_prefix("short"), "short");
    }

    #[test]
    fn test_derive_is_deterministic_and_second_resolution() {
        let video = descriptor(
            "SAMEVIDEOID",
            MediaAttachment::Video {
                width: 1,
                height: 1,
                duration: 1,
                mime_type: None,
            },
        );

        assert_eq!(derive(&video, at(8, 0, 0)), derive(&video, at(8, 0, 0)));
        assert_ne!(
            derive(&video, at(8, 0, 0)).filename,
            derive(&video, at(8, 0, 1)).filename
        );
    }
}
