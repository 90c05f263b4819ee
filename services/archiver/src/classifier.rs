//! Maps an inbound chat message to a media descriptor

use crate::models::{MediaAttachment, MediaDescriptor, Sender};
use teloxide::types::{FileMeta, Message};

/// Extract the single archivable attachment of `message`.
///
/// Attachments are checked in a fixed priority order (video, photo, audio,
/// voice, video note, document, animation) and the first one present wins.
/// For photos the last entry of the size list, which is the largest, is
/// used. Returns `None` when the message carries no supported media.
pub fn classify(message: &Message) -> Option<MediaDescriptor> {
    let (file, attachment) = extract_attachment(message)?;

    let sender = message
        .from
        .as_ref()
        .map(|user| Sender {
            id: Some(user.id.0 as i64),
            username: user.username.clone(),
            display_name: Some(user.first_name.clone()),
        })
        .unwrap_or_default();

    Some(MediaDescriptor {
        content_id: file.id.clone(),
        attachment,
        size_bytes: reported_size(file),
        caption: message.caption().map(str::to_string),
        sender,
        chat_id: message.chat.id.0,
        source_message_id: i64::from(message.id.0),
    })
}

/// The Bot API reports a missing size as zero
fn reported_size(file: &FileMeta) -> Option<i64> {
    (file.size > 0).then_some(i64::from(file.size))
}

fn extract_attachment(message: &Message) -> Option<(&FileMeta, MediaAttachment)> {
    if let Some(video) = message.video() {
        return Some((
            &video.file,
            MediaAttachment::Video {
                width: i64::from(video.width),
                height: i64::from(video.height),
                duration: i64::from(video.duration.seconds()),
                mime_type: video.mime_type.as_ref().map(|m| m.to_string()),
            },
        ));
    }

    if let Some(photo) = message.photo().and_then(|sizes| sizes.last()) {
        return Some((
            &photo.file,
            MediaAttachment::Photo {
                width: i64::from(photo.width),
                height: i64::from(photo.height),
            },
        ));
    }

    if let Some(audio) = message.audio() {
        return Some((
            &audio.file,
            MediaAttachment::Audio {
                duration: i64::from(audio.duration.seconds()),
                file_name: audio.file_name.clone(),
                mime_type: audio.mime_type.as_ref().map(|m| m.to_string()),
            },
        ));
    }

    if let Some(voice) = message.voice() {
        return Some((
            &voice.file,
            MediaAttachment::Voice {
                duration: i64::from(voice.duration.seconds()),
                mime_type: voice.mime_type.as_ref().map(|m| m.to_string()),
            },
        ));
    }

    if let Some(note) = message.video_note() {
        return Some((
            &note.file,
            MediaAttachment::VideoNote {
                duration: i64::from(note.duration.seconds()),
            },
        ));
    }

    if let Some(document) = message.document() {
        return Some((
            &document.file,
            MediaAttachment::Document {
                file_name: document.file_name.clone(),
                mime_type: document.mime_type.as_ref().map(|m| m.to_string()),
            },
        ));
    }

    if let Some(animation) = message.animation() {
        return Some((
            &animation.file,
            MediaAttachment::Animation {
                width: i64::from(animation.width),
                height: i64::from(animation.height),
                duration: i64::from(animation.duration.seconds()),
                mime_type: animation.mime_type.as_ref().map(|m| m.to_string()),
            },
        ));
    }

    None
}
