//! Message and chat builders shared by the use-case tests.

use crate::domain::{
    ChatCursor, Document, DocumentAttribute, FileFormats, Media, MediaKind, Message, ResolvedChat,
};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::path::Path;

pub const CHAT_ID: i64 = 123;

/// Message dates grow with the id: id N is N minutes after 2024-01-01.
pub fn date_of(id: i32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(i64::from(id))
}

pub fn photo(id: i32) -> Message {
    Message::with_media(
        id,
        CHAT_ID,
        date_of(id),
        Media::Photo {
            id: 9000 + i64::from(id),
            size: 2048,
        },
    )
}

pub fn document(id: i32, name: &str, mime: &str) -> Message {
    Message::with_media(
        id,
        CHAT_ID,
        date_of(id),
        Media::Document(Document {
            id: 7000 + i64::from(id),
            mime_type: mime.to_string(),
            size: 4096,
            attributes: vec![DocumentAttribute::Filename(name.to_string())],
        }),
    )
}

pub fn audio(id: i32, name: &str, mime: &str) -> Message {
    let mut message = document(id, name, mime);
    if let Some(Media::Document(doc)) = message.media.as_mut() {
        doc.attributes.push(DocumentAttribute::Audio { voice: false });
    }
    message
}

pub fn text(id: i32) -> Message {
    Message::text(id, CHAT_ID, date_of(id))
}

pub fn resolved_chat(directory: &Path) -> ResolvedChat {
    ResolvedChat {
        index: 0,
        cursor: ChatCursor::new(CHAT_ID, 0, &[]),
        media_types: MediaKind::ALL.to_vec(),
        file_formats: FileFormats::new(),
        max_concurrent_downloads: None,
        download_delay: None,
        directory: directory.to_path_buf(),
        start_date: None,
        end_date: None,
        max_messages: None,
    }
}
