//! Domain entities. Pure data structures for the core business.
//!
//! No protocol/IO types here. Remote clients map their own message and
//! attachment types into these at the adapter boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// A single message from a chat, as seen by the downloader.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i32,
    pub chat_id: i64,
    pub date: DateTime<Utc>,
    pub media: Option<Media>,
}

impl Message {
    /// Message without an attachment.
    pub fn text(id: i32, chat_id: i64, date: DateTime<Utc>) -> Self {
        Self {
            id,
            chat_id,
            date,
            media: None,
        }
    }

    pub fn with_media(id: i32, chat_id: i64, date: DateTime<Utc>, media: Media) -> Self {
        Self {
            id,
            chat_id,
            date,
            media: Some(media),
        }
    }
}

/// Attachment carried by a message. Decided once by the adapter that produced the message.
#[derive(Debug, Clone, PartialEq)]
pub enum Media {
    /// Compressed photo. Never has a declared filename.
    Photo { id: i64, size: u64 },
    /// Any document-like attachment (files, audio, voice, video, round video).
    Document(Document),
    /// Attachments that carry no downloadable file (contacts, polls, locations, web pages).
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    pub id: i64,
    pub mime_type: String,
    pub size: u64,
    pub attributes: Vec<DocumentAttribute>,
}

/// Declared attributes of a document attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentAttribute {
    Audio { voice: bool },
    Video { round_message: bool },
    Filename(String),
}

impl Document {
    pub fn file_name(&self) -> Option<&str> {
        self.attributes.iter().find_map(|a| match a {
            DocumentAttribute::Filename(name) if !name.is_empty() => Some(name.as_str()),
            _ => None,
        })
    }

    pub(crate) fn has_voice_flag(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| matches!(a, DocumentAttribute::Audio { voice: true }))
    }

    pub(crate) fn has_round_flag(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| matches!(a, DocumentAttribute::Video { round_message: true }))
    }

    pub(crate) fn has_audio_attribute(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| matches!(a, DocumentAttribute::Audio { .. }))
    }

    pub(crate) fn has_video_attribute(&self) -> bool {
        self.attributes
            .iter()
            .any(|a| matches!(a, DocumentAttribute::Video { .. }))
    }

    /// Subtype of the declared MIME type (`video/mp4` → `mp4`).
    pub fn mime_subtype(&self) -> Option<&str> {
        self.mime_type
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty() && self.mime_type.contains('/'))
    }
}

/// Semantic category of an attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Photo,
    Video,
    Audio,
    Voice,
    VideoNote,
    Document,
}

impl MediaKind {
    pub const ALL: [MediaKind; 6] = [
        MediaKind::Audio,
        MediaKind::Document,
        MediaKind::Photo,
        MediaKind::Video,
        MediaKind::Voice,
        MediaKind::VideoNote,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
            MediaKind::Voice => "voice",
            MediaKind::VideoNote => "video_note",
            MediaKind::Document => "document",
        }
    }

    /// Kinds whose downloads are filtered by a per-kind format allow-list.
    pub fn has_format_filter(self) -> bool {
        matches!(self, MediaKind::Audio | MediaKind::Document | MediaKind::Video)
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derived view of an attachment used for naming and filtering. Never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    pub attachment_id: i64,
    pub mime_subtype: Option<String>,
    pub suggested_filename: Option<String>,
    pub size_bytes: u64,
}

/// Resolved, collision-free destination of one transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadTarget {
    pub absolute_path: PathBuf,
    pub kind: MediaKind,
}

/// Per-chat resume state persisted with the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ChatCursor {
    pub chat_id: i64,
    pub last_read_message_id: i32,
    pub ids_to_retry: BTreeSet<i32>,
}

impl ChatCursor {
    pub fn new(chat_id: i64, last_read_message_id: i32, ids_to_retry: &[i32]) -> Self {
        Self {
            chat_id,
            last_read_message_id,
            ids_to_retry: ids_to_retry.iter().copied().collect(),
        }
    }

    /// Move the watermark forward. Lower values are ignored.
    pub fn advance(&mut self, message_id: i32) {
        self.last_read_message_id = self.last_read_message_id.max(message_id);
    }
}

/// One successful download, appended to the history log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub chat_id: i64,
    pub message_id: i32,
    pub file_name: String,
    pub file_size: u64,
    pub file_path: PathBuf,
    pub media_type: MediaKind,
    pub downloaded_at: DateTime<Utc>,
}
