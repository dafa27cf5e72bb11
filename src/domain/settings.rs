//! Persisted downloader document (`config.yaml`) and per-chat resolution.
//!
//! Every per-chat override falls back to the global value when absent. Keys this
//! crate does not know about (credentials, UI state) are kept in `extra` so a
//! rewrite never drops them.

use super::entities::{ChatCursor, MediaKind};
use super::errors::DomainError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Allowed formats (MIME subtypes) per kind. `["all"]` disables filtering for that kind.
pub type FileFormats = BTreeMap<MediaKind, Vec<String>>;

/// Raw `download_delay` value: a number of seconds or a `[min, max]` range.
///
/// Anything else is kept as written and ignored with a warning when pacing is resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelaySetting {
    Fixed(f64),
    Range(Vec<f64>),
    Malformed(serde_yaml::Value),
}

/// Raw `max_concurrent_downloads` value. Non-integers are kept and replaced by the
/// default when pacing is resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConcurrencySetting {
    Count(i64),
    Malformed(serde_yaml::Value),
}

fn default_media_types() -> Vec<MediaKind> {
    MediaKind::ALL.to_vec()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloaderConfig {
    #[serde(default)]
    pub chats: Vec<ChatConfig>,

    #[serde(default = "default_media_types")]
    pub media_types: Vec<MediaKind>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub file_formats: FileFormats,

    /// Global download root. Each chat gets a `{chat_id}` subdirectory under it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_directory: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_downloads: Option<ConcurrencySetting>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_delay: Option<DelaySetting>,

    /// Run all chats concurrently instead of one after another.
    #[serde(default)]
    pub parallel_chats: bool,

    /// Minutes between runs; 0 runs once.
    #[serde(default)]
    pub refresh_interval: u64,

    // Legacy single-chat shape: flat top-level cursor, no `chats` list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_read_message_id: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids_to_retry: Option<Vec<i32>>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            chats: Vec::new(),
            media_types: default_media_types(),
            file_formats: FileFormats::new(),
            download_directory: None,
            max_concurrent_downloads: None,
            download_delay: None,
            parallel_chats: false,
            refresh_interval: 0,
            chat_id: None,
            last_read_message_id: None,
            ids_to_retry: None,
            extra: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(alias = "id", default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,

    #[serde(default)]
    pub last_read_message_id: i32,

    #[serde(default)]
    pub ids_to_retry: Vec<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_types: Option<Vec<MediaKind>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_formats: Option<FileFormats>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_downloads: Option<ConcurrencySetting>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_delay: Option<DelaySetting>,

    /// Used as-is instead of `{download_root}/{chat_id}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_directory: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_messages: Option<usize>,

    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ChatConfig {
    pub fn new(chat_id: i64) -> Self {
        Self {
            chat_id: Some(chat_id),
            ..Self::default()
        }
    }

    /// Write the cursor back into this entry.
    pub fn apply_cursor(&mut self, cursor: &ChatCursor) {
        self.last_read_message_id = cursor.last_read_message_id;
        self.ids_to_retry = cursor.ids_to_retry.iter().copied().collect();
    }
}

/// Effective settings for one chat: overrides applied, dates parsed, directory chosen.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChat {
    /// Position in `chats`; checkpoints are written back to this entry.
    pub index: usize,
    pub cursor: ChatCursor,
    pub media_types: Vec<MediaKind>,
    pub file_formats: FileFormats,
    pub max_concurrent_downloads: Option<ConcurrencySetting>,
    pub download_delay: Option<DelaySetting>,
    pub directory: PathBuf,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub max_messages: Option<usize>,
}

impl DownloaderConfig {
    /// Turn the legacy flat shape into a one-element `chats` list.
    ///
    /// Returns true when the document changed.
    pub fn normalize_legacy(&mut self) -> bool {
        if !self.chats.is_empty() {
            return false;
        }
        let Some(chat_id) = self.chat_id.take() else {
            return false;
        };
        let mut chat = ChatConfig::new(chat_id);
        chat.last_read_message_id = self.last_read_message_id.take().unwrap_or(0);
        chat.ids_to_retry = self.ids_to_retry.take().unwrap_or_default();
        self.chats.push(chat);
        true
    }

    /// Resolve the chat at `index`. `default_root` is used when no global
    /// `download_directory` is configured.
    pub fn resolve_chat(&self, index: usize, default_root: &Path) -> Result<ResolvedChat, DomainError> {
        let chat = self
            .chats
            .get(index)
            .ok_or_else(|| DomainError::Config(format!("no chat entry #{}", index)))?;
        let chat_id = chat.chat_id.ok_or(DomainError::MissingChatId { index })?;

        let directory = match &chat.download_directory {
            Some(dir) => dir.clone(),
            None => self
                .download_directory
                .as_deref()
                .unwrap_or(default_root)
                .join(chat_id.to_string()),
        };

        Ok(ResolvedChat {
            index,
            cursor: ChatCursor::new(chat_id, chat.last_read_message_id, &chat.ids_to_retry),
            media_types: chat
                .media_types
                .clone()
                .unwrap_or_else(|| self.media_types.clone()),
            file_formats: chat
                .file_formats
                .clone()
                .unwrap_or_else(|| self.file_formats.clone()),
            max_concurrent_downloads: chat
                .max_concurrent_downloads
                .clone()
                .or_else(|| self.max_concurrent_downloads.clone()),
            download_delay: chat
                .download_delay
                .clone()
                .or_else(|| self.download_delay.clone()),
            directory,
            start_date: chat
                .start_date
                .as_deref()
                .map(|s| parse_date("start_date", s))
                .transpose()?,
            end_date: chat
                .end_date
                .as_deref()
                .map(|s| parse_date("end_date", s))
                .transpose()?,
            max_messages: chat.max_messages,
        })
    }
}

/// `YYYY-MM-DD` (midnight UTC) or RFC 3339.
pub fn parse_date(field: &'static str, value: &str) -> Result<DateTime<Utc>, DomainError> {
    let trimmed = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        if let Some(midnight) = date.and_hms_opt(0, 0, 0) {
            return Ok(midnight.and_utc());
        }
    }
    DateTime::parse_from_rfc3339(trimmed)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DomainError::InvalidDate {
            field,
            value: value.to_string(),
        })
}
