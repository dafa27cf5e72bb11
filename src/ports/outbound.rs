//! Outbound ports. Application calls into infrastructure.
//!
//! Implemented by adapters.

use crate::domain::{DomainError, DownloadRecord, DownloaderConfig, Message, TransferError};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Transfer progress hook: `(bytes_done, bytes_total)`.
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// History iteration request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub chat_id: i64,
    /// Only messages with `id > min_id` are returned.
    pub min_id: i32,
    /// `true` = oldest first.
    pub reverse: bool,
    /// Where a date-aware client may start iterating.
    pub offset_date: Option<DateTime<Utc>>,
}

/// Remote messaging service. Session and authentication are the adapter's business.
#[async_trait::async_trait]
pub trait RemoteClient: Send + Sync {
    async fn start(&self) -> Result<(), DomainError>;

    async fn disconnect(&self) -> Result<(), DomainError>;

    /// Stream a chat's history according to `query`.
    fn iter_messages(&self, query: HistoryQuery) -> BoxStream<'_, Result<Message, DomainError>>;

    /// Fetch specific messages by id. Ids that no longer exist are simply absent from the result.
    async fn get_messages(&self, chat_id: i64, ids: &[i32]) -> Result<Vec<Message>, DomainError>;

    /// Download the message's media to `destination`.
    ///
    /// Returns the path actually written, or `None` when the client wrote nothing.
    async fn download_media(
        &self,
        message: &Message,
        destination: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<Option<PathBuf>, TransferError>;
}

/// Configuration store. Holds the downloader document including per-chat checkpoints.
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load(&self) -> Result<DownloaderConfig, DomainError>;

    /// Replace the stored document. Must not leave a partially written document behind.
    async fn save(&self, config: &DownloaderConfig) -> Result<(), DomainError>;
}

/// Download history log.
#[async_trait::async_trait]
pub trait HistoryPort: Send + Sync {
    async fn record(&self, record: &DownloadRecord) -> Result<(), DomainError>;

    /// Most recent records, newest first. Hosts reach it through `app::recent_downloads`.
    async fn recent(&self, limit: usize) -> Result<Vec<DownloadRecord>, DomainError>;
}

/// Progress display for in-flight transfers.
pub trait ProgressPort: Send + Sync {
    /// Start tracking one transfer; the returned callback is handed to the remote client.
    fn track(&self, label: &str, total: u64) -> ProgressCallback;
}
