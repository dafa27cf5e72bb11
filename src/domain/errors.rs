//! Domain errors. Used by ports and use cases.
//!
//! Adapters map infrastructure errors into these.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Remote client error: {0}")]
    RemoteClient(String),

    #[error("Config store error: {0}")]
    Store(String),

    #[error("Download history error: {0}")]
    History(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Chat entry without `chat_id`. Fatal for that chat, raised before any download.
    #[error("chat entry #{index} has no chat_id")]
    MissingChatId { index: usize },

    #[error("invalid {field} '{value}': expected YYYY-MM-DD or RFC 3339")]
    InvalidDate { field: &'static str, value: String },
}

/// Outcome of one failed transfer attempt. Drives the per-message retry loop.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    /// The media handle went stale between listing and download; refetch and retry.
    #[error("file reference expired")]
    ReferenceExpired,

    /// Network timeout; back off and retry.
    #[error("transfer timed out")]
    Timeout,

    /// Anything else (auth, quota, malformed media, disk I/O). Not retried this run.
    #[error("{0}")]
    Permanent(String),
}
