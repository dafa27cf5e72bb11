//! Core domain layer. No external I/O dependencies.
//!
//! Entities and business rules live here. Dependencies flow inward.

pub mod entities;
pub mod errors;
pub mod run_state;
pub mod settings;

pub use entities::{
    ChatCursor, Document, DocumentAttribute, DownloadRecord, DownloadTarget, Media,
    MediaDescriptor, MediaKind, Message,
};
pub use errors::{DomainError, TransferError};
pub use run_state::RunState;
pub use settings::{ChatConfig, ConcurrencySetting, DelaySetting, DownloaderConfig, FileFormats, ResolvedChat};
