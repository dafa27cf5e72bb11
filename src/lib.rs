//! tg-media-mirror: resumable media downloader for chat histories, Hexagonal Architecture.
//!
//! Walks each configured chat oldest-first in batches, downloads attachments with
//! bounded concurrency, and checkpoints a per-chat watermark and retry queue after
//! every batch. The remote protocol client is supplied by the host through
//! [`ports::RemoteClient`]; [`app::run`] wires everything else.

pub mod adapters;
pub mod app;
pub mod domain;
pub mod ports;
pub mod shared;
pub mod usecases;
