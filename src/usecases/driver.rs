//! Multi-chat driver: load the document, sync every configured chat, report.
//!
//! Chats run one after another by default. With `parallel_chats` they run
//! concurrently and their checkpoint writes are serialized through one
//! [`CheckpointStore`]. A chat that fails to resolve or to sync is reported and
//! never stops the others.

use crate::domain::{DomainError, DownloaderConfig};
use crate::ports::ConfigStore;
use crate::usecases::checkpoint::CheckpointStore;
use crate::usecases::sync_service::{ChatReport, SyncService};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A chat that could not be synced.
#[derive(Debug)]
pub struct ChatError {
    pub index: usize,
    pub error: DomainError,
}

/// Outcome of one run over all chats.
#[derive(Debug)]
pub struct RunReport {
    /// Updated document, checkpoints and reconciled retry queues included.
    pub config: DownloaderConfig,
    pub chats: Vec<ChatReport>,
    pub errors: Vec<ChatError>,
    pub cancelled: bool,
}

impl RunReport {
    /// Distinct messages that ended the run failed, over all chats.
    pub fn failed_count(&self) -> usize {
        self.chats
            .iter()
            .flat_map(|c| c.failed.iter().map(move |id| (c.chat_id, *id)))
            .collect::<BTreeSet<_>>()
            .len()
    }
}

pub struct DownloadDriver {
    sync: SyncService,
    store: Arc<dyn ConfigStore>,
    download_root: PathBuf,
}

impl DownloadDriver {
    /// `download_root` is used when the document has no global `download_directory`.
    pub fn new(sync: SyncService, store: Arc<dyn ConfigStore>, download_root: impl Into<PathBuf>) -> Self {
        Self {
            sync,
            store,
            download_root: download_root.into(),
        }
    }

    /// Run every configured chat once.
    ///
    /// Fails only when the document cannot be loaded or the client cannot start.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport, DomainError> {
        let mut document = self.store.load().await?;
        if document.normalize_legacy() {
            info!("converted legacy single-chat configuration to a chats list");
        }
        let parallel = document.parallel_chats;

        let mut chats = Vec::new();
        let mut errors = Vec::new();
        for index in 0..document.chats.len() {
            match document.resolve_chat(index, &self.download_root) {
                Ok(chat) => chats.push(chat),
                Err(error) => {
                    error!(index, error = %error, "skipping chat entry");
                    errors.push(ChatError { index, error });
                }
            }
        }
        if chats.is_empty() {
            warn!("no chats to download");
        }

        let checkpoints = CheckpointStore::new(Arc::clone(&self.store), document);
        let client = self.sync.client();
        client.start().await?;

        let results = if parallel {
            join_all(
                chats
                    .iter()
                    .map(|chat| self.sync.sync_chat(chat, &checkpoints, cancel)),
            )
            .await
        } else {
            let mut results = Vec::with_capacity(chats.len());
            for chat in &chats {
                if cancel.is_cancelled() {
                    break;
                }
                results.push(self.sync.sync_chat(chat, &checkpoints, cancel).await);
            }
            results
        };

        if let Err(e) = client.disconnect().await {
            warn!(error = %e, "failed to disconnect");
        }

        let mut reports = Vec::with_capacity(results.len());
        for (chat, result) in chats.iter().zip(results) {
            match result {
                Ok(report) => reports.push(report),
                Err(error) => {
                    error!(chat_id = chat.cursor.chat_id, error = %error, "chat sync failed");
                    errors.push(ChatError {
                        index: chat.index,
                        error,
                    });
                }
            }
        }

        let report = RunReport {
            config: checkpoints.into_document(),
            chats: reports,
            errors,
            cancelled: cancel.is_cancelled(),
        };
        info!(
            chats = report.chats.len(),
            errors = report.errors.len(),
            failed = report.failed_count(),
            "run finished"
        );
        Ok(report)
    }

    /// Run, persist the updated document, wait `refresh_interval` minutes, repeat.
    ///
    /// Returns after a single run when the interval is 0, and as soon as `cancel` fires.
    pub async fn run_with_refresh(&self, cancel: &CancellationToken) -> Result<RunReport, DomainError> {
        loop {
            let report = self.run(cancel).await?;
            if let Err(e) = self.store.save(&report.config).await {
                error!(error = %e, "failed to save configuration");
            }
            let minutes = report.config.refresh_interval;
            if minutes == 0 || report.cancelled {
                return Ok(report);
            }
            info!(minutes, "waiting for next refresh");
            tokio::select! {
                _ = cancel.cancelled() => return Ok(report),
                _ = tokio::time::sleep(Duration::from_secs(minutes * 60)) => {}
            }
        }
    }
}
