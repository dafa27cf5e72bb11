//! Per-chat pagination and checkpoint loop.
//!
//! - Primes the first batch with the chat's retry queue
//! - Streams history oldest-first, starting just after `last_read_message_id`
//! - Runs full batches through the batch coordinator and checkpoints after each one
//! - Drains the partial last batch, then writes the final checkpoint
//!
//! Every completed batch is persisted before the next one starts, so a crash loses at
//! most the batch in flight.

use crate::domain::{ChatCursor, DomainError, Message, ResolvedChat, RunState};
use crate::ports::{HistoryQuery, RemoteClient};
use crate::usecases::batch::run_batch;
use crate::usecases::checkpoint::CheckpointStore;
use crate::usecases::media_worker::MediaWorker;
use crate::usecases::pacing::PacingGate;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_PAGINATION_LIMIT: usize = 100;

/// Where a message falls relative to the chat's date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateWindow {
    /// Older than `start_date`. History is chronological, so paging stops.
    BeforeStart,
    /// Newer than `end_date`. Skipped; paging goes on.
    AfterEnd,
    Inside,
}

pub fn date_window(
    date: DateTime<Utc>,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> DateWindow {
    if start.is_some_and(|s| date < s) {
        DateWindow::BeforeStart
    } else if end.is_some_and(|e| date > e) {
        DateWindow::AfterEnd
    } else {
        DateWindow::Inside
    }
}

/// Outcome of one chat's run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatReport {
    pub index: usize,
    pub chat_id: i64,
    pub last_read_message_id: i32,
    pub downloaded: usize,
    pub failed: BTreeSet<i32>,
    pub ids_to_retry: BTreeSet<i32>,
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Priming,
    Paging,
    Draining,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flush {
    Continue,
    CapReached,
    Cancelled,
}

/// Sync service. Walks one chat's history and downloads its media in batches.
pub struct SyncService {
    client: Arc<dyn RemoteClient>,
    worker: Arc<MediaWorker>,
    pagination_limit: usize,
}

impl SyncService {
    /// `pagination_limit` of 0 falls back to [`DEFAULT_PAGINATION_LIMIT`].
    pub fn new(client: Arc<dyn RemoteClient>, worker: Arc<MediaWorker>, pagination_limit: usize) -> Self {
        let pagination_limit = if pagination_limit == 0 {
            DEFAULT_PAGINATION_LIMIT
        } else {
            pagination_limit
        };
        Self {
            client,
            worker,
            pagination_limit,
        }
    }

    pub fn client(&self) -> &Arc<dyn RemoteClient> {
        &self.client
    }

    pub fn pagination_limit(&self) -> usize {
        self.pagination_limit
    }

    /// Sync a single chat until its history is exhausted, its cap is reached or `cancel` fires.
    ///
    /// Per-message failures end up in the report's retry queue. Only a failed retry-queue
    /// fetch is returned as an error.
    pub async fn sync_chat(
        &self,
        chat: &ResolvedChat,
        checkpoints: &CheckpointStore,
        cancel: &CancellationToken,
    ) -> Result<ChatReport, DomainError> {
        let mut run = ChatRun {
            service: self,
            chat,
            checkpoints,
            cancel,
            gate: PacingGate::from_settings(
                chat.max_concurrent_downloads.as_ref(),
                chat.download_delay.as_ref(),
            ),
            state: RunState::new(),
            cursor: chat.cursor.clone(),
            pending: Vec::new(),
            cancelled: false,
        };
        info!(
            chat_id = chat.cursor.chat_id,
            last_read_message_id = chat.cursor.last_read_message_id,
            retry = chat.cursor.ids_to_retry.len(),
            directory = %chat.directory.display(),
            "syncing chat"
        );

        let mut phase = Phase::Priming;
        while phase != Phase::Done {
            phase = match phase {
                Phase::Priming => run.prime().await?,
                Phase::Paging => run.page().await,
                Phase::Draining => run.drain().await,
                Phase::Done => Phase::Done,
            };
        }

        Ok(run.report())
    }
}

/// Mutable state of one chat's loop.
struct ChatRun<'a> {
    service: &'a SyncService,
    chat: &'a ResolvedChat,
    checkpoints: &'a CheckpointStore,
    cancel: &'a CancellationToken,
    gate: PacingGate,
    state: RunState,
    cursor: ChatCursor,
    pending: Vec<Message>,
    cancelled: bool,
}

impl ChatRun<'_> {
    fn chat_id(&self) -> i64 {
        self.chat.cursor.chat_id
    }

    async fn prime(&mut self) -> Result<Phase, DomainError> {
        if self.cancel.is_cancelled() {
            self.cancelled = true;
            return Ok(Phase::Done);
        }
        // Ids above the watermark come back through paging.
        let watermark = self.cursor.last_read_message_id;
        let ahead = match watermark.checked_add(1) {
            Some(bound) => self.cursor.ids_to_retry.split_off(&bound),
            None => BTreeSet::new(),
        };
        if !ahead.is_empty() {
            debug!(
                chat_id = self.chat_id(),
                last_read_message_id = watermark,
                ids = ?ahead,
                "retry ids above the watermark left to paging"
            );
        }
        if self.cursor.ids_to_retry.is_empty() {
            return Ok(Phase::Paging);
        }
        let ids: Vec<i32> = self.cursor.ids_to_retry.iter().copied().collect();
        let messages = self.service.client.get_messages(self.chat_id(), &ids).await?;
        info!(
            chat_id = self.chat_id(),
            requested = ids.len(),
            found = messages.len(),
            "retrying previously failed downloads"
        );
        for message in messages {
            match self.push(message).await {
                Flush::Continue => {}
                Flush::CapReached => return Ok(Phase::Draining),
                Flush::Cancelled => return Ok(Phase::Done),
            }
        }
        Ok(Phase::Paging)
    }

    async fn page(&mut self) -> Phase {
        let service = self.service;
        let query = HistoryQuery {
            chat_id: self.chat_id(),
            min_id: self.chat.cursor.last_read_message_id,
            reverse: true,
            offset_date: self.chat.start_date,
        };
        let mut history = service.client.iter_messages(query);

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    self.cancelled = true;
                    self.checkpoint().await;
                    return Phase::Done;
                }
                next = history.next() => next,
            };
            let message = match next {
                None => return Phase::Draining,
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    warn!(chat_id = self.chat_id(), error = %e, "history stream failed; finishing with what was fetched");
                    return Phase::Draining;
                }
            };
            match date_window(message.date, self.chat.start_date, self.chat.end_date) {
                DateWindow::BeforeStart => return Phase::Draining,
                DateWindow::AfterEnd => continue,
                DateWindow::Inside => {}
            }
            match self.push(message).await {
                Flush::Continue => {}
                Flush::CapReached => return Phase::Draining,
                Flush::Cancelled => return Phase::Done,
            }
        }
    }

    async fn drain(&mut self) -> Phase {
        if self.flush().await != Flush::Cancelled {
            self.checkpoint().await;
        }
        Phase::Done
    }

    async fn push(&mut self, message: Message) -> Flush {
        if self.pending.iter().any(|m| m.id == message.id) {
            return Flush::Continue;
        }
        self.pending.push(message);
        if self.pending.len() >= self.service.pagination_limit {
            self.flush().await
        } else {
            Flush::Continue
        }
    }

    /// Run the pending batch, then advance the watermark and checkpoint.
    async fn flush(&mut self) -> Flush {
        if self.pending.is_empty() {
            return Flush::Continue;
        }
        let batch = std::mem::take(&mut self.pending);
        self.state.begin_batch(batch.iter().map(|m| m.id));

        let finished = tokio::select! {
            batch_max = run_batch(&self.service.worker, &self.gate, batch, self.chat, &self.state) => Some(batch_max),
            _ = self.cancel.cancelled() => None,
        };

        let Some(batch_max) = finished else {
            if let Some(resume) = self.state.resume_point() {
                info!(chat_id = self.chat_id(), resume_after = resume, "interrupted mid-batch");
                self.cursor.advance(resume);
            }
            self.state.finish_batch();
            self.cancelled = true;
            self.checkpoint().await;
            return Flush::Cancelled;
        };

        self.state.finish_batch();
        if let Some(max) = batch_max {
            self.cursor.advance(max);
        }
        let cap_reached = self
            .chat
            .max_messages
            .is_some_and(|cap| self.state.downloaded_count() >= cap);
        self.checkpoint().await;
        if cap_reached {
            info!(
                chat_id = self.chat_id(),
                downloaded = self.state.downloaded_count(),
                "max_messages reached"
            );
            Flush::CapReached
        } else {
            Flush::Continue
        }
    }

    /// Reconcile the retry queue and persist the cursor. Write failures are logged only.
    async fn checkpoint(&mut self) {
        self.state.reconcile(&mut self.cursor);
        if let Err(e) = self.checkpoints.commit(self.chat.index, &self.cursor).await {
            error!(chat_id = self.chat_id(), error = %e, "failed to write checkpoint");
        }
    }

    fn report(&self) -> ChatReport {
        let failed = self.state.failed_ids();
        let downloaded = self.state.downloaded_count();
        if failed.is_empty() {
            info!(chat_id = self.chat_id(), downloaded, "chat done");
        } else {
            warn!(
                chat_id = self.chat_id(),
                downloaded,
                failed = failed.len(),
                "{} downloads failed; they will be retried on the next run",
                failed.len()
            );
        }
        ChatReport {
            index: self.chat.index,
            chat_id: self.chat_id(),
            last_read_message_id: self.cursor.last_read_message_id,
            downloaded,
            failed,
            ids_to_retry: self.cursor.ids_to_retry.clone(),
            cancelled: self.cancelled,
        }
    }
}
