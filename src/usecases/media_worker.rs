//! Single-item downloader: one message's media, bounded retries, typed failures.
//!
//! Per-message errors never leave this module. Every exit path marks the id
//! processed exactly once, as downloaded, failed or skipped.

use crate::domain::{
    DownloadRecord, FileFormats, MediaDescriptor, MediaKind, Message, ResolvedChat, RunState,
    TransferError,
};
use crate::ports::{HistoryPort, ProgressPort, RemoteClient};
use crate::usecases::naming::{self, TargetResolver};
use chrono::Utc;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

/// Transfer attempts per message.
pub const MAX_ATTEMPTS: u32 = 3;

/// Pause before retrying a timed-out transfer.
pub const TIMEOUT_BACKOFF: Duration = Duration::from_secs(5);

/// Whether a file of `format` may be downloaded for `kind`.
///
/// Only audio, document and video have allow-lists. A kind without a list, an
/// empty list, or the single entry `all` lets everything through.
pub fn format_allowed(kind: MediaKind, formats: &FileFormats, format: Option<&str>) -> bool {
    if !kind.has_format_filter() {
        return true;
    }
    let allowed = match formats.get(&kind) {
        Some(list) if !list.is_empty() => list,
        _ => return true,
    };
    if let [only] = allowed.as_slice() {
        if only.eq_ignore_ascii_case("all") {
            return true;
        }
    }
    format.is_some_and(|f| allowed.iter().any(|a| a.eq_ignore_ascii_case(f)))
}

const COMPARE_CHUNK: usize = 64 * 1024;

/// Byte-for-byte comparison of two files. A missing `b` counts as different.
async fn same_content(a: &Path, b: &Path) -> std::io::Result<bool> {
    let (mut fa, mut fb) = match (File::open(a).await, File::open(b).await) {
        (Ok(fa), Ok(fb)) => (fa, fb),
        (_, Err(e)) if e.kind() == ErrorKind::NotFound => return Ok(false),
        (Err(e), _) | (_, Err(e)) => return Err(e),
    };
    let mut remaining = fa.metadata().await?.len();
    if remaining != fb.metadata().await?.len() {
        return Ok(false);
    }
    let mut buf_a = vec![0u8; COMPARE_CHUNK];
    let mut buf_b = vec![0u8; COMPARE_CHUNK];
    while remaining > 0 {
        let n = remaining.min(COMPARE_CHUNK as u64) as usize;
        fa.read_exact(&mut buf_a[..n]).await?;
        fb.read_exact(&mut buf_b[..n]).await?;
        if buf_a[..n] != buf_b[..n] {
            return Ok(false);
        }
        remaining -= n as u64;
    }
    Ok(true)
}

/// Releases a reserved destination when the transfer ends or its future is dropped.
struct Reservation<'a> {
    resolver: &'a TargetResolver,
    path: &'a Path,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.resolver.release(self.path);
    }
}

/// Downloads single messages through the remote client.
pub struct MediaWorker {
    client: Arc<dyn RemoteClient>,
    resolver: TargetResolver,
    progress: Option<Arc<dyn ProgressPort>>,
    history: Option<Arc<dyn HistoryPort>>,
}

impl MediaWorker {
    pub fn new(client: Arc<dyn RemoteClient>) -> Self {
        Self {
            client,
            resolver: TargetResolver::new(),
            progress: None,
            history: None,
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressPort>) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_history(mut self, history: Arc<dyn HistoryPort>) -> Self {
        self.history = Some(history);
        self
    }

    /// Download the message's media into the chat's directory.
    ///
    /// Always returns the message id; callers use it only for the batch watermark.
    pub async fn download_one(&self, message: Message, chat: &ResolvedChat, state: &RunState) -> i32 {
        let message_id = message.id;
        let chat_id = chat.cursor.chat_id;
        let mut message = message;
        let mut attempt = 0;

        loop {
            attempt += 1;

            let Some(descriptor) = naming::describe(&message) else {
                state.mark_skipped(message_id);
                return message_id;
            };
            if !chat.media_types.contains(&descriptor.kind) {
                debug!(chat_id, msg_id = message_id, kind = %descriptor.kind, "media type not selected; skipping");
                state.mark_skipped(message_id);
                return message_id;
            }
            let format = descriptor.mime_subtype.as_deref();
            if !format_allowed(descriptor.kind, &chat.file_formats, format) {
                debug!(chat_id, msg_id = message_id, kind = %descriptor.kind, format, "format not allowed; skipping");
                state.mark_skipped(message_id);
                return message_id;
            }

            match self.transfer(&message, &descriptor, chat).await {
                Ok(path) => {
                    info!(chat_id, msg_id = message_id, path = %path.display(), "Media downloaded");
                    state.mark_downloaded(message_id);
                    self.record_history(chat_id, message_id, &descriptor, path).await;
                    return message_id;
                }
                Err(TransferError::ReferenceExpired) if attempt >= MAX_ATTEMPTS => {
                    error!(chat_id, msg_id = message_id, attempts = attempt, "file reference expired on every attempt; download skipped");
                    state.mark_failed(message_id);
                    return message_id;
                }
                Err(TransferError::ReferenceExpired) => {
                    warn!(chat_id, msg_id = message_id, "file reference expired, refetching...");
                    match self.client.get_messages(chat_id, &[message_id]).await {
                        Ok(found) => match found.into_iter().find(|m| m.id == message_id) {
                            Some(fresh) => message = fresh,
                            None => {
                                error!(chat_id, msg_id = message_id, "message no longer available; download skipped");
                                state.mark_failed(message_id);
                                return message_id;
                            }
                        },
                        Err(e) => {
                            error!(chat_id, msg_id = message_id, error = %e, "refetch failed; download skipped");
                            state.mark_failed(message_id);
                            return message_id;
                        }
                    }
                }
                Err(TransferError::Timeout) if attempt >= MAX_ATTEMPTS => {
                    error!(chat_id, msg_id = message_id, attempts = attempt, "timing out after {} retries, download skipped", MAX_ATTEMPTS);
                    state.mark_failed(message_id);
                    return message_id;
                }
                Err(TransferError::Timeout) => {
                    warn!(
                        chat_id,
                        msg_id = message_id,
                        "timeout while downloading, retrying after {} seconds",
                        TIMEOUT_BACKOFF.as_secs()
                    );
                    tokio::time::sleep(TIMEOUT_BACKOFF).await;
                }
                Err(TransferError::Permanent(reason)) => {
                    error!(chat_id, msg_id = message_id, error = %reason, "could not be downloaded");
                    state.mark_failed(message_id);
                    return message_id;
                }
            }
        }
    }

    /// Reserve a destination and run the transfer.
    ///
    /// A copy written next to an identical existing file is removed again and the
    /// existing path is returned.
    async fn transfer(
        &self,
        message: &Message,
        descriptor: &MediaDescriptor,
        chat: &ResolvedChat,
    ) -> Result<PathBuf, TransferError> {
        let base = naming::build_target(descriptor, message.date, &chat.directory).absolute_path;
        let target = self.resolver.reserve(descriptor, message.date, &chat.directory);
        let _reservation = Reservation {
            resolver: &self.resolver,
            path: &target.absolute_path,
        };
        let written = self.fetch(message, descriptor, &target.absolute_path).await?;
        if written == base {
            return Ok(written);
        }
        match same_content(&written, &base).await {
            Ok(true) => {
                debug!(duplicate = %written.display(), existing = %base.display(), "identical file already present");
                if let Err(e) = tokio::fs::remove_file(&written).await {
                    warn!(path = %written.display(), error = %e, "failed to remove duplicate download");
                    return Ok(written);
                }
                Ok(base)
            }
            Ok(false) => Ok(written),
            Err(e) => {
                warn!(path = %written.display(), error = %e, "could not compare with existing file; keeping both");
                Ok(written)
            }
        }
    }

    async fn fetch(
        &self,
        message: &Message,
        descriptor: &MediaDescriptor,
        destination: &Path,
    ) -> Result<PathBuf, TransferError> {
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                TransferError::Permanent(format!("create {}: {}", parent.display(), e))
            })?;
        }
        let progress = self.progress.as_ref().map(|p| {
            let name = destination
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            p.track(&format!("Downloading {}", name), descriptor.size_bytes)
        });
        let written = self
            .client
            .download_media(message, destination, progress)
            .await?;
        Ok(written.unwrap_or_else(|| destination.to_path_buf()))
    }

    async fn record_history(&self, chat_id: i64, message_id: i32, descriptor: &MediaDescriptor, path: PathBuf) {
        let Some(history) = &self.history else {
            return;
        };
        let record = DownloadRecord {
            chat_id,
            message_id,
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_size: descriptor.size_bytes,
            file_path: path,
            media_type: descriptor.kind,
            downloaded_at: Utc::now(),
        };
        if let Err(e) = history.record(&record).await {
            warn!(chat_id, msg_id = message_id, error = %e, "failed to record download history");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::persistence::history_jsonl::JsonlHistory;
    use crate::adapters::remote::ScriptedClient;
    use crate::usecases::test_support::{CHAT_ID, audio, document, photo, resolved_chat, text};
    use std::collections::BTreeSet;
    use tokio::time::Instant;

    fn worker(client: &Arc<ScriptedClient>) -> MediaWorker {
        MediaWorker::new(Arc::clone(client) as Arc<dyn RemoteClient>)
    }

    #[test]
    fn test_format_allowed() {
        let mut formats = FileFormats::new();
        formats.insert(MediaKind::Audio, vec!["mp3".into()]);
        assert!(!format_allowed(MediaKind::Audio, &formats, Some("ogg")));
        assert!(format_allowed(MediaKind::Audio, &formats, Some("mp3")));
        assert!(!format_allowed(MediaKind::Audio, &formats, None));

        formats.insert(MediaKind::Document, vec!["all".into()]);
        assert!(format_allowed(MediaKind::Document, &formats, Some("pdf")));
        assert!(format_allowed(MediaKind::Document, &formats, None));

        // No list for video, and photos are never filtered.
        assert!(format_allowed(MediaKind::Video, &formats, Some("mov")));
        formats.insert(MediaKind::Photo, vec!["png".into()]);
        assert!(format_allowed(MediaKind::Photo, &formats, None));
    }

    #[tokio::test]
    async fn test_download_success_records_state_and_history() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::new());
        let history = Arc::new(JsonlHistory::new(dir.path().join("history.jsonl")));
        let worker = worker(&client).with_history(Arc::clone(&history) as Arc<dyn HistoryPort>);
        let chat = resolved_chat(dir.path());
        let state = RunState::new();

        let id = worker
            .download_one(document(5, "sample_document.pdf", "application/pdf"), &chat, &state)
            .await;

        assert_eq!(id, 5);
        assert!(dir.path().join("document").join("sample_document.pdf").is_file());
        assert_eq!(state.downloaded_ids(), BTreeSet::from([5]));
        assert!(state.is_processed(5));
        let recent = history.recent(10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].file_name, "sample_document.pdf");
        assert_eq!(recent[0].media_type, MediaKind::Document);
    }

    #[tokio::test]
    async fn test_skips_without_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::new());
        let worker = worker(&client);
        let mut chat = resolved_chat(dir.path());
        chat.media_types = vec![MediaKind::Audio, MediaKind::Photo];
        chat.file_formats.insert(MediaKind::Audio, vec!["mp3".into()]);
        let state = RunState::new();

        assert_eq!(worker.download_one(text(1), &chat, &state).await, 1);
        assert_eq!(
            worker.download_one(document(2, "a.pdf", "application/pdf"), &chat, &state).await,
            2
        );
        assert_eq!(worker.download_one(audio(3, "a.ogg", "audio/ogg"), &chat, &state).await, 3);
        assert_eq!(worker.download_one(audio(4, "b.mp3", "audio/mp3"), &chat, &state).await, 4);

        assert_eq!(client.attempts(), 1);
        assert_eq!(state.downloaded_ids(), BTreeSet::from([4]));
        assert!(state.failed_ids().is_empty());
        assert!((1..=4).all(|id| state.is_processed(id)));
    }

    #[tokio::test]
    async fn test_expired_reference_is_refetched() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::new());
        client.add_messages(CHAT_ID, [photo(7)]);
        client.script_failures(
            CHAT_ID,
            7,
            [TransferError::ReferenceExpired, TransferError::ReferenceExpired],
        );
        let worker = worker(&client);
        let state = RunState::new();

        worker.download_one(photo(7), &resolved_chat(dir.path()), &state).await;

        assert_eq!(client.refetches(), 2);
        assert_eq!(client.attempts(), 3);
        assert_eq!(state.downloaded_ids(), BTreeSet::from([7]));
    }

    #[tokio::test]
    async fn test_expired_reference_three_times_fails() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::new());
        client.add_messages(CHAT_ID, [photo(8)]);
        client.script_failures(CHAT_ID, 8, vec![TransferError::ReferenceExpired; 3]);
        let worker = worker(&client);
        let state = RunState::new();

        assert_eq!(worker.download_one(photo(8), &resolved_chat(dir.path()), &state).await, 8);

        assert_eq!(client.attempts(), 3);
        assert_eq!(state.failed_ids(), BTreeSet::from([8]));
        assert!(state.is_processed(8));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_back_off_then_fail() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::new());
        client.script_failures(CHAT_ID, 11, vec![TransferError::Timeout; 3]);
        let worker = worker(&client);
        let state = RunState::new();

        let start = Instant::now();
        worker.download_one(photo(11), &resolved_chat(dir.path()), &state).await;

        assert!(start.elapsed() >= TIMEOUT_BACKOFF * 2);
        assert_eq!(client.attempts(), 3);
        assert_eq!(state.failed_ids(), BTreeSet::from([11]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_then_success() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::new());
        client.script_failures(CHAT_ID, 12, [TransferError::Timeout]);
        let worker = worker(&client);
        let state = RunState::new();

        worker.download_one(photo(12), &resolved_chat(dir.path()), &state).await;

        assert_eq!(client.attempts(), 2);
        assert_eq!(state.downloaded_ids(), BTreeSet::from([12]));
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::new());
        client.script_failures(CHAT_ID, 9, [TransferError::Permanent("unauthorized".into())]);
        let worker = worker(&client);
        let state = RunState::new();

        assert_eq!(worker.download_one(photo(9), &resolved_chat(dir.path()), &state).await, 9);

        assert_eq!(client.attempts(), 1);
        assert_eq!(state.failed_ids(), BTreeSet::from([9]));
        assert!(state.downloaded_ids().is_empty());
    }

    #[tokio::test]
    async fn test_existing_file_gets_numbered_name() {
        let dir = tempfile::tempdir().unwrap();
        let doc_dir = dir.path().join("document");
        std::fs::create_dir_all(&doc_dir).unwrap();
        std::fs::write(doc_dir.join("report.pdf"), b"old").unwrap();
        let client = Arc::new(ScriptedClient::new());
        let worker = worker(&client);
        let state = RunState::new();

        worker
            .download_one(document(3, "report.pdf", "application/pdf"), &resolved_chat(dir.path()), &state)
            .await;

        assert_eq!(std::fs::read(doc_dir.join("report.pdf")).unwrap(), b"old");
        assert!(doc_dir.join("report (1).pdf").is_file());
        assert_eq!(state.downloaded_ids(), BTreeSet::from([3]));
    }

    #[tokio::test]
    async fn test_identical_redownload_is_deduplicated() {
        let dir = tempfile::tempdir().unwrap();
        let doc_dir = dir.path().join("document");
        std::fs::create_dir_all(&doc_dir).unwrap();
        // Same bytes the scripted client writes for message 3.
        std::fs::write(doc_dir.join("report.pdf"), format!("{}:3\n", CHAT_ID)).unwrap();
        let client = Arc::new(ScriptedClient::new());
        let history = Arc::new(JsonlHistory::new(dir.path().join("history.jsonl")));
        let worker = worker(&client).with_history(Arc::clone(&history) as Arc<dyn HistoryPort>);
        let state = RunState::new();

        worker
            .download_one(document(3, "report.pdf", "application/pdf"), &resolved_chat(dir.path()), &state)
            .await;

        assert_eq!(client.completed(), 1);
        assert!(!doc_dir.join("report (1).pdf").exists());
        assert!(doc_dir.join("report.pdf").is_file());
        assert_eq!(state.downloaded_ids(), BTreeSet::from([3]));
        let recent = history.recent(1).await.unwrap();
        assert_eq!(recent[0].file_path, doc_dir.join("report.pdf"));
    }

    #[tokio::test]
    async fn test_same_content() {
        let dir = tempfile::tempdir().unwrap();
        let (a, b, c) = (dir.path().join("a"), dir.path().join("b"), dir.path().join("c"));
        let long = vec![7u8; COMPARE_CHUNK * 2 + 5];
        std::fs::write(&a, &long).unwrap();
        std::fs::write(&b, &long).unwrap();
        let mut changed = long.clone();
        changed[COMPARE_CHUNK + 1] = 8;
        std::fs::write(&c, &changed).unwrap();

        assert!(same_content(&a, &b).await.unwrap());
        assert!(!same_content(&a, &c).await.unwrap());
        assert!(!same_content(&a, &dir.path().join("missing")).await.unwrap());
    }
}
