//! Scripted remote client for dry runs and testing without a network session.
//!
//! Serves an in-memory history per chat, fails transfers according to a per-message
//! script, and writes a small placeholder file for every successful transfer.

use crate::domain::{DomainError, Message, TransferError};
use crate::ports::{HistoryQuery, ProgressCallback, RemoteClient};
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// In-memory `RemoteClient`.
///
/// Counters (`attempts`, `completed`, `peak_in_flight`, ...) let callers observe
/// what the orchestrator did.
#[derive(Default)]
pub struct ScriptedClient {
    history: Mutex<BTreeMap<i64, BTreeMap<i32, Message>>>,
    failures: Mutex<HashMap<(i64, i32), VecDeque<TransferError>>>,
    queries: Mutex<Vec<HistoryQuery>>,
    /// Simulated transfer time.
    latency: Duration,
    connected: AtomicBool,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    attempts: AtomicUsize,
    completed: AtomicUsize,
    refetches: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a client whose transfers take `latency` each.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Add (or replace) messages in a chat's history.
    pub fn add_messages(&self, chat_id: i64, messages: impl IntoIterator<Item = Message>) {
        let mut history = lock(&self.history);
        let chat = history.entry(chat_id).or_default();
        for message in messages {
            chat.insert(message.id, message);
        }
    }

    /// Make the next transfers of one message fail, in order. Later attempts succeed.
    pub fn script_failures(
        &self,
        chat_id: i64,
        message_id: i32,
        failures: impl IntoIterator<Item = TransferError>,
    ) {
        lock(&self.failures)
            .entry((chat_id, message_id))
            .or_default()
            .extend(failures);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Transfer attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Successful transfers.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    /// Highest number of transfers observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// `get_messages` calls.
    pub fn refetches(&self) -> usize {
        self.refetches.load(Ordering::SeqCst)
    }

    /// History queries received so far.
    pub fn queries(&self) -> Vec<HistoryQuery> {
        lock(&self.queries).clone()
    }

    fn next_failure(&self, chat_id: i64, message_id: i32) -> Option<TransferError> {
        lock(&self.failures)
            .get_mut(&(chat_id, message_id))
            .and_then(VecDeque::pop_front)
    }

    async fn transfer(
        &self,
        message: &Message,
        destination: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<Option<PathBuf>, TransferError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        if let Some(failure) = self.next_failure(message.chat_id, message.id) {
            return Err(failure);
        }
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransferError::Permanent(format!("create dir: {}", e)))?;
        }
        let body = format!("{}:{}\n", message.chat_id, message.id);
        tokio::fs::write(destination, body.as_bytes())
            .await
            .map_err(|e| TransferError::Permanent(format!("write file: {}", e)))?;
        if let Some(progress) = progress {
            let len = body.len() as u64;
            progress(len, len);
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(Some(destination.to_path_buf()))
    }
}

#[async_trait::async_trait]
impl RemoteClient for ScriptedClient {
    async fn start(&self) -> Result<(), DomainError> {
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), DomainError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn iter_messages(&self, query: HistoryQuery) -> BoxStream<'_, Result<Message, DomainError>> {
        let mut messages: Vec<Message> = lock(&self.history)
            .get(&query.chat_id)
            .map(|chat| {
                chat.values()
                    .filter(|m| m.id > query.min_id)
                    .filter(|m| query.offset_date.is_none_or(|start| m.date >= start))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if !query.reverse {
            messages.reverse();
        }
        debug!(chat_id = query.chat_id, min_id = query.min_id, count = messages.len(), "[SCRIPTED] history");
        lock(&self.queries).push(query);
        stream::iter(messages.into_iter().map(Ok)).boxed()
    }

    async fn get_messages(&self, chat_id: i64, ids: &[i32]) -> Result<Vec<Message>, DomainError> {
        self.refetches.fetch_add(1, Ordering::SeqCst);
        let history = lock(&self.history);
        let chat = history.get(&chat_id);
        Ok(ids
            .iter()
            .filter_map(|id| chat.and_then(|c| c.get(id)).cloned())
            .collect())
    }

    async fn download_media(
        &self,
        message: &Message,
        destination: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<Option<PathBuf>, TransferError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.transfer(message, destination, progress).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::usecases::test_support::{CHAT_ID, date_of, document, photo, text};

    #[tokio::test]
    async fn test_history_respects_min_id_and_order() {
        let client = ScriptedClient::new();
        client.add_messages(CHAT_ID, (1..=5).map(text));

        let query = HistoryQuery {
            chat_id: CHAT_ID,
            min_id: 2,
            reverse: true,
            offset_date: None,
        };
        let ids: Vec<i32> = client
            .iter_messages(query.clone())
            .map(|m| m.unwrap().id)
            .collect()
            .await;
        assert_eq!(ids, vec![3, 4, 5]);

        let newest_first: Vec<i32> = client
            .iter_messages(HistoryQuery {
                reverse: false,
                offset_date: Some(date_of(4)),
                ..query
            })
            .map(|m| m.unwrap().id)
            .collect()
            .await;
        assert_eq!(newest_first, vec![5, 4]);
        assert_eq!(client.queries().len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_failures_then_success() {
        let dir = tempfile::tempdir().unwrap();
        let client = ScriptedClient::new();
        let message = photo(1);
        client.script_failures(CHAT_ID, 1, [TransferError::Timeout]);

        let dest = dir.path().join("photo").join("p");
        let first = client.download_media(&message, &dest, None).await;
        assert_eq!(first, Err(TransferError::Timeout));
        let second = client.download_media(&message, &dest, None).await;
        assert_eq!(second, Ok(Some(dest.clone())));
        assert!(dest.is_file());
        assert_eq!(client.attempts(), 2);
        assert_eq!(client.completed(), 1);
        assert_eq!(client.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn test_get_messages_skips_missing_ids() {
        let client = ScriptedClient::new();
        client.add_messages(CHAT_ID, [document(4, "a.pdf", "application/pdf"), text(6)]);
        let found = client.get_messages(CHAT_ID, &[4, 5, 6]).await.unwrap();
        assert_eq!(found.iter().map(|m| m.id).collect::<Vec<_>>(), vec![4, 6]);
        assert_eq!(client.refetches(), 1);
    }
}
