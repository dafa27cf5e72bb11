//! Batch coordinator: one pagination batch through the pacing gate, all at once.

use crate::domain::{Message, ResolvedChat, RunState};
use crate::usecases::media_worker::MediaWorker;
use crate::usecases::pacing::PacingGate;
use futures::future::join_all;

/// Download every message of the batch concurrently and wait for all of them.
///
/// Returns the highest message id of the batch (`None` for an empty batch). Failed items
/// still count: failures are tracked in `state`, not by holding the watermark back.
pub async fn run_batch(
    worker: &MediaWorker,
    gate: &PacingGate,
    messages: Vec<Message>,
    chat: &ResolvedChat,
    state: &RunState,
) -> Option<i32> {
    let downloads = messages.into_iter().map(|message| async move {
        let _permit = gate.admit().await;
        worker.download_one(message, chat, state).await
    });
    join_all(downloads).await.into_iter().max()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::remote::ScriptedClient;
    use crate::domain::TransferError;
    use crate::ports::RemoteClient;
    use crate::usecases::pacing::DownloadDelay;
    use crate::usecases::test_support::{CHAT_ID, photo, resolved_chat, text};
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_never_exceeds_limit() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::with_latency(Duration::from_millis(200)));
        let worker = MediaWorker::new(Arc::clone(&client) as Arc<dyn RemoteClient>);
        let gate = PacingGate::new(3, None);
        let state = RunState::new();

        let max = run_batch(
            &worker,
            &gate,
            (1..=12).map(photo).collect(),
            &resolved_chat(dir.path()),
            &state,
        )
        .await;

        assert_eq!(max, Some(12));
        assert_eq!(client.completed(), 12);
        assert_eq!(client.peak_in_flight(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_applies_to_every_download() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::new());
        let worker = MediaWorker::new(Arc::clone(&client) as Arc<dyn RemoteClient>);
        let gate = PacingGate::new(1, Some(DownloadDelay::Fixed(Duration::from_secs(2))));
        let state = RunState::new();

        let start = tokio::time::Instant::now();
        run_batch(&worker, &gate, (1..=3).map(photo).collect(), &resolved_chat(dir.path()), &state).await;

        assert!(start.elapsed() >= Duration::from_secs(6));
        assert_eq!(client.completed(), 3);
    }

    #[tokio::test]
    async fn test_max_id_ignores_failures() {
        let dir = tempfile::tempdir().unwrap();
        let client = Arc::new(ScriptedClient::new());
        client.script_failures(CHAT_ID, 20, [TransferError::Permanent("forbidden".into())]);
        let worker = MediaWorker::new(Arc::clone(&client) as Arc<dyn RemoteClient>);
        let gate = PacingGate::new(4, None);
        let state = RunState::new();

        let messages = vec![photo(17), text(18), photo(19), photo(20)];
        let max = run_batch(&worker, &gate, messages, &resolved_chat(dir.path()), &state).await;

        assert_eq!(max, Some(20));
        assert_eq!(state.downloaded_ids(), BTreeSet::from([17, 19]));
        assert_eq!(state.failed_ids(), BTreeSet::from([20]));
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let dir = tempfile::tempdir().unwrap();
        let client: Arc<dyn RemoteClient> = Arc::new(ScriptedClient::new());
        let worker = MediaWorker::new(client);
        let gate = PacingGate::new(1, None);
        let max = run_batch(&worker, &gate, Vec::new(), &resolved_chat(dir.path()), &RunState::new()).await;
        assert_eq!(max, None);
    }
}
