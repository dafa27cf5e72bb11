//! Per-run, per-chat bookkeeping. Never persisted.
//!
//! One `RunState` per chat per run; shared by reference between the pagination
//! loop and the concurrently running downloads of a batch.

use super::entities::ChatCursor;
use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
struct Sets {
    downloaded: BTreeSet<i32>,
    failed: BTreeSet<i32>,
    processed: BTreeSet<i32>,
    current_batch: BTreeSet<i32>,
}

#[derive(Debug, Default)]
pub struct RunState {
    sets: Mutex<Sets>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    fn sets(&self) -> MutexGuard<'_, Sets> {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the ids dispatched into the in-flight batch.
    pub fn begin_batch(&self, ids: impl IntoIterator<Item = i32>) {
        let mut sets = self.sets();
        sets.current_batch = ids.into_iter().collect();
        sets.processed.clear();
    }

    /// Clear per-batch bookkeeping once the batch has fully completed.
    pub fn finish_batch(&self) {
        let mut sets = self.sets();
        sets.current_batch.clear();
        sets.processed.clear();
    }

    pub fn mark_downloaded(&self, message_id: i32) {
        let mut sets = self.sets();
        sets.failed.remove(&message_id);
        sets.downloaded.insert(message_id);
        sets.processed.insert(message_id);
    }

    pub fn mark_failed(&self, message_id: i32) {
        let mut sets = self.sets();
        sets.failed.insert(message_id);
        sets.processed.insert(message_id);
    }

    /// Attempt finished without a transfer (no media, filtered kind or format).
    pub fn mark_skipped(&self, message_id: i32) {
        self.sets().processed.insert(message_id);
    }

    pub fn is_processed(&self, message_id: i32) -> bool {
        self.sets().processed.contains(&message_id)
    }

    pub fn downloaded_count(&self) -> usize {
        self.sets().downloaded.len()
    }

    pub fn downloaded_ids(&self) -> BTreeSet<i32> {
        self.sets().downloaded.clone()
    }

    pub fn failed_ids(&self) -> BTreeSet<i32> {
        self.sets().failed.clone()
    }

    /// Safe watermark after an interrupted batch.
    ///
    /// With unprocessed ids left in the current batch this is one below the lowest of them;
    /// with the whole batch processed it is the batch's highest id. `None` when no batch is
    /// in flight.
    pub fn resume_point(&self) -> Option<i32> {
        let sets = self.sets();
        let unprocessed_min = sets.current_batch.difference(&sets.processed).next().copied();
        match unprocessed_min {
            Some(min) => Some(min - 1),
            None => sets.current_batch.last().copied(),
        }
    }

    /// Recompute the cursor's retry queue: succeeded ids leave, failed ids join.
    pub fn reconcile(&self, cursor: &mut ChatCursor) {
        let sets = self.sets();
        let retry: BTreeSet<i32> = cursor
            .ids_to_retry
            .union(&sets.failed)
            .filter(|id| !sets.downloaded.contains(id))
            .copied()
            .collect();
        cursor.ids_to_retry = retry;
    }
}
