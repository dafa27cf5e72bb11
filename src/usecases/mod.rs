//! Application use cases. Orchestrate domain logic via ports.

pub mod batch;
pub mod checkpoint;
pub mod driver;
pub mod media_worker;
pub mod naming;
pub mod pacing;
pub mod sync_service;

#[cfg(test)]
pub(crate) mod test_support;

pub use batch::run_batch;
pub use checkpoint::CheckpointStore;
pub use driver::{ChatError, DownloadDriver, RunReport};
pub use media_worker::MediaWorker;
pub use naming::TargetResolver;
pub use pacing::PacingGate;
pub use sync_service::{ChatReport, SyncService};
