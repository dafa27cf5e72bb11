//! Port traits. API boundaries for the hexagon.
//!
//! Outbound only: the orchestrator calls into infrastructure through these.

pub mod outbound;

pub use outbound::{
    ConfigStore, HistoryPort, HistoryQuery, ProgressCallback, ProgressPort, RemoteClient,
};
