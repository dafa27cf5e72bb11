//! Remote client implementations. The network-backed client lives in the host application.

pub mod scripted;

pub use scripted::ScriptedClient;
