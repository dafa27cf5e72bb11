//! Cross-cutting runtime concerns: process settings, tracing, shutdown.

pub mod config;
pub mod logging;
pub mod shutdown;
