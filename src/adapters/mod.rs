//! Infrastructure adapters. Implement outbound ports.
//!
//! Filesystem stores, progress display, remote client. Map errors to DomainError.

pub mod persistence;
pub mod remote;
pub mod ui;
