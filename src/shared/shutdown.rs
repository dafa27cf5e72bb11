//! Graceful shutdown coordinator.
//!
//! The first SIGINT (Ctrl+C) or SIGTERM cancels a [`CancellationToken`]; chats
//! then persist their safe resume point and stop. A second signal force-exits.

use std::sync::atomic::{AtomicU32, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Exit code used on a forced exit (128 + SIGINT).
pub const FORCE_EXIT_CODE: i32 = 130;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAction {
    /// First signal: cancel and let the run checkpoint.
    Cancel,
    ForceExit,
}

/// Counts received signals and cancels the token on the first one.
#[derive(Debug, Default)]
pub struct ShutdownSignal {
    token: CancellationToken,
    received: AtomicU32,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn on_signal(&self) -> SignalAction {
        if self.received.fetch_add(1, Ordering::SeqCst) == 0 {
            info!("Received shutdown signal, finishing the current batch...");
            info!("Press Ctrl+C again to force exit");
            self.token.cancel();
            SignalAction::Cancel
        } else {
            warn!("Force exit requested");
            SignalAction::ForceExit
        }
    }
}

#[cfg(unix)]
async fn next_signal(sigterm: &mut Option<tokio::signal::unix::Signal>) {
    match sigterm {
        Some(sigterm) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = sigterm.recv() => {}
            }
        }
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Spawn the signal listener and return the token it cancels.
///
/// Must be called from within a tokio runtime.
pub fn install_signal_handler() -> CancellationToken {
    let signal = ShutdownSignal::new();
    let token = signal.token();

    tokio::spawn(async move {
        #[cfg(unix)]
        let mut sigterm = {
            use tokio::signal::unix::{SignalKind, signal};
            signal(SignalKind::terminate())
                .inspect_err(|e| warn!(error = %e, "failed to register SIGTERM handler"))
                .ok()
        };

        loop {
            #[cfg(unix)]
            {
                next_signal(&mut sigterm).await;
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!(error = %e, "failed to listen for Ctrl+C");
                    return;
                }
            }

            if signal.on_signal() == SignalAction::ForceExit {
                std::process::exit(FORCE_EXIT_CODE);
            }
        }
    });

    token
}
