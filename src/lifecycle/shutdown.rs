//! Signal handling for graceful shutdown
//!
//! A SIGTERM or SIGINT is fanned out to every component holding a
//! receiver, so the control loop can finish its tick and close its
//! subscribers before the IPC server goes away.

use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tracing::debug;

/// Handles shutdown signals (SIGTERM, SIGINT)
pub struct ShutdownSignal {
    tx: broadcast::Sender<()>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal handler
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self { tx }
    }

    /// Receiver that fires once shutdown is triggered
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Notify every subscriber
    pub fn trigger(&self) {
        let _ = self.tx.send(());
    }

    /// Wait for a shutdown signal
    pub async fn wait(&self) -> std::io::Result<()> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                debug!("received SIGTERM");
            }
            _ = sigint.recv() => {
                debug!("received SIGINT");
            }
        }
        Ok(())
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
