use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use eyre::Result;
use tokio::{signal, sync::broadcast};

/// Represents different shutdown reasons
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Graceful shutdown requested (SIGTERM, SIGINT)
    Graceful,
    /// Force shutdown (timeout exceeded)
    Force,
}

/// Coordinates graceful shutdown: listens for OS signals, broadcasts a
/// shutdown reason to subscribers and bounds the drain period.
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    shutdown_initiated: Arc<AtomicBool>,
    shutdown_timeout: Duration,
}

impl GracefulShutdown {
    /// Create a new manager with the default 30-second drain timeout.
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a new manager with a custom drain timeout.
    pub fn with_timeout(shutdown_timeout: Duration) -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            shutdown_timeout,
        }
    }

    /// Get a receiver for shutdown signals.
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    /// Check if shutdown has been initiated.
    pub fn is_shutdown_initiated(&self) -> bool {
        self.shutdown_initiated.load(Ordering::Relaxed)
    }

    /// Maximum time the caller should wait for in-flight work to drain.
    pub fn drain_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Manually trigger shutdown (used by tests and the force path).
    pub fn trigger_shutdown(&self, reason: ShutdownReason) {
        if self
            .shutdown_initiated
            .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
            .is_ok()
        {
            tracing::info!(?reason, "shutdown triggered");
            let _ = self.shutdown_tx.send(reason);
        }
    }

    /// Listen for OS signals and broadcast the first shutdown request.
    pub async fn run_signal_handler(&self) -> Result<()> {
        tracing::info!("signal handler started, listening for SIGTERM and SIGINT");

        tokio::select! {
            _ = signal::ctrl_c() => {
                tracing::info!("received SIGINT, initiating graceful shutdown");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("received SIGTERM, initiating graceful shutdown");
            }
        }
        self.trigger_shutdown(ShutdownReason::Graceful);
        Ok(())
    }

    /// Resolve once a shutdown has been requested, returning the reason.
    pub async fn wait_for_shutdown_signal(&self) -> ShutdownReason {
        if self.is_shutdown_initiated() {
            return ShutdownReason::Graceful;
        }
        let mut rx = self.subscribe();
        rx.recv().await.unwrap_or(ShutdownReason::Force)
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to register SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    // Only Ctrl+C is available on non-Unix platforms.
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_trigger_shutdown_broadcasts_once() {
        let shutdown = GracefulShutdown::new();
        let mut rx = shutdown.subscribe();

        shutdown.trigger_shutdown(ShutdownReason::Graceful);
        shutdown.trigger_shutdown(ShutdownReason::Force);

        assert_eq!(rx.recv().await.unwrap(), ShutdownReason::Graceful);
        assert!(rx.try_recv().is_err());
        assert!(shutdown.is_shutdown_initiated());
    }

    #[tokio::test]
    async fn test_wait_for_shutdown_signal_resolves() {
        let shutdown = Arc::new(GracefulShutdown::new());
        let waiter = shutdown.clone();
        let handle = tokio::spawn(async move { waiter.wait_for_shutdown_signal().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.trigger_shutdown(ShutdownReason::Graceful);

        assert_eq!(handle.await.unwrap(), ShutdownReason::Graceful);
    }
}
