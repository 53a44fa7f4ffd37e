//! Stop signal shared by a node's background tasks.
//!
//! The flag is latched in a `tokio::sync::watch` channel, so a poll
//! watcher spawned after the node began stopping still sees it.

use tokio::signal;
use tokio::sync::watch;

#[derive(Clone)]
pub struct ShutdownController {
    tx: watch::Sender<bool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    /// Latch the stop flag. Later calls are no-ops.
    pub fn trigger(&self) {
        self.tx.send_if_modified(|stopped| !std::mem::replace(stopped, true));
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`trigger`](Self::trigger) has been called, immediately
    /// if it already was.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Wait for SIGINT or SIGTERM, then trigger.
    pub async fn wait_for_signal(&self) {
        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = signal::ctrl_c() => tracing::info!(signal = "SIGINT", "stopping node"),
            _ = terminate => tracing::info!(signal = "SIGTERM", "stopping node"),
            _ = self.triggered() => return,
        }
        self.trigger();
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}
