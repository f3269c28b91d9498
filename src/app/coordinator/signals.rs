//! Signal handling for graceful shutdown
//!
//! Ctrl-C or SIGTERM cancels the run token. Rate-limit waits and back-off sleeps
//! return at once, the coordinator stops dispatching, and in-flight items are
//! drained before the process exits.

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancels a token when the process is asked to stop
pub struct SignalHandler {
    cancel: CancellationToken,
}

impl SignalHandler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Spawn the background task watching for CTRL-C and SIGTERM
    pub fn setup(&self) -> JoinHandle<()> {
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let ctrl_c = async {
                match signal::ctrl_c().await {
                    Ok(()) => info!("Ctrl+C signal received"),
                    Err(e) => {
                        warn!("Failed to install Ctrl+C handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
                        info!("SIGTERM signal received");
                    }
                    Err(e) => {
                        warn!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => {},
                _ = terminate => {},
                _ = cancel.cancelled() => return,
            }

            info!("Shutting down: finishing in-flight downloads");
            cancel.cancel();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    /// Test that the signal task ends once the run token is cancelled
    ///
    /// Verifies that a run finishing normally does not leave the handler
    /// waiting for a signal that never comes.
    #[tokio::test]
    async fn test_handler_exits_when_token_cancelled_elsewhere() {
        let cancel = CancellationToken::new();
        let handle = SignalHandler::new(cancel.clone()).setup();

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();

        let result = timeout(Duration::from_millis(200), handle).await;
        assert!(result.is_ok());
    }

    /// Test that setting up the handler does not cancel the token by itself
    #[tokio::test]
    async fn test_handler_does_not_cancel_on_its_own() {
        let cancel = CancellationToken::new();
        let _handle = SignalHandler::new(cancel.clone()).setup();

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!cancel.is_cancelled());
        cancel.cancel();
    }
}
