//! Signal handling for graceful shutdown
//!
//! Ctrl-C and SIGTERM are turned into a broadcast so a prefetch worker can
//! finish its current request before exiting.

use tokio::signal;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Signal handler for graceful shutdown coordination
pub struct SignalHandler {
    shutdown_tx: broadcast::Sender<()>,
}

impl SignalHandler {
    /// Create a new signal handler with the given shutdown broadcaster
    pub fn new(shutdown_tx: broadcast::Sender<()>) -> Self {
        Self { shutdown_tx }
    }

    /// Spawn a task that broadcasts shutdown on Ctrl-C or SIGTERM
    pub fn setup(&self) -> JoinHandle<()> {
        let shutdown_tx = self.shutdown_tx.clone();

        tokio::spawn(async move {
            let ctrl_c = async {
                match signal::ctrl_c().await {
                    Ok(()) => info!("Ctrl+C signal received"),
                    Err(e) => {
                        error!("Failed to install Ctrl+C handler: {}", e);
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
                        error!("Failed to install SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            };

            #[cfg(not(unix))]
            let terminate = std::future::pending::<()>();

            tokio::select! {
                _ = ctrl_c => {},
                _ = terminate => {},
            }

            info!("Initiating shutdown, finishing current prefetch");
            let _ = shutdown_tx.send(());
        })
    }
}

/// Create a shutdown signal broadcaster
pub fn create_shutdown_channel() -> (broadcast::Sender<()>, broadcast::Receiver<()>) {
    broadcast::channel(1)
}
