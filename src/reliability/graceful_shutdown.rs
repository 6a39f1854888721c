//! Graceful shutdown handling.
//!
//! A single [`GracefulShutdown`] is created per process. The HTTP server and the
//! queue consumer each hold a [`ShutdownGuard`]; the consumer checks its guard
//! only between messages so an in-flight delivery is always acked or nacked
//! before the loop exits.

use tokio::signal;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Handle for managing graceful shutdown.
#[derive(Clone)]
pub struct GracefulShutdown {
    /// Sender for shutdown signal.
    shutdown_tx: broadcast::Sender<()>,
}

impl GracefulShutdown {
    /// Create a new graceful shutdown handler.
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self { shutdown_tx }
    }

    /// Get a receiver for shutdown signals.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Create a guard for a named component.
    pub fn guard(&self, name: impl Into<String>) -> ShutdownGuard {
        ShutdownGuard::new(name, self)
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        info!("Initiating graceful shutdown");
        if let Err(e) = self.shutdown_tx.send(()) {
            debug!("No component was listening for shutdown: {}", e);
        }
    }

    /// Spawn a task that triggers shutdown on SIGINT or SIGTERM.
    pub fn listen_for_signals(&self) {
        let handler = self.clone();

        tokio::spawn(async move {
            let ctrl_c = async {
                if let Err(e) = signal::ctrl_c().await {
                    error!("Failed to install Ctrl+C handler: {}", e);
                    std::future::pending::<()>().await;
                }
            };

            #[cfg(unix)]
            let terminate = async {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut stream) => {
                        stream.recv().await;
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
                _ = ctrl_c => info!("Received Ctrl+C signal"),
                _ = terminate => info!("Received SIGTERM signal"),
            }

            handler.shutdown();
        });
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// A component's subscription to the shutdown signal.
pub struct ShutdownGuard {
    name: String,
    shutdown_rx: broadcast::Receiver<()>,
    triggered: bool,
}

impl ShutdownGuard {
    /// Create a new shutdown guard for a component.
    pub fn new(name: impl Into<String>, shutdown_handler: &GracefulShutdown) -> Self {
        Self {
            name: name.into(),
            shutdown_rx: shutdown_handler.subscribe(),
            triggered: false,
        }
    }

    /// Whether shutdown has been observed by this guard.
    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    /// Wait for the shutdown signal. Cancel safe; resolves immediately once triggered.
    pub async fn wait_for_shutdown(&mut self) {
        if self.triggered {
            return;
        }

        match self.shutdown_rx.recv().await {
            Ok(()) => {
                info!("Component '{}' received shutdown signal", self.name);
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Shutdown channel closed for component '{}'", self.name);
            }
            Err(broadcast::error::RecvError::Lagged(_)) => {
                warn!("Component '{}' lagged behind shutdown signal", self.name);
            }
        }
        self.triggered = true;
    }
}
