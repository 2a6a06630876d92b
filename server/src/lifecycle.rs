//! Application lifecycle and graceful shutdown.
//!
//! 1. Startup: spawn the expiry sweeper and the metrics server
//! 2. Runtime: serve HTTP and WebSocket traffic
//! 3. Shutdown: on Ctrl+C or SIGTERM stop accepting connections, signal the
//!    background tasks and wait for them with a timeout
//!
//! Holds are in memory; they do not survive a restart.

use crate::config::Config;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// A running server with its background tasks.
pub struct Application {
    listener: TcpListener,
    app: axum::Router,
    handles: Vec<(&'static str, JoinHandle<()>)>,
    shutdown_tx: broadcast::Sender<()>,
    config: Config,
}

impl Application {
    /// Create an application.
    ///
    /// `handles` are background tasks that stop when `shutdown_tx` fires.
    #[must_use]
    pub fn new(
        listener: TcpListener,
        app: axum::Router,
        handles: Vec<(&'static str, JoinHandle<()>)>,
        shutdown_tx: broadcast::Sender<()>,
        config: Config,
    ) -> Self {
        Self {
            listener,
            app,
            handles,
            shutdown_tx,
            config,
        }
    }

    /// Serve until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        info!(address = %self.config.bind_address(), "HTTP server listening for requests");

        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("HTTP server stopped, initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(());

        let timeout = Duration::from_secs(self.config.server.shutdown_timeout);
        for (name, handle) in self.handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => info!(task = name, "Background task stopped gracefully"),
                Ok(Err(e)) => warn!(task = name, error = %e, "Background task failed"),
                Err(_) => warn!(task = name, "Background task shutdown timed out"),
            }
        }

        info!("Graceful shutdown complete");
        Ok(())
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
