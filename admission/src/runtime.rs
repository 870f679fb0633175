//! Application lifecycle management and graceful shutdown.
//!
//! 1. **Startup**: bind the listener, start the metrics exporter, spawn the
//!    expiry sweeper (which sweeps once immediately)
//! 2. **Runtime**: serve HTTP
//! 3. **Shutdown**: on Ctrl+C or SIGTERM stop accepting connections,
//!    broadcast shutdown, and wait for the sweeper with a timeout

use crate::app::Services;
use crate::config::Config;
use crate::metrics::{register_business_metrics, start_exporter};
use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Running application with all background tasks.
pub struct Application {
    listener: tokio::net::TcpListener,
    services: Services,
    shutdown_tx: broadcast::Sender<()>,
    config: Arc<Config>,
}

impl Application {
    /// Build services from `config` and bind the HTTP listener.
    ///
    /// # Errors
    ///
    /// Returns an error if any dependency fails to start or the address
    /// cannot be bound.
    pub async fn build(config: Config) -> anyhow::Result<Self> {
        let services = Services::from_config(&config).await?;
        Self::with_services(config, services).await
    }

    /// Bind the listener around already-wired services.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn with_services(config: Config, services: Services) -> anyhow::Result<Self> {
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .with_context(|| format!("binding {addr}"))?;
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(Self {
            listener,
            services,
            shutdown_tx,
            config: Arc::new(config),
        })
    }

    /// Address the HTTP listener is bound to.
    ///
    /// # Errors
    ///
    /// Returns an error if the socket has no local address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run until a shutdown signal is received.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics exporter cannot be installed or the
    /// HTTP server fails.
    pub async fn run(self) -> anyhow::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes. Used by tests to stop the server.
    ///
    /// # Errors
    ///
    /// Same as [`run`](Self::run).
    pub async fn run_until(
        self,
        signal: impl std::future::Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        register_business_metrics();
        if self.config.server.metrics_port != 0 {
            let metrics_addr: SocketAddr = format!(
                "{}:{}",
                self.config.server.metrics_host, self.config.server.metrics_port
            )
            .parse()
            .context("parsing metrics address")?;
            start_exporter(metrics_addr)?;
        }

        let sweeper_handle = self
            .services
            .sweeper
            .clone()
            .spawn(self.shutdown_tx.subscribe());

        info!(address = %self.local_addr()?, "HTTP server listening for requests");
        axum::serve(self.listener, self.services.router())
            .with_graceful_shutdown(signal)
            .await
            .context("HTTP server failed")?;

        info!("HTTP server stopped, initiating graceful shutdown...");
        let _ = self.shutdown_tx.send(());

        let timeout = Duration::from_secs(self.config.server.shutdown_timeout);
        match tokio::time::timeout(timeout, sweeper_handle).await {
            Ok(Ok(())) => info!("Expiry sweeper stopped gracefully"),
            Ok(Err(e)) => warn!(error = %e, "Expiry sweeper task failed"),
            Err(_) => warn!("Expiry sweeper shutdown timed out"),
        }

        info!("Graceful shutdown complete");
        Ok(())
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("listener", &self.listener.local_addr().ok())
            .finish_non_exhaustive()
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
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
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        () = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
