//! # Server
//!
//! Listener and accept loop. Each accepted stream becomes a [`Session`] in the
//! server's [`SessionRegistry`] with its own receive and send tasks.
//!
//! ```no_run
//! use std::sync::Arc;
//! use strata_protocol::protocol::dispatcher::Dispatcher;
//! use strata_protocol::protocol::opcodes::PING;
//! use strata_protocol::transport::server::Server;
//!
//! # async fn run() -> strata_protocol::error::Result<()> {
//! let dispatcher = Arc::new(Dispatcher::new());
//! dispatcher.register(PING, |session, mut packet| {
//!     tracing::info!(session = %session.id(), text = %packet.read_string()?, "ping");
//!     Ok(())
//! })?;
//!
//! let server = Server::start("0.0.0.0", 1447, dispatcher).await?;
//! server.run().await
//! # }
//! ```
//!
//! [`Session`]: crate::transport::session::Session

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::config::NetworkConfig;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::transport::connection::{self, ConnectionContext};
use crate::transport::registry::SessionRegistry;
use crate::utils::metrics::Metrics;

/// A bound, not yet running, listener.
#[derive(Debug)]
pub struct Server {
    listener: TcpListener,
    context: ConnectionContext,
    registry: Arc<SessionRegistry>,
    max_connections: usize,
    shutdown_timeout: Duration,
}

impl Server {
    /// Bind using every server and transport setting in `config`.
    #[instrument(skip(config, dispatcher), fields(address = %config.server.address))]
    pub async fn bind(config: &NetworkConfig, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        config.validate_strict()?;

        let listener = TcpListener::bind(&config.server.address).await?;
        let registry = Arc::new(SessionRegistry::new());
        let mut context =
            ConnectionContext::from_config(dispatcher, config, config.server.frame_timeout);
        context.registry = Some(Arc::clone(&registry));

        info!(address = %listener.local_addr()?, "Listening");
        Ok(Self {
            listener,
            context,
            registry,
            max_connections: config.server.max_connections,
            shutdown_timeout: config.server.shutdown_timeout,
        })
    }

    /// Bind to `bind_address:port` with default settings.
    pub async fn start(bind_address: &str, port: u16, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.server.address = format!("{bind_address}:{port}");
        });
        Self::bind(&config, dispatcher).await
    }

    /// Replace the clock that keys the header cipher for every session.
    pub fn with_clock<F>(mut self, clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.context.clock = Arc::new(clock);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.context.metrics
    }

    /// Accept connections until Ctrl-C.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>(1);

        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                info!("Received CTRL+C signal, shutting down");
                let _ = shutdown_tx.send(()).await;
            }
        });

        self.run_with_shutdown(shutdown_rx).await
    }

    /// Accept connections until `shutdown_rx` yields or every sender is dropped,
    /// then close all sessions and wait up to the shutdown timeout for them.
    #[instrument(skip(self, shutdown_rx), fields(address = ?self.listener.local_addr().ok()))]
    pub async fn run_with_shutdown(self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        let context = Arc::new(self.context);
        let mut connections: Vec<JoinHandle<()>> = Vec::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(sessions = self.registry.len(), "Shutting down server. Waiting for sessions to close...");
                    break;
                }

                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            connections.retain(|handle| !handle.is_finished());
                            if self.registry.len() >= self.max_connections {
                                warn!(peer = %peer, limit = self.max_connections, "Connection limit reached, refusing peer");
                                drop(stream);
                                continue;
                            }
                            match connection::open(stream, peer, Arc::clone(&context)) {
                                Ok((_, handle)) => connections.push(handle),
                                Err(e) => {
                                    context.metrics.connection_error();
                                    warn!(peer = %peer, error = %e, "Failed to open session");
                                }
                            }
                        }
                        Err(e) => {
                            context.metrics.connection_error();
                            error!(error = %e, "Error accepting connection");
                        }
                    }
                }
            }
        }

        self.registry.close_all()?;
        let drained = tokio::time::timeout(
            self.shutdown_timeout,
            futures::future::join_all(connections),
        )
        .await;

        match drained {
            Ok(_) => info!("All sessions closed, shutting down"),
            Err(_) => {
                warn!(remaining = self.registry.len(), "Shutdown timeout reached, forcing exit");
                return Err(ProtocolError::Timeout);
            }
        }
        context.metrics.log_metrics();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_binds_ephemeral_port() {
        let server = Server::start("127.0.0.1", 0, Arc::new(Dispatcher::new()))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        assert_ne!(addr.port(), 0);
        assert!(server.registry().is_empty());
    }

    #[tokio::test]
    async fn shutdown_signal_stops_idle_server() {
        let server = Server::start("127.0.0.1", 0, Arc::new(Dispatcher::new()))
            .await
            .unwrap();
        let (tx, rx) = mpsc::channel(1);
        let running = tokio::spawn(server.run_with_shutdown(rx));
        tx.send(()).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .expect("server stopped")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn bind_rejects_invalid_config() {
        let config = NetworkConfig::default_with_overrides(|c| c.server.max_connections = 0);
        let result = Server::bind(&config, Arc::new(Dispatcher::new())).await;
        assert!(matches!(result, Err(ProtocolError::ConfigError(_))));
    }
}
