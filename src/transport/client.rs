//! # Client
//!
//! Connecting endpoint. The client runs the same receive state machine and
//! dispatcher as the server, so replies are routed to handlers registered on
//! the client's own [`Dispatcher`].

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::config::NetworkConfig;
use crate::core::codec::Clock;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::transport::connection::{self, ConnectionContext};
use crate::transport::session::Session;
use crate::utils::metrics::Metrics;
use crate::utils::timeout::with_timeout_error;

/// A connected client session.
#[derive(Debug)]
pub struct Client {
    session: Arc<Session>,
    metrics: Arc<Metrics>,
    task: JoinHandle<()>,
}

impl Client {
    /// Connect to `config.client.address` within the configured connection timeout.
    #[instrument(skip(config, dispatcher), fields(address = %config.client.address))]
    pub async fn connect(config: &NetworkConfig, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        Self::connect_inner(config, dispatcher, Arc::new(Utc::now)).await
    }

    /// Connect to `server_address:port` with default settings.
    pub async fn start(server_address: &str, port: u16, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        let config = NetworkConfig::default_with_overrides(|c| {
            c.client.address = format!("{server_address}:{port}");
        });
        Self::connect(&config, dispatcher).await
    }

    /// Connect using `clock` to key the header cipher.
    pub async fn connect_with_clock<F>(
        config: &NetworkConfig,
        dispatcher: Arc<Dispatcher>,
        clock: F,
    ) -> Result<Self>
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self::connect_inner(config, dispatcher, Arc::new(clock)).await
    }

    async fn connect_inner(
        config: &NetworkConfig,
        dispatcher: Arc<Dispatcher>,
        clock: Clock,
    ) -> Result<Self> {
        let problems = config.client.validate();
        if !problems.is_empty() {
            return Err(ProtocolError::ConfigError(problems.join("; ")));
        }

        let stream = with_timeout_error(
            async { Ok(TcpStream::connect(&config.client.address).await?) },
            config.client.connection_timeout,
        )
        .await?;
        let peer = stream.peer_addr()?;

        let mut context =
            ConnectionContext::from_config(dispatcher, config, config.client.frame_timeout);
        context.clock = clock;
        let metrics = Arc::clone(&context.metrics);

        let (session, task) = connection::open(stream, peer, Arc::new(context))?;
        info!(session_id = %session.id(), peer = %peer, "Connected");

        Ok(Self {
            session,
            metrics,
            task,
        })
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn peer(&self) -> SocketAddr {
        self.session.peer()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Queue `packet` for the server.
    pub fn send(&self, packet: Packet) -> Result<()> {
        self.session.send(packet)
    }

    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Close the connection after queued packets are written, and wait for it.
    pub async fn close(self) {
        self.session.close();
        let _ = self.task.await;
    }

    /// Wait until the connection ends from either side.
    pub async fn closed(self) {
        let _ = self.task.await;
    }
}
