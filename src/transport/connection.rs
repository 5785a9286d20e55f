//! # Connection Tasks
//!
//! Drives one TCP stream for one [`Session`]:
//!
//! - **Receiver**: reads into a buffer sized by `receive_buffer_size`, feeds the
//!   [`PacketCodec`] decoder, and hands every completed packet to the
//!   dispatcher. Once a frame's first byte arrives, the whole frame must
//!   complete within `frame_timeout`.
//! - **Sender**: drains the session's outbound queue through the codec's
//!   encoder. An oversized packet is dropped with a warning; a socket error
//!   closes the session.
//!
//! When either side stops, the session is closed, removed from the registry
//! and counted out of the metrics.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use futures::SinkExt;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::{Decoder, FramedWrite};
use tracing::{debug, info, trace, warn};

use crate::config::{NetworkConfig, MAX_BODY_SIZE, RECEIVE_BUFFER_SIZE};
use crate::core::codec::{Clock, PacketCodec};
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::opcodes;
use crate::transport::registry::SessionRegistry;
use crate::transport::session::Session;
use crate::utils::metrics::Metrics;
use crate::utils::timeout::FRAME_TIMEOUT;

/// Everything a connection task needs besides its socket.
#[derive(Clone)]
pub struct ConnectionContext {
    pub dispatcher: Arc<Dispatcher>,
    pub metrics: Arc<Metrics>,
    /// Present on servers; clients track their single session themselves
    pub registry: Option<Arc<SessionRegistry>>,
    pub frame_timeout: Duration,
    pub receive_buffer_size: usize,
    pub max_body_size: usize,
    pub clock: Clock,
}

impl ConnectionContext {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            metrics: Arc::new(Metrics::new()),
            registry: None,
            frame_timeout: FRAME_TIMEOUT,
            receive_buffer_size: RECEIVE_BUFFER_SIZE,
            max_body_size: MAX_BODY_SIZE,
            clock: Arc::new(chrono::Utc::now),
        }
    }

    /// Take buffer sizes and limits from `config`. `frame_timeout` is the
    /// caller's choice since servers and clients configure it separately.
    pub fn from_config(
        dispatcher: Arc<Dispatcher>,
        config: &NetworkConfig,
        frame_timeout: Duration,
    ) -> Self {
        Self {
            frame_timeout,
            receive_buffer_size: config.transport.receive_buffer_size,
            max_body_size: config.transport.max_body_size,
            ..Self::new(dispatcher)
        }
    }

    fn codec(&self) -> PacketCodec {
        PacketCodec::new()
            .with_max_body_size(self.max_body_size)
            .with_shared_clock(Arc::clone(&self.clock))
    }
}

impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("dispatcher", &self.dispatcher)
            .field("registered", &self.registry.is_some())
            .field("frame_timeout", &self.frame_timeout)
            .field("receive_buffer_size", &self.receive_buffer_size)
            .field("max_body_size", &self.max_body_size)
            .finish()
    }
}

/// Create a session for `stream`, register it, and spawn its tasks.
///
/// The returned handle completes after the session has been cleaned up.
pub fn open(
    stream: TcpStream,
    peer: SocketAddr,
    ctx: Arc<ConnectionContext>,
) -> Result<(Arc<Session>, JoinHandle<()>)> {
    stream.set_nodelay(true)?;
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let session = Arc::new(Session::new(peer, outbound_tx));

    if let Some(registry) = &ctx.registry {
        registry.register(Arc::clone(&session))?;
    }
    ctx.metrics.session_opened();
    info!(session_id = %session.id(), peer = %peer, "Session opened");

    let task_session = Arc::clone(&session);
    let handle = tokio::spawn(async move {
        let (read_half, write_half) = stream.into_split();
        let writer = FramedWrite::new(write_half, ctx.codec());
        let send_task = tokio::spawn(send_loop(
            writer,
            outbound_rx,
            Arc::clone(&task_session),
            Arc::clone(&ctx.metrics),
        ));

        let received = receive_loop(read_half, &task_session, &ctx).await;
        task_session.close();
        let sent = send_task
            .await
            .unwrap_or_else(|e| Err(ProtocolError::Custom(e.to_string())));

        finish(&task_session, &ctx, received.and(sent));
    });

    Ok((session, handle))
}

async fn receive_loop(
    mut read_half: OwnedReadHalf,
    session: &Arc<Session>,
    ctx: &ConnectionContext,
) -> Result<()> {
    let mut codec = ctx.codec();
    let mut buf = BytesMut::with_capacity(ctx.receive_buffer_size);
    // Set when a frame's first byte arrives, cleared when the frame completes
    let mut frame_deadline: Option<Instant> = None;

    loop {
        while let Some(packet) = codec.decode(&mut buf)? {
            frame_deadline = None;
            deliver(session, ctx, packet)?;
        }

        if codec.is_mid_frame() || !buf.is_empty() {
            frame_deadline.get_or_insert_with(|| Instant::now() + ctx.frame_timeout);
        } else {
            frame_deadline = None;
        }

        buf.reserve(ctx.receive_buffer_size);
        let read = tokio::select! {
            _ = session.closed() => return Ok(()),
            read = read_chunk(&mut read_half, &mut buf, frame_deadline) => read?,
        };

        if read == 0 {
            if let Some(packet) = codec.decode_eof(&mut buf)? {
                deliver(session, ctx, packet)?;
            }
            debug!(session_id = %session.id(), "Peer closed the connection");
            return Ok(());
        }
        trace!(session_id = %session.id(), bytes = read, stage = ?codec.stage(), "Read chunk");
    }
}

async fn read_chunk(
    read_half: &mut OwnedReadHalf,
    buf: &mut BytesMut,
    frame_deadline: Option<Instant>,
) -> Result<usize> {
    match frame_deadline {
        Some(deadline) => tokio::time::timeout_at(deadline, read_half.read_buf(buf))
            .await
            .map_err(|_| ProtocolError::Timeout)?
            .map_err(ProtocolError::from),
        None => Ok(read_half.read_buf(buf).await?),
    }
}

fn deliver(session: &Arc<Session>, ctx: &ConnectionContext, packet: Packet) -> Result<()> {
    let packet_type = packet.packet_type();
    ctx.metrics.packet_received(packet.body_len() as u64);
    debug!(
        session_id = %session.id(),
        packet_type,
        name = opcodes::name(packet_type),
        bytes = packet.body_len(),
        "Packet received"
    );

    match ctx.dispatcher.dispatch(session, packet) {
        Ok(()) => Ok(()),
        Err(e) if e.is_connection_fatal() => Err(e),
        Err(_) => {
            ctx.metrics.packet_dropped();
            Ok(())
        }
    }
}

async fn send_loop(
    mut writer: FramedWrite<OwnedWriteHalf, PacketCodec>,
    mut outbound: mpsc::UnboundedReceiver<Packet>,
    session: Arc<Session>,
    metrics: Arc<Metrics>,
) -> Result<()> {
    let result = async {
        loop {
            let packet = tokio::select! {
                biased;
                packet = outbound.recv() => match packet {
                    Some(packet) => packet,
                    None => break,
                },
                _ = session.closed() => break,
            };
            write_packet(&mut writer, &session, &metrics, packet).await?;
        }

        // Packets queued before the close still go out
        while let Ok(packet) = outbound.try_recv() {
            write_packet(&mut writer, &session, &metrics, packet).await?;
        }
        writer.close().await
    }
    .await;

    if result.is_err() {
        session.close();
    }
    result
}

async fn write_packet(
    writer: &mut FramedWrite<OwnedWriteHalf, PacketCodec>,
    session: &Session,
    metrics: &Metrics,
    packet: Packet,
) -> Result<()> {
    let packet_type = packet.packet_type();
    let wire_len = packet.wire_len();
    match writer.send(packet).await {
        Ok(()) => {
            metrics.packet_sent(wire_len as u64);
            trace!(session_id = %session.id(), packet_type, bytes = wire_len, "Packet sent");
            Ok(())
        }
        Err(ProtocolError::OversizedPacket(size)) => {
            warn!(session_id = %session.id(), packet_type, size, "Dropping oversized outbound packet");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn finish(session: &Arc<Session>, ctx: &ConnectionContext, outcome: Result<()>) {
    match outcome {
        Ok(()) => info!(session_id = %session.id(), "Session closed"),
        Err(ProtocolError::ClockSkewDecryption(reason)) => {
            ctx.metrics.protocol_error();
            warn!(
                session_id = %session.id(),
                peer = %session.peer(),
                reason = %reason,
                "Session closed: header key mismatch, check that both clocks agree on the UTC hour"
            );
        }
        Err(ProtocolError::Io(e)) => {
            ctx.metrics.connection_error();
            warn!(session_id = %session.id(), error = %e, "Session closed by socket failure");
        }
        Err(ProtocolError::ConnectionClosed) => {
            info!(session_id = %session.id(), "Session closed mid-frame by peer");
        }
        Err(e) => {
            ctx.metrics.protocol_error();
            warn!(session_id = %session.id(), error = %e, "Session closed by protocol error");
        }
    }

    ctx.metrics.session_closed();
    if let Some(registry) = &ctx.registry {
        if let Err(e) = registry.unregister(session) {
            warn!(session_id = %session.id(), error = %e, "Failed to remove session");
        }
    }
}
