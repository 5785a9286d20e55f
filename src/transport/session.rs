//! # Session
//!
//! One live connection as seen by handlers and the registry: identity, remote
//! address, an outbound packet queue feeding the connection's writer task, and a
//! close signal shared by the reader and writer.
//!
//! Reassembly state is not stored here. It lives in the [`PacketCodec`] owned by
//! the connection's receive loop, the only code that ever mutates it.
//!
//! [`PacketCodec`]: crate::core::codec::PacketCodec

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicI32, Ordering};

use rand::distr::Alphanumeric;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};

/// Length of generated session identifiers
pub const SESSION_ID_LEN: usize = 16;

/// Opaque random session identity, assigned at accept/connect time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let id = rand::rng()
            .sample_iter(&Alphanumeric)
            .take(SESSION_ID_LEN)
            .map(char::from)
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A connected peer.
pub struct Session {
    id: SessionId,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Packet>,
    closed: CancellationToken,
    /// Application-assigned account slot; 0 until a handler sets it
    character_id: AtomicI32,
}

impl Session {
    /// Create a session with a fresh random identity.
    pub fn new(peer: SocketAddr, outbound: mpsc::UnboundedSender<Packet>) -> Self {
        Self::with_id(SessionId::generate(), peer, outbound)
    }

    pub fn with_id(
        id: SessionId,
        peer: SocketAddr,
        outbound: mpsc::UnboundedSender<Packet>,
    ) -> Self {
        Self {
            id,
            peer,
            outbound,
            closed: CancellationToken::new(),
            character_id: AtomicI32::new(0),
        }
    }

    /// A session whose outbound queue is returned to the caller instead of a socket.
    ///
    /// Useful for exercising handlers without a network.
    pub fn detached(peer: SocketAddr) -> (Self, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(peer, tx), rx)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn ip(&self) -> IpAddr {
        self.peer.ip()
    }

    pub fn port(&self) -> u16 {
        self.peer.port()
    }

    pub fn character_id(&self) -> i32 {
        self.character_id.load(Ordering::Acquire)
    }

    pub fn set_character_id(&self, value: i32) {
        self.character_id.store(value, Ordering::Release);
    }

    /// Queue a packet for the writer task. Returns immediately.
    ///
    /// Write failures surface later through the connection closing, not here.
    pub fn send(&self, packet: Packet) -> Result<()> {
        if self.is_closed() {
            return Err(ProtocolError::ConnectionClosed);
        }
        self.outbound
            .send(packet)
            .map_err(|_| ProtocolError::ConnectionClosed)
    }

    /// Ask both connection tasks to stop. Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once [`close`](Self::close) has been called.
    pub async fn closed(&self) {
        self.closed.cancelled().await
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}
