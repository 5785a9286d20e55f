use crate::config::DispatchMode;
use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::opcodes::RESERVED;
use crate::transport::session::Session;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

type HandlerFn = dyn Fn(Arc<Session>, Packet) -> Result<()> + Send + Sync + 'static;

/// Routes decoded packets to handlers by packet type.
///
/// Handlers are registered during startup and looked up on every packet. A
/// handler error is logged against the session and never closes it.
pub struct Dispatcher {
    handlers: RwLock<HashMap<u16, Arc<HandlerFn>>>,
    mode: DispatchMode,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("mode", &self.mode)
            .field("handlers", &self.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::with_mode(DispatchMode::default())
    }

    pub fn with_mode(mode: DispatchMode) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            mode,
        }
    }

    pub fn mode(&self) -> DispatchMode {
        self.mode
    }

    /// Bind `handler` to `packet_type`, replacing any earlier binding.
    ///
    /// Type 0 is never assigned and cannot be registered.
    pub fn register<F>(&self, packet_type: u16, handler: F) -> Result<()>
    where
        F: Fn(Arc<Session>, Packet) -> Result<()> + Send + Sync + 'static,
    {
        if packet_type == RESERVED {
            return Err(ProtocolError::UnknownPacketType(packet_type));
        }

        let mut handlers = self.handlers.write().map_err(|_| {
            ProtocolError::Custom(constants::ERR_DISPATCHER_WRITE_LOCK.to_string())
        })?;

        if handlers.insert(packet_type, Arc::new(handler)).is_some() {
            debug!(packet_type, "Handler replaced");
        }
        Ok(())
    }

    pub fn handles(&self, packet_type: u16) -> bool {
        self.handlers
            .read()
            .map(|h| h.contains_key(&packet_type))
            .unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hand `packet` to the handler registered for its type.
    ///
    /// An unregistered type is logged and reported as `UnknownPacketType`,
    /// which callers treat as packet-local. In concurrent mode the handler runs
    /// on its own task and this returns once it is spawned.
    pub fn dispatch(&self, session: &Arc<Session>, packet: Packet) -> Result<()> {
        let packet_type = packet.packet_type();
        let handler = {
            let handlers = self.handlers.read().map_err(|_| {
                ProtocolError::Custom(constants::ERR_DISPATCHER_READ_LOCK.to_string())
            })?;
            handlers.get(&packet_type).cloned()
        };

        let Some(handler) = handler else {
            warn!(
                session_id = %session.id(),
                packet_type,
                "No handler registered, dropping packet"
            );
            return Err(ProtocolError::UnknownPacketType(packet_type));
        };

        match self.mode {
            DispatchMode::Concurrent => {
                let session = Arc::clone(session);
                tokio::spawn(async move { run_handler(&*handler, session, packet) });
            }
            DispatchMode::Sequential => run_handler(&*handler, Arc::clone(session), packet),
        }
        Ok(())
    }
}

fn run_handler(handler: &HandlerFn, session: Arc<Session>, packet: Packet) {
    let packet_type = packet.packet_type();
    let session_id = session.id().clone();
    if let Err(e) = handler(session, packet) {
        warn!(session_id = %session_id, packet_type, error = %e, "Handler failed");
    }
}
