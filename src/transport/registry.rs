//! # Session Registry
//!
//! The set of live sessions on a server, keyed by [`SessionId`]. Accept and
//! receive tasks mutate it concurrently, so every access goes through one
//! `RwLock`. Sessions are added on accept and removed when their connection ends.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::core::packet::Packet;
use crate::error::{constants, ProtocolError, Result};
use crate::transport::session::{Session, SessionId};

#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session. A duplicate identity is logged and the existing entry kept.
    ///
    /// Returns whether the session was inserted.
    pub fn register(&self, session: Arc<Session>) -> Result<bool> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_WRITE_LOCK.to_string()))?;

        if sessions.contains_key(session.id()) {
            warn!(session_id = %session.id(), "Session already exists in the registry");
            return Ok(false);
        }
        debug!(session_id = %session.id(), peer = %session.peer(), "Session registered");
        sessions.insert(session.id().clone(), session);
        Ok(true)
    }

    pub fn remove(&self, id: &SessionId) -> Result<Option<Arc<Session>>> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_WRITE_LOCK.to_string()))?;
        let removed = sessions.remove(id);
        if removed.is_some() {
            debug!(session_id = %id, "Session removed");
        }
        Ok(removed)
    }

    /// Remove `session` only if it is the entry stored under its identity.
    ///
    /// A connection whose duplicate registration was refused must not evict
    /// the session that holds the id.
    pub fn unregister(&self, session: &Arc<Session>) -> Result<bool> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_WRITE_LOCK.to_string()))?;
        match sessions.get(session.id()) {
            Some(stored) if Arc::ptr_eq(stored, session) => {
                sessions.remove(session.id());
                debug!(session_id = %session.id(), "Session removed");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn get(&self, id: &SessionId) -> Result<Option<Arc<Session>>> {
        Ok(self.read()?.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn ids(&self) -> Result<Vec<SessionId>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    /// Snapshot of the current sessions; the lock is released before returning.
    pub fn sessions(&self) -> Result<Vec<Arc<Session>>> {
        Ok(self.read()?.values().cloned().collect())
    }

    /// Send a packet to every session. `build` runs once per recipient so each
    /// copy gets its own body key.
    ///
    /// Returns how many sessions accepted the packet.
    pub fn broadcast<F>(&self, build: F) -> Result<usize>
    where
        F: Fn() -> Packet,
    {
        let mut delivered = 0;
        for session in self.sessions()? {
            match session.send(build()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!(session_id = %session.id(), error = %e, "Broadcast skipped session"),
            }
        }
        Ok(delivered)
    }

    /// Signal every session to close. Entries leave as their connections end.
    pub fn close_all(&self) -> Result<()> {
        for session in self.sessions()? {
            session.close();
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<SessionId, Arc<Session>>>> {
        self.sessions
            .read()
            .map_err(|_| ProtocolError::Custom(constants::ERR_REGISTRY_READ_LOCK.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn session(id: &str) -> (Arc<Session>, mpsc::UnboundedReceiver<Packet>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = "127.0.0.1:4000".parse().unwrap();
        (Arc::new(Session::with_id(SessionId::from(id), peer, tx)), rx)
    }

    #[test]
    fn duplicate_registration_keeps_first() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = session("abc");
        let (second, _rx2) = session("abc");
        assert!(registry.register(Arc::clone(&first)).unwrap());
        assert!(!registry.register(second).unwrap());
        assert_eq!(registry.len(), 1);
        let stored = registry.get(&SessionId::from("abc")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&stored, &first));
    }

    #[test]
    fn unregister_leaves_the_holder_of_a_duplicate_id() {
        let registry = SessionRegistry::new();
        let (holder, _rx1) = session("dup");
        let (refused, _rx2) = session("dup");
        registry.register(Arc::clone(&holder)).unwrap();
        assert!(!registry.register(Arc::clone(&refused)).unwrap());

        assert!(!registry.unregister(&refused).unwrap());
        let stored = registry.get(&SessionId::from("dup")).unwrap().unwrap();
        assert!(Arc::ptr_eq(&stored, &holder));

        assert!(registry.unregister(&holder).unwrap());
        assert!(registry.is_empty());
    }

    #[test]
    fn remove_drops_entry() {
        let registry = SessionRegistry::new();
        let (s, _rx) = session("gone");
        registry.register(s).unwrap();
        assert!(registry.remove(&SessionId::from("gone")).unwrap().is_some());
        assert!(registry.remove(&SessionId::from("gone")).unwrap().is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn broadcast_builds_one_packet_per_session() {
        let registry = SessionRegistry::new();
        let (a, mut rx_a) = session("a");
        let (b, mut rx_b) = session("b");
        let (c, _rx_c) = session("c");
        c.close();
        registry.register(a).unwrap();
        registry.register(b).unwrap();
        registry.register(c).unwrap();

        let delivered = registry
            .broadcast(|| {
                let mut p = Packet::new(0x10);
                p.write_string("notice");
                p
            })
            .unwrap();
        assert_eq!(delivered, 2);

        let pa = rx_a.try_recv().unwrap();
        let pb = rx_b.try_recv().unwrap();
        assert_eq!(pa, pb);
        assert_ne!(pa.header(), pb.header());
    }

    #[test]
    fn close_all_signals_sessions() {
        let registry = SessionRegistry::new();
        let (a, _rx) = session("a");
        registry.register(Arc::clone(&a)).unwrap();
        registry.close_all().unwrap();
        assert!(a.is_closed());
    }
}
