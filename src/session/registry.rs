use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use log::info;

use crate::device::connection::Connection;

/// Holds the one current connection of a session. Clones share the same slot.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    current: Arc<Mutex<Option<Arc<Connection>>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<Arc<Connection>>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Installs `connection` and closes whatever was installed before.
    pub fn set(&self, connection: Arc<Connection>) {
        let previous = self.slot().replace(connection);

        if let Some(previous) = previous {
            if previous.close() {
                info!("Connection {} was superseded", previous.id());
            }
        }
    }

    /// The current connection, which may already be closed.
    pub fn get(&self) -> Option<Arc<Connection>> {
        self.slot().clone()
    }

    /// The current connection if it is still connected. Lookup and liveness check happen under
    /// the registry lock, so a connection that is being replaced is never handed out.
    pub fn acquire(&self) -> Option<Arc<Connection>> {
        let slot = self.slot();
        slot.as_ref()
            .filter(|connection| connection.is_connected())
            .cloned()
    }

    /// Removes and closes the current connection.
    pub fn clear(&self) -> Option<Arc<Connection>> {
        let previous = self.slot().take();

        if let Some(previous) = &previous {
            previous.close();
        }
        previous
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::memory::memory_link;
    use crate::device::types::{ConnectionState, PeripheralAddress};

    fn connection() -> (Arc<Connection>, crate::device::memory::MemoryPeer) {
        let (transport, peer) = memory_link();
        let peripheral = PeripheralAddress::parse("AA:BB:CC:11:22:33", "HC-05").unwrap();
        (Arc::new(Connection::new(peripheral, Box::new(transport))), peer)
    }

    #[test]
    fn empty_registry_has_nothing_to_acquire() {
        let registry = SessionRegistry::new();
        assert!(registry.get().is_none());
        assert!(registry.acquire().is_none());
        assert!(registry.clear().is_none());
    }

    #[test]
    fn set_closes_previous_exactly_once() {
        let registry = SessionRegistry::new();
        let (first, first_peer) = connection();
        let (second, second_peer) = connection();

        registry.set(first.clone());
        registry.set(second.clone());

        assert_eq!(first.state(), ConnectionState::Closed);
        assert_eq!(first_peer.shutdown_count(), 1);
        assert!(second.is_connected());
        assert_eq!(second_peer.shutdown_count(), 0);
        assert_eq!(registry.get().unwrap().id(), second.id());
    }

    #[test]
    fn set_does_not_double_close_an_already_closed_connection() {
        let registry = SessionRegistry::new();
        let (first, first_peer) = connection();
        registry.set(first.clone());
        first.close();

        let (second, _) = connection();
        registry.set(second);
        assert_eq!(first_peer.shutdown_count(), 1);
    }

    #[test]
    fn acquire_skips_closed_connection() {
        let registry = SessionRegistry::new();
        let (first, _) = connection();
        registry.set(first.clone());
        assert!(registry.acquire().is_some());

        first.close();
        assert!(registry.acquire().is_none());
        assert!(registry.get().is_some());
    }

    #[test]
    fn clones_share_the_slot() {
        let registry = SessionRegistry::new();
        let other_surface = registry.clone();
        let (first, peer) = connection();

        registry.set(first);
        assert!(other_surface.acquire().is_some());

        other_surface.clear();
        assert!(registry.get().is_none());
        assert_eq!(peer.shutdown_count(), 1);
    }
}
