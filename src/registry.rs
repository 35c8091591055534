//! Registry of live connections keyed by connection id.
//!
//! The map is guarded by a read/write lock that is only ever held for a
//! single map operation, never across I/O or a connection's teardown.

use crate::connection::Connection;
use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};

/// Concurrent map from connection id to connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<u32, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its id.
    ///
    /// A different live connection already holding the id is replaced and
    /// no longer tracked.
    pub fn add(&self, conn: Arc<Connection>) {
        let id = conn.id();
        let (count, replaced) = {
            let mut connections = self
                .connections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            let previous = connections.insert(id, Arc::clone(&conn));
            (connections.len(), previous)
        };

        if let Some(previous) = replaced.filter(|previous| !Arc::ptr_eq(previous, &conn)) {
            warn!(
                conn_id = id,
                replaced_peer = %previous.remote_addr(),
                "Connection id already registered, replacing"
            );
        }
        debug!(conn_id = id, count, "Connection registered");
    }

    /// Remove a connection. Removing an unknown connection, or one whose id
    /// now belongs to another connection, is a no-op.
    pub fn remove(&self, conn: &Connection) {
        let removed = {
            let mut connections = self
                .connections
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            match connections.get(&conn.id()) {
                Some(current) if std::ptr::eq(Arc::as_ptr(current), conn) => {
                    connections.remove(&conn.id())
                }
                _ => None,
            }
        };
        if removed.is_some() {
            debug!(conn_id = conn.id(), count = self.count(), "Connection removed");
        }
    }

    /// Whether a connection is registered under the id.
    pub fn contains(&self, id: u32) -> bool {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    /// Look up a live connection.
    pub fn get(&self, id: u32) -> Result<Arc<Connection>> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
            .ok_or(Error::ConnectionNotFound(id))
    }

    /// Number of registered connections.
    pub fn count(&self) -> usize {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Ids of all registered connections, in no particular order.
    pub fn ids(&self) -> Vec<u32> {
        self.connections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect()
    }

    /// Stop and drop every registered connection.
    ///
    /// Meant for server shutdown only; connections added while this runs
    /// may or may not be stopped.
    pub fn clear(&self) {
        let drained: Vec<Arc<Connection>> = self
            .connections
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, conn)| conn)
            .collect();

        let stopped = drained.len();
        for conn in drained {
            conn.stop();
        }

        info!(stopped, count = self.count(), "Cleared all connections");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connected_pair, test_context};
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_add_get_remove() {
        let ctx = test_context(0, 0);
        let registry = Arc::clone(&ctx.registry);

        let (conn, _peer) = connected_pair(&ctx, 1).await;
        registry.add(Arc::clone(&conn));
        assert_eq!(registry.count(), 1);

        let found = assert_ok!(registry.get(1));
        assert_eq!(found.id(), 1);
        assert_eq!(registry.ids(), vec![1]);

        registry.remove(&conn);
        assert_eq!(registry.count(), 0);
        match registry.get(1) {
            Err(Error::ConnectionNotFound(1)) => {}
            other => panic!("unexpected: {:?}", other.map(|c| c.id())),
        }

        // Removing twice is harmless
        registry.remove(&conn);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn test_get_never_added() {
        let registry = ConnectionRegistry::new();
        assert_err!(registry.get(42));
        assert_eq!(registry.count(), 0);
    }

    #[tokio::test]
    async fn test_clear_stops_connections() {
        let ctx = test_context(0, 0);
        let registry = Arc::clone(&ctx.registry);

        let (a, _peer_a) = connected_pair(&ctx, 1).await;
        let (b, _peer_b) = connected_pair(&ctx, 2).await;
        registry.add(Arc::clone(&a));
        registry.add(Arc::clone(&b));
        assert_eq!(registry.count(), 2);

        registry.clear();

        assert_eq!(registry.count(), 0);
        assert!(a.is_closed());
        assert!(b.is_closed());
    }

    #[tokio::test]
    async fn test_reused_id_keeps_newer_connection() {
        let ctx = test_context(0, 0);
        let registry = Arc::clone(&ctx.registry);

        let (old, _peer_old) = connected_pair(&ctx, 3).await;
        let (new, _peer_new) = connected_pair(&ctx, 3).await;
        registry.add(Arc::clone(&old));
        registry.add(Arc::clone(&new));
        assert_eq!(registry.count(), 1);
        assert!(registry.contains(3));

        // The replaced connection must not evict its successor
        registry.remove(&old);
        let found = assert_ok!(registry.get(3));
        assert!(Arc::ptr_eq(&found, &new));

        registry.remove(&new);
        assert!(!registry.contains(3));
    }
}
