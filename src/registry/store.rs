//! Connection registry implementation
//!
//! The central set of live connections, keyed by identifier.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::entry::{ConnectionHandle, ConnectionId};
use super::error::RegistryError;

/// Registry of all currently active connections
///
/// Thread-safe via `RwLock`. Every operation holds the lock only for a map
/// insert, remove, or copy and never across connection I/O.
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<ConnectionId, Arc<ConnectionHandle>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a connection under its identifier
    ///
    /// Returns an error and leaves the registry unchanged if the identifier
    /// is already present.
    pub async fn register(&self, handle: Arc<ConnectionHandle>) -> Result<(), RegistryError> {
        let id = handle.id();
        let mut connections = self.connections.write().await;

        if connections.contains_key(&id) {
            return Err(RegistryError::DuplicateIdentifier(id));
        }

        connections.insert(id, handle);

        tracing::debug!(
            connection_id = %id,
            connections = connections.len(),
            "Connection registered"
        );

        Ok(())
    }

    /// Remove a connection from the registry
    ///
    /// Removing an identifier that is not present is a no-op, so termination
    /// paths that race each other can both call this.
    pub async fn deregister(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        let mut connections = self.connections.write().await;
        let removed = connections.remove(&id);

        if removed.is_some() {
            tracing::debug!(
                connection_id = %id,
                connections = connections.len(),
                "Connection deregistered"
            );
        }

        removed
    }

    /// Copy every registered connection except `id`, ordered by identifier
    ///
    /// The lock is released before this returns; iterating or writing to the
    /// returned handles never blocks registration or removal.
    pub async fn snapshot_excluding(&self, id: ConnectionId) -> Vec<Arc<ConnectionHandle>> {
        let connections = self.connections.read().await;

        connections
            .iter()
            .filter(|(other, _)| **other != id)
            .map(|(_, handle)| Arc::clone(handle))
            .collect()
    }

    /// Check if a connection is registered
    pub async fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().await.contains_key(&id)
    }

    /// Identifiers of all registered connections, ascending
    pub async fn ids(&self) -> Vec<ConnectionId> {
        self.connections.read().await.keys().copied().collect()
    }

    /// Get number of registered connections
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Check if no connections are registered
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Remove and return every registered connection
    pub async fn drain(&self) -> Vec<Arc<ConnectionHandle>> {
        let mut connections = self.connections.write().await;
        std::mem::take(&mut *connections).into_values().collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use tokio_util::sync::CancellationToken;

    use super::*;

    fn handle(id: u64) -> Arc<ConnectionHandle> {
        let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
        Arc::new(ConnectionHandle::new(
            ConnectionId::new(id),
            addr,
            Box::new(tokio::io::sink()),
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn test_register_and_snapshot() {
        let registry = ConnectionRegistry::new();

        for id in [3, 1, 2] {
            registry.register(handle(id)).await.unwrap();
        }

        let snapshot = registry.snapshot_excluding(ConnectionId::new(2)).await;
        let ids: Vec<u64> = snapshot.iter().map(|h| h.id().get()).collect();

        assert_eq!(ids, vec![1, 3]);
        assert_eq!(registry.len().await, 3);
    }

    #[tokio::test]
    async fn test_duplicate_identifier_rejected() {
        let registry = ConnectionRegistry::new();
        let first = handle(1);

        registry.register(Arc::clone(&first)).await.unwrap();

        let result = registry.register(handle(1)).await;
        assert_eq!(
            result,
            Err(RegistryError::DuplicateIdentifier(ConnectionId::new(1)))
        );

        // Original entry is untouched
        assert_eq!(registry.len().await, 1);
        let kept = registry.deregister(ConnectionId::new(1)).await.unwrap();
        assert!(Arc::ptr_eq(&kept, &first));
    }

    #[tokio::test]
    async fn test_deregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        registry.register(handle(1)).await.unwrap();
        registry.register(handle(2)).await.unwrap();

        assert!(registry.deregister(ConnectionId::new(1)).await.is_some());
        assert!(registry.deregister(ConnectionId::new(1)).await.is_none());

        assert_eq!(registry.ids().await, vec![ConnectionId::new(2)]);
        assert!(!registry.contains(ConnectionId::new(1)).await);
    }

    #[tokio::test]
    async fn test_size_after_registers_and_deregisters() {
        let registry = ConnectionRegistry::new();
        let k = 50;
        let m = 20;

        for id in 1..=k {
            registry.register(handle(id)).await.unwrap();
        }
        for id in 1..=m {
            registry.deregister(ConnectionId::new(id * 2)).await;
        }

        assert_eq!(registry.len().await as u64, k - m);
    }

    #[tokio::test]
    async fn test_concurrent_registration() {
        let registry = Arc::new(ConnectionRegistry::new());

        let tasks: Vec<_> = (1..=64)
            .map(|id| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    registry.register(handle(id)).await.unwrap();
                    if id % 4 == 0 {
                        registry.deregister(ConnectionId::new(id)).await;
                        registry.deregister(ConnectionId::new(id)).await;
                    }
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(registry.len().await, 48);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached() {
        let registry = ConnectionRegistry::new();
        registry.register(handle(1)).await.unwrap();
        registry.register(handle(2)).await.unwrap();

        let snapshot = registry.snapshot_excluding(ConnectionId::new(1)).await;

        // Mutating while a snapshot is held doesn't block and doesn't change it
        registry.deregister(ConnectionId::new(2)).await;
        registry.register(handle(3)).await.unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].id(), ConnectionId::new(2));
    }

    #[tokio::test]
    async fn test_drain_empties_registry() {
        let registry = ConnectionRegistry::new();
        for id in 1..=3 {
            registry.register(handle(id)).await.unwrap();
        }

        let drained = registry.drain().await;

        assert_eq!(drained.len(), 3);
        assert!(registry.is_empty().await);
    }
}
