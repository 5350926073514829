//! Connection tracking for the gateway listener.
//!
//! Each accepted connection is registered with a lightweight record; the
//! tracker keeps the `gateway_active_connections` gauge in sync and lets the
//! shutdown path observe how much work is still in flight.
use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Instant,
};

use scc::HashMap;

use crate::metrics;

/// Unique identifier for a connection
pub type ConnectionId = u64;

/// Information about an active connection.
#[derive(Debug)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub remote_addr: SocketAddr,
    pub established_at: Instant,
}

/// Tracks live connections and mirrors the count into the metrics gauge.
#[derive(Clone)]
pub struct ConnectionTracker {
    connections: Arc<HashMap<ConnectionId, ConnectionInfo>>,
    next_id: Arc<AtomicU64>,
}

impl ConnectionTracker {
    /// Create a new empty tracker.
    pub fn new() -> Self {
        Self {
            connections: Arc::new(HashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Register a new connection and return its id.
    pub fn register(&self, remote_addr: SocketAddr) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.connections.insert_sync(
            id,
            ConnectionInfo {
                id,
                remote_addr,
                established_at: Instant::now(),
            },
        );
        metrics::set_active_connections(self.connections.len());
        tracing::debug!(connection_id = id, remote_addr = %remote_addr, "connection registered");
        id
    }

    /// Remove a connection from the tracker.
    pub fn unregister(&self, id: ConnectionId) {
        let _ = self.connections.remove_sync(&id);
        metrics::set_active_connections(self.connections.len());
        tracing::debug!(connection_id = id, "connection unregistered");
    }

    /// Number of currently tracked connections.
    pub fn active_connection_count(&self) -> usize {
        self.connections.len()
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard that unregisters the connection when the request completes.
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
    id: ConnectionId,
}

impl ConnectionGuard {
    pub fn new(tracker: &ConnectionTracker, remote_addr: SocketAddr) -> Self {
        let id = tracker.register(remote_addr);
        Self {
            tracker: tracker.clone(),
            id,
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr() -> SocketAddr {
        "127.0.0.1:40000".parse().unwrap()
    }

    #[test]
    fn test_register_and_unregister() {
        let tracker = ConnectionTracker::new();
        let id = tracker.register(addr());
        assert_eq!(tracker.active_connection_count(), 1);
        tracker.unregister(id);
        assert_eq!(tracker.active_connection_count(), 0);
    }

    #[test]
    fn test_guard_unregisters_on_drop() {
        let tracker = ConnectionTracker::new();
        {
            let _guard = ConnectionGuard::new(&tracker, addr());
            assert_eq!(tracker.active_connection_count(), 1);
        }
        assert_eq!(tracker.active_connection_count(), 0);
    }

    #[test]
    fn test_ids_are_unique() {
        let tracker = ConnectionTracker::new();
        let a = tracker.register(addr());
        let b = tracker.register(addr());
        assert_ne!(a, b);
    }
}
