//! Statistics and metrics for the relay server

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Point-in-time copy of the server counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Connections accepted from the listener
    pub total_connections: u64,
    /// Connections dropped by the connection limit
    pub rejected_connections: u64,
    /// Connections currently registered
    pub active_connections: u64,
    /// Listener accept errors
    pub accept_failures: u64,
    /// Chunks read from all clients
    pub chunks_received: u64,
    /// Bytes read from all clients
    pub bytes_received: u64,
    /// Bytes written to recipients, counted once per recipient
    pub bytes_relayed: u64,
    /// Per-destination broadcast write failures
    pub write_failures: u64,
    /// Uptime
    pub uptime: Duration,
}

/// Server-wide counters, updated concurrently by every connection task
#[derive(Debug)]
pub struct RelayMetrics {
    started_at: Instant,
    total_connections: AtomicU64,
    rejected_connections: AtomicU64,
    active_connections: AtomicU64,
    accept_failures: AtomicU64,
    chunks_received: AtomicU64,
    bytes_received: AtomicU64,
    bytes_relayed: AtomicU64,
    write_failures: AtomicU64,
}

impl RelayMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            total_connections: AtomicU64::new(0),
            rejected_connections: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
            accept_failures: AtomicU64::new(0),
            chunks_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_relayed: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        }
    }

    pub fn connection_accepted(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_rejected(&self) {
        self.rejected_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        // Saturate rather than wrap if a close is ever counted twice
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                Some(n.saturating_sub(1))
            });
    }

    pub fn accept_failed(&self) {
        self.accept_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn chunk_received(&self, len: usize) {
        self.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn chunk_relayed(&self, len: usize) {
        self.bytes_relayed.fetch_add(len as u64, Ordering::Relaxed);
    }

    pub fn write_failed(&self) {
        self.write_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of all counters
    pub fn snapshot(&self) -> RelayStats {
        RelayStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            rejected_connections: self.rejected_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            accept_failures: self.accept_failures.load(Ordering::Relaxed),
            chunks_received: self.chunks_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            write_failures: self.write_failures.load(Ordering::Relaxed),
            uptime: self.started_at.elapsed(),
        }
    }
}

impl Default for RelayMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let stats = RelayMetrics::new().snapshot();

        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.bytes_received, 0);
        assert_eq!(stats.bytes_relayed, 0);
        assert_eq!(stats.write_failures, 0);
    }

    #[test]
    fn test_connection_counters() {
        let metrics = RelayMetrics::new();

        metrics.connection_accepted();
        metrics.connection_accepted();
        metrics.connection_rejected();
        metrics.connection_opened();
        metrics.connection_opened();
        metrics.connection_closed();

        let stats = metrics.snapshot();
        assert_eq!(stats.total_connections, 2);
        assert_eq!(stats.rejected_connections, 1);
        assert_eq!(stats.active_connections, 1);
    }

    #[test]
    fn test_active_connections_saturates() {
        let metrics = RelayMetrics::new();

        metrics.connection_closed();

        assert_eq!(metrics.snapshot().active_connections, 0);
    }

    #[test]
    fn test_traffic_counters() {
        let metrics = RelayMetrics::new();

        // One 100-byte chunk fanned out to three recipients, one of which failed
        metrics.chunk_received(100);
        metrics.chunk_relayed(100);
        metrics.chunk_relayed(100);
        metrics.write_failed();

        let stats = metrics.snapshot();
        assert_eq!(stats.chunks_received, 1);
        assert_eq!(stats.bytes_received, 100);
        assert_eq!(stats.bytes_relayed, 200);
        assert_eq!(stats.write_failures, 1);
    }
}
