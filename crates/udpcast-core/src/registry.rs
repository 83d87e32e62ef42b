//! Channel registry and live statistics.
//!
//! The registry is owned by the reactor and shared with every channel it
//! drives. Spawned send and receive tasks hold an `Arc<ChannelStats>` rather
//! than a reference back into the registry, so an entry can be removed while
//! those tasks are still finishing.

use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A channel identifier, unique within one reactor.
pub type ChannelId = u64;

/// Live counters for one channel.
#[derive(Debug)]
pub struct ChannelStats {
    local_addr: SocketAddr,
    datagrams_sent: AtomicU64,
    bytes_sent: AtomicU64,
    send_errors: AtomicU64,
    datagrams_received: AtomicU64,
    bytes_received: AtomicU64,
    receive_errors: AtomicU64,
    groups_joined: AtomicUsize,
}

impl ChannelStats {
    fn new(local_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            datagrams_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            send_errors: AtomicU64::new(0),
            datagrams_received: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            receive_errors: AtomicU64::new(0),
            groups_joined: AtomicUsize::new(0),
        }
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_received(&self, bytes: usize) {
        self.datagrams_received.fetch_add(1, Ordering::Relaxed);
        self.bytes_received.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn set_groups_joined(&self, count: usize) {
        self.groups_joined.store(count, Ordering::Relaxed);
    }

    /// Take a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> ChannelStatsSnapshot {
        ChannelStatsSnapshot {
            local_addr: self.local_addr,
            datagrams_sent: self.datagrams_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            datagrams_received: self.datagrams_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            groups_joined: self.groups_joined.load(Ordering::Relaxed),
        }
    }
}

/// Channel statistics at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelStatsSnapshot {
    /// Bound local address.
    pub local_addr: SocketAddr,
    /// Datagrams handed to the OS.
    pub datagrams_sent: u64,
    /// Bytes handed to the OS.
    pub bytes_sent: u64,
    /// Failed sends.
    pub send_errors: u64,
    /// Datagrams delivered to the receive callback.
    pub datagrams_received: u64,
    /// Bytes delivered to the receive callback.
    pub bytes_received: u64,
    /// Receive failures.
    pub receive_errors: u64,
    /// Multicast groups joined.
    pub groups_joined: usize,
}

/// Registry of the channels driven by one reactor.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: DashMap<ChannelId, Arc<ChannelStats>>,
    next_id: AtomicU64,
}

impl ChannelRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel bound to `local_addr`.
    pub(crate) fn register(&self, local_addr: SocketAddr) -> (ChannelId, Arc<ChannelStats>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let stats = Arc::new(ChannelStats::new(local_addr));
        self.channels.insert(id, Arc::clone(&stats));
        debug!(channel = id, addr = %local_addr, "Channel registered");
        (id, stats)
    }

    /// Remove a channel. Returns `true` if it was registered.
    pub(crate) fn deregister(&self, id: ChannelId) -> bool {
        let removed = self.channels.remove(&id).is_some();
        if removed {
            debug!(channel = id, "Channel deregistered");
        }
        removed
    }

    /// Get a statistics snapshot for one channel.
    #[must_use]
    pub fn get(&self, id: ChannelId) -> Option<ChannelStatsSnapshot> {
        self.channels.get(&id).map(|entry| entry.snapshot())
    }

    /// Get the number of open channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if no channels are open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Get the ids of all open channels.
    #[must_use]
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|e| *e.key()).collect()
    }

    /// Aggregate statistics across all open channels.
    #[must_use]
    pub fn stats(&self) -> ReactorStats {
        self.channels.iter().fold(
            ReactorStats {
                channel_count: self.channels.len(),
                ..ReactorStats::default()
            },
            |mut acc, entry| {
                let s = entry.snapshot();
                acc.datagrams_sent += s.datagrams_sent;
                acc.datagrams_received += s.datagrams_received;
                acc.bytes_sent += s.bytes_sent;
                acc.bytes_received += s.bytes_received;
                acc.errors += s.send_errors + s.receive_errors;
                acc
            },
        )
    }
}

/// Reactor statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactorStats {
    /// Number of open channels.
    pub channel_count: usize,
    /// Datagrams sent across open channels.
    pub datagrams_sent: u64,
    /// Datagrams received across open channels.
    pub datagrams_received: u64,
    /// Bytes sent across open channels.
    pub bytes_sent: u64,
    /// Bytes received across open channels.
    pub bytes_received: u64,
    /// Send and receive failures across open channels.
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_register_deregister() {
        let registry = ChannelRegistry::new();

        let (id1, _) = registry.register(addr(1000));
        let (id2, _) = registry.register(addr(1001));
        assert_ne!(id1, id2);
        assert_eq!(registry.len(), 2);

        assert!(registry.deregister(id1));
        assert!(!registry.deregister(id1));
        assert_eq!(registry.channel_ids(), vec![id2]);
    }

    #[test]
    fn test_stats_survive_deregistration() {
        let registry = ChannelRegistry::new();
        let (id, stats) = registry.register(addr(1000));

        registry.deregister(id);
        stats.record_sent(5);

        assert!(registry.get(id).is_none());
        assert_eq!(stats.snapshot().bytes_sent, 5);
    }

    #[test]
    fn test_aggregate_stats() {
        let registry = ChannelRegistry::new();
        let (_, a) = registry.register(addr(1000));
        let (id_b, b) = registry.register(addr(1001));

        a.record_sent(10);
        a.record_send_error();
        b.record_received(4);
        b.record_received(6);
        b.record_receive_error();
        b.set_groups_joined(2);

        let stats = registry.stats();
        assert_eq!(stats.channel_count, 2);
        assert_eq!(stats.datagrams_sent, 1);
        assert_eq!(stats.bytes_sent, 10);
        assert_eq!(stats.datagrams_received, 2);
        assert_eq!(stats.bytes_received, 10);
        assert_eq!(stats.errors, 2);

        let snapshot = registry.get(id_b).unwrap();
        assert_eq!(snapshot.local_addr, addr(1001));
        assert_eq!(snapshot.groups_joined, 2);
    }
}
