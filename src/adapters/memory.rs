//! In-Memory Cluster Adapters
//!
//! Simulated implementations of the [`HostRegistry`], [`PieceTransport`],
//! and [`LocalStore`] ports. Hosts are plain map entries whose
//! add/remove operations double as the membership events a real network
//! stack would deliver. The transport honors per-call timeouts and an
//! optional injected latency per host, which lets tests exercise the
//! timeout and independent-failure-domain paths.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::debug;

use crate::domain::{FileId, HostEvent, HostId, HostRegistry, LocalStore, PieceTransport};
use crate::error::{Error, Result};

const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Host Registry
// =============================================================================

/// In-memory host membership with broadcast liveness events.
pub struct MemoryHostRegistry {
    hosts: DashMap<HostId, ()>,
    events: broadcast::Sender<HostEvent>,
}

impl MemoryHostRegistry {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            hosts: DashMap::new(),
            events,
        })
    }

    /// Bring up a new host and announce it.
    pub fn add_host(&self) -> HostId {
        let host = HostId::generate();
        self.hosts.insert(host, ());
        let _ = self.events.send(HostEvent::added(host));
        debug!(host = %host, "host added");
        host
    }

    /// Bring up `n` hosts, returning their ids in creation order.
    pub fn add_hosts(&self, n: usize) -> Vec<HostId> {
        (0..n).map(|_| self.add_host()).collect()
    }

    /// Take a host down and announce its departure.
    pub fn remove_host(&self, host: HostId) -> bool {
        let removed = self.hosts.remove(&host).is_some();
        if removed {
            let _ = self.events.send(HostEvent::removed(host));
            debug!(host = %host, "host removed");
        }
        removed
    }

    /// Whether `host` is currently up.
    pub fn is_live(&self, host: HostId) -> bool {
        self.hosts.contains_key(&host)
    }

    /// Synchronous snapshot of live hosts (test convenience).
    pub fn live_snapshot(&self) -> HashSet<HostId> {
        self.hosts.iter().map(|e| *e.key()).collect()
    }
}

#[async_trait]
impl HostRegistry for MemoryHostRegistry {
    async fn live_hosts(&self) -> Result<HashSet<HostId>> {
        Ok(self.live_snapshot())
    }

    fn subscribe(&self) -> broadcast::Receiver<HostEvent> {
        self.events.subscribe()
    }
}

// =============================================================================
// Piece Transport
// =============================================================================

/// In-memory piece transport backed by the registry's liveness state.
pub struct MemoryTransport {
    registry: Arc<MemoryHostRegistry>,
    stored: DashMap<(HostId, FileId, u32), Bytes>,
    latency: DashMap<HostId, Duration>,
}

impl MemoryTransport {
    pub fn new(registry: Arc<MemoryHostRegistry>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            stored: DashMap::new(),
            latency: DashMap::new(),
        })
    }

    /// Inject a fixed transfer latency for one host. Transfers whose
    /// latency exceeds the caller's timeout fail with `TransferTimeout`.
    pub fn set_latency(&self, host: HostId, latency: Duration) {
        self.latency.insert(host, latency);
    }

    /// Number of pieces currently stored across all hosts (test hook).
    pub fn stored_piece_count(&self) -> usize {
        self.stored.len()
    }

    async fn simulate_transfer(&self, host: HostId, timeout: Duration) -> Result<()> {
        if !self.registry.is_live(host) {
            return Err(Error::HostUnreachable { host });
        }
        let latency = self
            .latency
            .get(&host)
            .map(|e| *e.value())
            .unwrap_or(Duration::ZERO);
        if latency > timeout {
            tokio::time::sleep(timeout).await;
            return Err(Error::TransferTimeout { host, timeout });
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        Ok(())
    }
}

#[async_trait]
impl PieceTransport for MemoryTransport {
    async fn put_piece(
        &self,
        host: HostId,
        file: FileId,
        index: u32,
        data: Bytes,
        timeout: Duration,
    ) -> Result<()> {
        self.simulate_transfer(host, timeout).await?;
        self.stored.insert((host, file, index), data);
        Ok(())
    }

    async fn get_piece(
        &self,
        host: HostId,
        file: FileId,
        index: u32,
        timeout: Duration,
    ) -> Result<Bytes> {
        self.simulate_transfer(host, timeout).await?;
        self.stored
            .get(&(host, file, index))
            .map(|e| e.value().clone())
            .ok_or(Error::PieceNotFound { file, index, host })
    }
}

// =============================================================================
// Local Store
// =============================================================================

/// In-memory local copy store keyed by path.
#[derive(Default)]
pub struct MemoryLocalStore {
    files: DashMap<String, Bytes>,
}

impl MemoryLocalStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl LocalStore for MemoryLocalStore {
    async fn read_local_copy(&self, path: &str) -> Result<Bytes> {
        self.files
            .get(path)
            .map(|e| e.value().clone())
            .ok_or_else(|| Error::LocalCopyNotFound(path.to_string()))
    }

    async fn write_local_copy(&self, path: &str, data: Bytes) -> Result<()> {
        self.files.insert(path.to_string(), data);
        Ok(())
    }

    async fn delete_local_copy(&self, path: &str) -> Result<()> {
        self.files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| Error::LocalCopyNotFound(path.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_registry_membership_and_events() {
        let registry = MemoryHostRegistry::new();
        let mut events = registry.subscribe();

        let host = registry.add_host();
        assert!(registry.is_live(host));
        assert_matches!(events.recv().await.unwrap(), HostEvent::HostAdded { host: h, .. } if h == host);

        assert!(registry.remove_host(host));
        assert!(!registry.is_live(host));
        assert_matches!(events.recv().await.unwrap(), HostEvent::HostRemoved { host: h, .. } if h == host);

        // Double removal is a no-op, no event.
        assert!(!registry.remove_host(host));
    }

    #[tokio::test]
    async fn test_transport_roundtrip_and_liveness() {
        let registry = MemoryHostRegistry::new();
        let transport = MemoryTransport::new(registry.clone());
        let host = registry.add_host();
        let file = FileId::generate();
        let timeout = Duration::from_secs(1);

        transport
            .put_piece(host, file, 0, Bytes::from_static(b"piece"), timeout)
            .await
            .unwrap();
        let got = transport.get_piece(host, file, 0, timeout).await.unwrap();
        assert_eq!(&got[..], b"piece");

        registry.remove_host(host);
        assert_matches!(
            transport.get_piece(host, file, 0, timeout).await,
            Err(Error::HostUnreachable { .. })
        );
    }

    #[tokio::test]
    async fn test_transport_missing_piece() {
        let registry = MemoryHostRegistry::new();
        let transport = MemoryTransport::new(registry.clone());
        let host = registry.add_host();

        let result = transport
            .get_piece(host, FileId::generate(), 3, Duration::from_secs(1))
            .await;
        assert_matches!(result, Err(Error::PieceNotFound { index: 3, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transport_latency_beyond_timeout() {
        let registry = MemoryHostRegistry::new();
        let transport = MemoryTransport::new(registry.clone());
        let host = registry.add_host();
        transport.set_latency(host, Duration::from_secs(10));

        let result = transport
            .put_piece(
                host,
                FileId::generate(),
                0,
                Bytes::from_static(b"slow"),
                Duration::from_secs(1),
            )
            .await;
        assert_matches!(result, Err(Error::TransferTimeout { .. }));
    }

    #[tokio::test]
    async fn test_local_store_lifecycle() {
        let store = MemoryLocalStore::new();
        store
            .write_local_copy("/tmp/a", Bytes::from_static(b"bytes"))
            .await
            .unwrap();
        assert_eq!(&store.read_local_copy("/tmp/a").await.unwrap()[..], b"bytes");

        store.delete_local_copy("/tmp/a").await.unwrap();
        assert_matches!(
            store.read_local_copy("/tmp/a").await,
            Err(Error::LocalCopyNotFound(_))
        );
    }
}
