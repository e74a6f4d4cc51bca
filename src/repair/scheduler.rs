//! Repair Scheduler
//!
//! Per-file health state machine and the background loop that keeps
//! redundancy at target:
//!
//! ```text
//! Healthy ──deficit──▶ Degraded ──source found──▶ Repairing ──▶ Healthy
//!                          │                          │
//!                          └──── no path left ────────┴──▶ Unrecoverable (terminal)
//! ```
//!
//! The loop reacts to host liveness events and also sweeps on a fixed
//! interval, so correctness does not depend on which liveness signal the
//! registry provides. Repair of different files runs concurrently; within
//! one file, missing indices are restored in ascending order and rounds
//! are serialized FIFO. Transient failures (no spare hosts yet, host
//! refused a transfer) are retried with exponential backoff; exhausting
//! the bounded attempt budget produces an escalation report, and the
//! attempt counter resets when the host set changes.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{
    FileId, FileMeta, HostEvent, HostId, HostRegistry, LocalStore, RepairEvent, RepairSource,
};
use crate::ec::EcCodec;
use crate::error::{Error, Result};
use crate::placement::{FileHealth, PieceMap};
use crate::transfer::{DownloadManager, UploadManager};

const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the repair scheduler
#[derive(Debug, Clone)]
pub struct RepairConfig {
    /// Interval between full sweeps of tracked files
    pub sweep_interval: Duration,

    /// Bounded retry budget per deficit; exhausting it escalates
    pub max_attempts: u32,

    /// Backoff after the first failed attempt
    pub initial_backoff: Duration,

    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl Default for RepairConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_millis(500),
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Exponential backoff with a ceiling: `initial * 2^(attempts-1)`.
fn backoff_delay(initial: Duration, max: Duration, attempts: u32) -> Duration {
    let shift = attempts.saturating_sub(1).min(16);
    initial.saturating_mul(1u32 << shift).min(max)
}

// =============================================================================
// Retry State
// =============================================================================

#[derive(Debug)]
struct RetryState {
    attempts: u32,
    not_before: Instant,
    escalated: bool,
}

// =============================================================================
// Repair Scheduler
// =============================================================================

/// Watches host membership, recomputes redundancy, and restores missing
/// piece placements. One instance per renter; owns no host state.
pub struct RepairScheduler {
    config: RepairConfig,
    piece_map: Arc<PieceMap>,
    registry: Arc<dyn HostRegistry>,
    local_store: Arc<dyn LocalStore>,
    uploads: Arc<UploadManager>,
    downloads: Arc<DownloadManager>,
    events: broadcast::Sender<RepairEvent>,
    retries: DashMap<FileId, RetryState>,
    cancel: CancellationToken,
}

impl RepairScheduler {
    pub fn new(
        config: RepairConfig,
        piece_map: Arc<PieceMap>,
        registry: Arc<dyn HostRegistry>,
        local_store: Arc<dyn LocalStore>,
        uploads: Arc<UploadManager>,
        downloads: Arc<DownloadManager>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            config,
            piece_map,
            registry,
            local_store,
            uploads,
            downloads,
            events,
            retries: DashMap::new(),
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to repair lifecycle notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<RepairEvent> {
        self.events.subscribe()
    }

    /// Signal the background loop to stop.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    // =========================================================================
    // Background Loop
    // =========================================================================

    /// Run the scheduler until shutdown. Host events trigger an immediate
    /// check; the sweep interval covers missed or absent events.
    #[instrument(skip(self))]
    pub async fn run(self: Arc<Self>) {
        info!(config = ?self.config, "starting repair scheduler");

        let mut events = self.registry.subscribe();
        let mut events_closed = false;
        let mut tick = interval(self.config.sweep_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("repair scheduler shutting down");
                    break;
                }

                _ = tick.tick() => {
                    self.sweep().await;
                }

                event = events.recv(), if !events_closed => match event {
                    Ok(HostEvent::HostRemoved { host, .. }) => {
                        self.piece_map.prune_host(host);
                        self.retries.clear();
                        self.sweep().await;
                    }
                    Ok(HostEvent::HostAdded { host, .. }) => {
                        debug!(host = %host, "host joined, rechecking deficits");
                        self.retries.clear();
                        self.sweep().await;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "host event stream lagged, relying on sweep");
                        self.retries.clear();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        warn!("host event stream closed, falling back to periodic sweeps");
                        events_closed = true;
                    }
                }
            }
        }
    }

    /// Check every tracked file; repairs for different files run
    /// concurrently within the sweep.
    async fn sweep(&self) {
        let files = self.piece_map.files();
        let checks = files.iter().map(|&file| self.check_file(file));
        for (file, result) in files.iter().zip(futures::future::join_all(checks).await) {
            if let Err(e) = result {
                error!(file = %file, error = %e, "repair check failed");
            }
        }
    }

    // =========================================================================
    // Per-File State Machine
    // =========================================================================

    async fn check_file(&self, file: FileId) -> Result<()> {
        let health = match self.piece_map.health(file) {
            Ok(h) => h,
            // Deleted between listing and check.
            Err(Error::FileNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        if health == FileHealth::Unrecoverable {
            return Ok(());
        }

        let meta = self.piece_map.meta(file)?;
        let live = self.registry.live_hosts().await?;
        let redundancy = self.piece_map.redundancy(file, &live)?;
        let target = meta.target_redundancy();

        if redundancy >= target {
            if health != FileHealth::Healthy {
                self.piece_map.set_health(file, FileHealth::Healthy)?;
            }
            self.retries.remove(&file);
            return Ok(());
        }

        self.piece_map.set_health(file, FileHealth::Degraded)?;

        // Honor the retry budget and backoff window from earlier failures.
        if let Some(state) = self.retries.get(&file) {
            if state.attempts >= self.config.max_attempts || Instant::now() < state.not_before {
                return Ok(());
            }
        }

        let live_pieces = self.piece_map.live_piece_count(file, &live)?;
        let local = self.read_local(&meta).await;
        if live_pieces < meta.data_pieces && local.is_none() {
            self.piece_map.set_health(file, FileHealth::Unrecoverable)?;
            error!(
                file = %file,
                live_pieces,
                required = meta.data_pieces,
                "data permanently lost, marking unrecoverable"
            );
            let _ = self.events.send(RepairEvent::FileUnrecoverable {
                file,
                live_pieces,
                required: meta.data_pieces,
                timestamp: Utc::now(),
            });
            return Ok(());
        }

        self.piece_map.set_health(file, FileHealth::Repairing)?;
        match self.repair_file(&meta, &live, local).await {
            Ok(restored) => {
                let live_now = self.registry.live_hosts().await?;
                let redundancy_now = self.piece_map.redundancy(file, &live_now)?;
                if redundancy_now >= target {
                    self.piece_map.set_health(file, FileHealth::Healthy)?;
                    self.retries.remove(&file);
                    info!(file = %file, redundancy = redundancy_now, "repair restored target redundancy");
                    let _ = self.events.send(RepairEvent::RepairCompleted {
                        file,
                        restored,
                        redundancy: redundancy_now,
                        timestamp: Utc::now(),
                    });
                } else {
                    self.piece_map.set_health(file, FileHealth::Degraded)?;
                    self.note_failure(file, "repair round left a redundancy deficit".to_string());
                }
            }
            Err(e) => {
                self.piece_map.set_health(file, FileHealth::Degraded)?;
                warn!(file = %file, error = %e, "repair attempt failed");
                self.note_failure(file, e.to_string());
            }
        }
        Ok(())
    }

    /// One repair round: source bytes, re-encode, upload missing indices
    /// (ascending) to replacement hosts. Returns the restored indices.
    async fn repair_file(
        &self,
        meta: &FileMeta,
        live: &HashSet<HostId>,
        local: Option<Bytes>,
    ) -> Result<Vec<u32>> {
        let file = meta.id;
        let missing = self.piece_map.missing_indices(file, live)?;

        // Distinct pieces go to distinct hosts: exclude hosts that
        // already hold any piece of this file.
        let placed = self.piece_map.placed_hosts(file)?;
        let mut candidates: Vec<HostId> = live
            .iter()
            .filter(|h| !placed.contains(h))
            .copied()
            .collect();
        candidates.sort_unstable();
        if candidates.is_empty() {
            return Err(Error::InsufficientHosts {
                available: 0,
                required: missing.len(),
            });
        }

        let (bytes, source) = match local {
            Some(bytes) => (bytes, RepairSource::LocalCopy),
            None => {
                let reconstructed = self.downloads.download(file).await?;
                (Bytes::from(reconstructed), RepairSource::RemoteReconstruction)
            }
        };

        info!(file = %file, missing = ?missing, ?source, "repairing");
        let _ = self.events.send(RepairEvent::RepairStarted {
            file,
            missing: missing.clone(),
            source,
            timestamp: Utc::now(),
        });

        let codec = EcCodec::new(meta.data_pieces, meta.parity_pieces)?;
        let pieces = codec.encode(&bytes)?;

        // Pair missing indices with spare hosts until either runs out.
        let batch: Vec<(u32, HostId, Bytes)> = missing
            .iter()
            .zip(candidates)
            .map(|(&index, host)| (index, host, Bytes::from(pieces[index as usize].clone())))
            .collect();

        let outcome = self.uploads.upload_pieces(file, batch).await?;
        if outcome.placed.is_empty() {
            return Err(Error::InsufficientHosts {
                available: 0,
                required: missing.len(),
            });
        }
        Ok(outcome.placed)
    }

    async fn read_local(&self, meta: &FileMeta) -> Option<Bytes> {
        let path = meta.local_path.as_deref()?;
        self.local_store.read_local_copy(path).await.ok()
    }

    fn note_failure(&self, file: FileId, reason: String) {
        let mut state = self.retries.entry(file).or_insert_with(|| RetryState {
            attempts: 0,
            not_before: Instant::now(),
            escalated: false,
        });
        state.attempts += 1;
        state.not_before = Instant::now()
            + backoff_delay(
                self.config.initial_backoff,
                self.config.max_backoff,
                state.attempts,
            );

        if state.attempts >= self.config.max_attempts && !state.escalated {
            state.escalated = true;
            error!(
                file = %file,
                attempts = state.attempts,
                reason = %reason,
                "repair retries exhausted, escalating"
            );
            let _ = self.events.send(RepairEvent::RepairEscalated {
                file,
                attempts: state.attempts,
                reason,
                timestamp: Utc::now(),
            });
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryHostRegistry, MemoryLocalStore, MemoryTransport};
    use crate::transfer::{DownloadConfig, UploadConfig};
    use assert_matches::assert_matches;
    use chrono::Utc;

    // =========================================================================
    // Backoff Tests
    // =========================================================================

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let initial = Duration::from_millis(100);
        let max = Duration::from_secs(1);

        assert_eq!(backoff_delay(initial, max, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(initial, max, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(initial, max, 4), Duration::from_millis(800));
        assert_eq!(backoff_delay(initial, max, 5), max);
        assert_eq!(backoff_delay(initial, max, 30), max);
    }

    // =========================================================================
    // Scheduler Rig
    // =========================================================================

    struct Rig {
        piece_map: Arc<PieceMap>,
        registry: Arc<MemoryHostRegistry>,
        local_store: Arc<MemoryLocalStore>,
        uploads: Arc<UploadManager>,
        scheduler: Arc<RepairScheduler>,
    }

    fn setup(config: RepairConfig) -> Rig {
        let piece_map = Arc::new(PieceMap::new());
        let registry = MemoryHostRegistry::new();
        let transport = MemoryTransport::new(registry.clone());
        let local_store = MemoryLocalStore::new();
        let uploads = Arc::new(UploadManager::new(
            UploadConfig::default(),
            piece_map.clone(),
            registry.clone(),
            transport.clone(),
        ));
        let downloads = Arc::new(DownloadManager::new(
            DownloadConfig::default(),
            piece_map.clone(),
            registry.clone(),
            transport,
        ));
        let scheduler = RepairScheduler::new(
            config,
            piece_map.clone(),
            registry.clone(),
            local_store.clone(),
            uploads.clone(),
            downloads,
        );
        Rig {
            piece_map,
            registry,
            local_store,
            uploads,
            scheduler,
        }
    }

    fn fast_config() -> RepairConfig {
        RepairConfig {
            sweep_interval: Duration::from_millis(25),
            max_attempts: 5,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(50),
        }
    }

    async fn upload_with_local_copy(rig: &Rig, k: usize, m: usize, data: &[u8]) -> FileId {
        let hosts = rig.registry.add_hosts(k + m);
        let path = format!("/local/{}", uuid::Uuid::new_v4());
        rig.local_store
            .write_local_copy(&path, Bytes::copy_from_slice(data))
            .await
            .unwrap();
        let meta = FileMeta {
            id: FileId::generate(),
            length: data.len() as u64,
            data_pieces: k,
            parity_pieces: m,
            local_path: Some(path),
            uploaded_at: Utc::now(),
        };
        rig.piece_map.insert_file(meta.clone());
        rig.uploads.upload(&meta, data, &hosts).await.unwrap();
        meta.id
    }

    // =========================================================================
    // State Machine Tests
    // =========================================================================

    #[tokio::test]
    async fn test_repair_after_host_replacement() {
        let rig = setup(fast_config());
        let data = vec![11u8; 256];
        let file = upload_with_local_copy(&rig, 1, 2, &data).await;

        let handle = tokio::spawn(rig.scheduler.clone().run());

        let victim = *rig.registry.live_snapshot().iter().next().unwrap();
        rig.registry.remove_host(victim);

        // Deficit with no spare host: the file settles in Degraded.
        rig.uploads
            .wait_for_redundancy(file, 2.0, Duration::from_millis(300))
            .await
            .unwrap();
        assert_matches!(
            rig.uploads
                .wait_for_redundancy(file, 3.0, Duration::from_millis(200))
                .await,
            Err(Error::WaitTimeout(_))
        );

        // A replacement host restores target redundancy.
        rig.registry.add_host();
        rig.uploads
            .wait_for_redundancy(file, 3.0, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(rig.piece_map.health(file).unwrap(), FileHealth::Healthy);

        rig.scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_unrecoverable_when_floor_breaks_without_local_copy() {
        let rig = setup(fast_config());
        let hosts = rig.registry.add_hosts(3);
        let data = vec![4u8; 128];

        // No local copy recorded.
        let meta = FileMeta {
            id: FileId::generate(),
            length: data.len() as u64,
            data_pieces: 2,
            parity_pieces: 1,
            local_path: None,
            uploaded_at: Utc::now(),
        };
        rig.piece_map.insert_file(meta.clone());
        rig.uploads.upload(&meta, &data, &hosts).await.unwrap();

        let mut events = rig.scheduler.subscribe();
        let handle = tokio::spawn(rig.scheduler.clone().run());

        rig.registry.remove_host(hosts[0]);
        rig.registry.remove_host(hosts[1]);

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(ev @ RepairEvent::FileUnrecoverable { .. }) = events.recv().await {
                    return ev;
                }
            }
        })
        .await
        .unwrap();
        assert_matches!(
            event,
            RepairEvent::FileUnrecoverable {
                live_pieces: 1,
                required: 2,
                ..
            }
        );
        assert_eq!(
            rig.piece_map.health(meta.id).unwrap(),
            FileHealth::Unrecoverable
        );

        rig.scheduler.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_escalation_after_bounded_retries() {
        let mut config = fast_config();
        config.max_attempts = 2;
        let rig = setup(config);

        let data = vec![8u8; 64];
        let file = upload_with_local_copy(&rig, 1, 2, &data).await;

        let mut events = rig.scheduler.subscribe();
        let handle = tokio::spawn(rig.scheduler.clone().run());

        // Remove one host; with no spare hosts every attempt fails on
        // assignment until the budget runs out.
        let victim = *rig.registry.live_snapshot().iter().next().unwrap();
        rig.registry.remove_host(victim);

        let event = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Ok(ev @ RepairEvent::RepairEscalated { .. }) = events.recv().await {
                    return ev;
                }
            }
        })
        .await
        .unwrap();
        assert_matches!(event, RepairEvent::RepairEscalated { attempts: 2, .. });

        // Escalation is a report, not a terminal state: a new host still
        // rescues the file because the host change resets the budget.
        rig.registry.add_host();
        rig.uploads
            .wait_for_redundancy(file, 3.0, Duration::from_secs(5))
            .await
            .unwrap();

        rig.scheduler.shutdown();
        handle.await.unwrap();
    }
}
