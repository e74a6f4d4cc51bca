//! Renter Facade
//!
//! The caller-facing surface of the engine. A [`Renter`] owns the piece
//! map, the upload/download managers, and the repair scheduler task; the
//! external world (host registry, transport, local store) is injected as
//! ports. All state is scoped to the instance — two renters sharing a
//! process share nothing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, instrument};

use crate::domain::{FileId, FileMeta, HostRegistry, LocalStore, PieceTransport, RepairEvent};
use crate::error::{Error, Result};
use crate::placement::{FileHealth, PieceMap};
use crate::repair::{RepairConfig, RepairScheduler};
use crate::transfer::{DownloadConfig, DownloadManager, UploadConfig, UploadManager};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for a renter instance
#[derive(Debug, Clone, Default)]
pub struct RenterConfig {
    /// Upload manager settings
    pub upload: UploadConfig,

    /// Download manager settings
    pub download: DownloadConfig,

    /// Repair scheduler settings
    pub repair: RepairConfig,
}

// =============================================================================
// File Info
// =============================================================================

/// Point-in-time snapshot of a tracked file's status.
#[derive(Debug, Clone, Serialize)]
pub struct FileInfo {
    /// File identifier
    pub id: FileId,

    /// Original byte length
    pub length: u64,

    /// Data piece count (k)
    pub data_pieces: usize,

    /// Parity piece count (m)
    pub parity_pieces: usize,

    /// Redundancy at read time
    pub redundancy: f64,

    /// Health state at read time
    pub health: FileHealth,

    /// Distinct piece indices with at least one live placement
    pub live_pieces: usize,

    /// Live placement count per piece index
    pub placements: Vec<usize>,

    /// When the upload started
    pub uploaded_at: DateTime<Utc>,
}

// =============================================================================
// Renter
// =============================================================================

/// A renter instance: uploads files, maintains their redundancy, and
/// reconstructs them on demand.
pub struct Renter {
    piece_map: Arc<PieceMap>,
    registry: Arc<dyn HostRegistry>,
    local_store: Arc<dyn LocalStore>,
    uploads: Arc<UploadManager>,
    downloads: Arc<DownloadManager>,
    scheduler: Arc<RepairScheduler>,
    scheduler_task: Mutex<Option<JoinHandle<()>>>,
    poll_interval: Duration,
}

impl Renter {
    /// Build a renter over the given ports and start its repair
    /// scheduler. Must be called from within a tokio runtime.
    pub fn new(
        config: RenterConfig,
        registry: Arc<dyn HostRegistry>,
        transport: Arc<dyn PieceTransport>,
        local_store: Arc<dyn LocalStore>,
    ) -> Arc<Self> {
        let piece_map = Arc::new(PieceMap::new());
        let poll_interval = config.upload.redundancy_poll_interval;

        let uploads = Arc::new(UploadManager::new(
            config.upload,
            piece_map.clone(),
            registry.clone(),
            transport.clone(),
        ));
        let downloads = Arc::new(DownloadManager::new(
            config.download,
            piece_map.clone(),
            registry.clone(),
            transport,
        ));
        let scheduler = RepairScheduler::new(
            config.repair,
            piece_map.clone(),
            registry.clone(),
            local_store.clone(),
            uploads.clone(),
            downloads.clone(),
        );

        let scheduler_task = tokio::spawn(scheduler.clone().run());

        Arc::new(Self {
            piece_map,
            registry,
            local_store,
            uploads,
            downloads,
            scheduler,
            scheduler_task: Mutex::new(Some(scheduler_task)),
            poll_interval,
        })
    }

    // =========================================================================
    // Upload / Download
    // =========================================================================

    /// Upload the local file at `path` with a `(k, m)` erasure split.
    ///
    /// Targets one distinct live host per piece. Succeeds once at least
    /// `k` distinct indices are placed; the repair scheduler finishes the
    /// remainder in the background.
    #[instrument(skip(self))]
    pub async fn upload_file(
        &self,
        path: &str,
        data_pieces: usize,
        parity_pieces: usize,
    ) -> Result<FileId> {
        let source = self.local_store.read_local_copy(path).await?;

        let meta = FileMeta {
            id: FileId::generate(),
            length: source.len() as u64,
            data_pieces,
            parity_pieces,
            local_path: Some(path.to_string()),
            uploaded_at: Utc::now(),
        };

        let mut targets: Vec<_> = self.registry.live_hosts().await?.into_iter().collect();
        targets.sort_unstable();
        targets.truncate(meta.total_pieces());

        self.piece_map.insert_file(meta.clone());
        match self.uploads.upload(&meta, &source, &targets).await {
            Ok(outcome) => {
                info!(
                    file = %meta.id,
                    placed = outcome.placed.len(),
                    total = meta.total_pieces(),
                    "upload accepted"
                );
                Ok(meta.id)
            }
            Err(e) => {
                // Roll back tracking; nothing durable to keep.
                let _ = self.piece_map.remove_file(meta.id);
                Err(e)
            }
        }
    }

    /// Upload and block until the file reaches full target redundancy.
    pub async fn upload_file_blocking(
        &self,
        path: &str,
        data_pieces: usize,
        parity_pieces: usize,
        timeout: Duration,
    ) -> Result<FileId> {
        let file = self.upload_file(path, data_pieces, parity_pieces).await?;
        let target = self.piece_map.meta(file)?.target_redundancy();
        self.uploads
            .wait_for_redundancy(file, target, timeout)
            .await?;
        Ok(file)
    }

    /// Reconstruct the file bytes from live remote pieces.
    pub async fn download_file(&self, file: FileId) -> Result<Vec<u8>> {
        self.downloads.download(file).await
    }

    // =========================================================================
    // Status
    // =========================================================================

    /// Redundancy at read time, recomputed from the current placement and
    /// liveness snapshot.
    pub async fn file_redundancy(&self, file: FileId) -> Result<f64> {
        let live = self.registry.live_hosts().await?;
        self.piece_map.redundancy(file, &live)
    }

    /// Status snapshot of a tracked file.
    pub async fn file_info(&self, file: FileId) -> Result<FileInfo> {
        let meta = self.piece_map.meta(file)?;
        let live = self.registry.live_hosts().await?;
        Ok(FileInfo {
            id: meta.id,
            length: meta.length,
            data_pieces: meta.data_pieces,
            parity_pieces: meta.parity_pieces,
            redundancy: self.piece_map.redundancy(file, &live)?,
            health: self.piece_map.health(file)?,
            live_pieces: self.piece_map.live_piece_count(file, &live)?,
            placements: self.piece_map.placement_counts(file, &live)?,
            uploaded_at: meta.uploaded_at,
        })
    }

    /// Subscribe to repair lifecycle notifications.
    pub fn subscribe_repair_events(&self) -> tokio::sync::broadcast::Receiver<RepairEvent> {
        self.scheduler.subscribe()
    }

    // =========================================================================
    // Bounded Waits
    // =========================================================================

    /// Block until `file_redundancy(file) >= target` or the timeout
    /// expires ([`Error::WaitTimeout`]). Surfaces
    /// [`Error::Unrecoverable`] if the file is terminally lost while
    /// waiting.
    pub async fn wait_for_redundancy_at_least(
        &self,
        file: FileId,
        target: f64,
        timeout: Duration,
    ) -> Result<()> {
        self.uploads.wait_for_redundancy(file, target, timeout).await
    }

    /// Block until `file_redundancy(file) < threshold` or the timeout
    /// expires. Used to detect degradation after host churn.
    #[instrument(skip(self))]
    pub async fn wait_for_redundancy_below(
        &self,
        file: FileId,
        threshold: f64,
        timeout: Duration,
    ) -> Result<()> {
        tokio::time::timeout(timeout, async {
            loop {
                if self.file_redundancy(file).await? < threshold {
                    return Ok(());
                }
                tokio::time::sleep(self.poll_interval).await;
            }
        })
        .await
        .map_err(|_| {
            Error::WaitTimeout(format!(
                "redundancy of {} did not drop below {:.2} within {:?}",
                file, threshold, timeout
            ))
        })?
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop tracking `file` and release all of its placements.
    pub async fn delete_file(&self, file: FileId) -> Result<()> {
        self.piece_map.remove_file(file)
    }

    /// Delete the local copy recorded for `file`, leaving remote
    /// reconstruction as the only repair source.
    pub async fn delete_local_copy(&self, file: FileId) -> Result<()> {
        let meta = self.piece_map.meta(file)?;
        let path = meta
            .local_path
            .ok_or_else(|| Error::LocalCopyNotFound(format!("no local path recorded for {}", file)))?;
        self.local_store.delete_local_copy(&path).await
    }

    /// Stop the repair scheduler and wait for it to exit.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown();
        let task = self.scheduler_task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
