//! Upload Manager
//!
//! Encodes source bytes into `k + m` pieces and dispatches each piece to
//! a distinct host. Dispatches run concurrently with independent failure
//! domains and per-transfer timeouts; a placement is recorded in the
//! [`PieceMap`] only after the host acknowledges durable receipt.
//!
//! Partial failure policy: the upload succeeds once at least `k` distinct
//! indices have a live placement. Failed transfers are not retried inline;
//! restoring the remaining pieces is the repair scheduler's job, which
//! keeps the initial upload from blocking on a single unreachable host.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::domain::{FileId, FileMeta, HostId, HostRegistry, PieceTransport};
use crate::ec::EcCodec;
use crate::error::{Error, Result};
use crate::placement::{FileHealth, PieceMap};

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the upload manager
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Timeout for a single piece transfer to one host
    pub put_timeout: Duration,

    /// Poll interval for redundancy waits
    pub redundancy_poll_interval: Duration,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            put_timeout: Duration::from_secs(30),
            redundancy_poll_interval: Duration::from_millis(100),
        }
    }
}

// =============================================================================
// Upload Outcome
// =============================================================================

/// Per-piece completion report for an upload or repair dispatch.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Piece indices with an acknowledged placement, ascending
    pub placed: Vec<u32>,

    /// Piece indices whose transfer failed, with the host that failed
    pub failed: Vec<(u32, HostId)>,
}

// =============================================================================
// Upload Manager
// =============================================================================

/// Pushes encoded pieces to hosts and tracks per-piece completion.
pub struct UploadManager {
    config: UploadConfig,
    piece_map: Arc<PieceMap>,
    registry: Arc<dyn HostRegistry>,
    transport: Arc<dyn PieceTransport>,
}

impl UploadManager {
    pub fn new(
        config: UploadConfig,
        piece_map: Arc<PieceMap>,
        registry: Arc<dyn HostRegistry>,
        transport: Arc<dyn PieceTransport>,
    ) -> Self {
        Self {
            config,
            piece_map,
            registry,
            transport,
        }
    }

    /// Encode `source` and upload one piece per distinct target host.
    ///
    /// Preconditions: `target_hosts.len() >= k` (distinct hosts) and
    /// `source.len() == meta.length`. If fewer hosts than `k + m` are
    /// given, the unassigned tail indices are left for repair.
    #[instrument(skip(self, meta, source, target_hosts), fields(file = %meta.id, len = source.len()))]
    pub async fn upload(
        &self,
        meta: &FileMeta,
        source: &[u8],
        target_hosts: &[HostId],
    ) -> Result<UploadOutcome> {
        let k = meta.data_pieces;
        if target_hosts.len() < k {
            return Err(Error::InsufficientHosts {
                available: target_hosts.len(),
                required: k,
            });
        }
        if source.len() as u64 != meta.length {
            return Err(Error::Internal(format!(
                "source length {} does not match file length {}",
                source.len(),
                meta.length
            )));
        }

        let codec = EcCodec::new(k, meta.parity_pieces)?;
        let pieces: Vec<Bytes> = codec
            .encode(source)?
            .into_iter()
            .map(Bytes::from)
            .collect();

        let batch: Vec<(u32, HostId, Bytes)> = pieces
            .into_iter()
            .enumerate()
            .zip(target_hosts.iter())
            .map(|((index, data), host)| (index as u32, *host, data))
            .collect();

        let outcome = self.dispatch(meta.id, batch).await;

        debug!(
            file = %meta.id,
            placed = outcome.placed.len(),
            failed = outcome.failed.len(),
            "upload dispatch finished"
        );

        if outcome.placed.len() < k {
            return Err(Error::InsufficientHosts {
                available: outcome.placed.len(),
                required: k,
            });
        }
        Ok(outcome)
    }

    /// Upload an explicit set of `(index, host, data)` assignments.
    ///
    /// Used by repair to restore specific missing indices. Failures are
    /// reported, not retried here.
    #[instrument(skip(self, batch), fields(file = %file, pieces = batch.len()))]
    pub async fn upload_pieces(
        &self,
        file: FileId,
        batch: Vec<(u32, HostId, Bytes)>,
    ) -> Result<UploadOutcome> {
        Ok(self.dispatch(file, batch).await)
    }

    /// Dispatch every assignment concurrently; record placements on ack.
    async fn dispatch(&self, file: FileId, batch: Vec<(u32, HostId, Bytes)>) -> UploadOutcome {
        let mut join = JoinSet::new();
        for (index, host, data) in batch {
            let transport = self.transport.clone();
            let timeout = self.config.put_timeout;
            join.spawn(async move {
                let result = transport.put_piece(host, file, index, data, timeout).await;
                (index, host, result)
            });
        }

        let mut placed = Vec::new();
        let mut failed = Vec::new();
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((index, host, Ok(()))) => {
                    if let Err(e) = self.piece_map.record_placement(file, index, host) {
                        // File deleted mid-upload; stop recording.
                        warn!(file = %file, error = %e, "dropping placement record");
                        continue;
                    }
                    placed.push(index);
                }
                Ok((index, host, Err(e))) => {
                    warn!(file = %file, index, host = %host, error = %e, "piece transfer failed");
                    failed.push((index, host));
                }
                Err(e) => {
                    warn!(file = %file, error = %e, "piece transfer task aborted");
                }
            }
        }
        placed.sort_unstable();
        failed.sort_unstable_by_key(|(index, _)| *index);
        UploadOutcome { placed, failed }
    }

    // =========================================================================
    // Redundancy Reporting
    // =========================================================================

    /// Current redundancy of `file` against a fresh live-host snapshot.
    pub async fn redundancy(&self, file: FileId) -> Result<f64> {
        let live = self.registry.live_hosts().await?;
        self.piece_map.redundancy(file, &live)
    }

    /// Block until `redundancy(file) >= target` or the timeout expires.
    ///
    /// Bounded polling; the caller is released with
    /// [`Error::WaitTimeout`] on expiry and [`Error::Unrecoverable`] if
    /// the file becomes terminally lost while waiting.
    #[instrument(skip(self), fields(file = %file, target))]
    pub async fn wait_for_redundancy(
        &self,
        file: FileId,
        target: f64,
        timeout: Duration,
    ) -> Result<()> {
        let poll = self.config.redundancy_poll_interval;
        tokio::time::timeout(timeout, async {
            loop {
                if self.piece_map.health(file)? == FileHealth::Unrecoverable {
                    return Err(Error::Unrecoverable { file });
                }
                if self.redundancy(file).await? >= target {
                    return Ok(());
                }
                tokio::time::sleep(poll).await;
            }
        })
        .await
        .map_err(|_| {
            Error::WaitTimeout(format!(
                "redundancy of {} did not reach {:.2} within {:?}",
                file, target, timeout
            ))
        })?
    }
}

// =============================================================================
// Tests
// =============================================================================
