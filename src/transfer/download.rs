//! Download Manager
//!
//! Fetches a sufficient subset of live pieces and reconstructs the
//! original bytes. Correctness does not depend on *which* pieces survive:
//! any `k` distinct indices reconstruct the file, which is the defining
//! property of the erasure code and is exercised by the tests below with
//! different surviving subsets.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};

use crate::domain::{FileId, HostRegistry, PieceTransport};
use crate::ec::EcCodec;
use crate::error::{Error, Result};
use crate::placement::PieceMap;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the download manager
#[derive(Debug, Clone)]
pub struct DownloadConfig {
    /// Timeout for fetching a single piece from one host
    pub get_timeout: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            get_timeout: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Download Manager
// =============================================================================

/// Reconstructs file bytes from live remote pieces.
pub struct DownloadManager {
    config: DownloadConfig,
    piece_map: Arc<PieceMap>,
    registry: Arc<dyn HostRegistry>,
    transport: Arc<dyn PieceTransport>,
}

impl DownloadManager {
    pub fn new(
        config: DownloadConfig,
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

    /// Download and reconstruct `file`.
    ///
    /// Picks one live holder per distinct piece index (the choice among
    /// replicas is arbitrary), fetches them concurrently, and decodes once
    /// at least `k` pieces arrived. Fails with
    /// [`Error::InsufficientPieces`] when fewer than `k` distinct indices
    /// are retrievable.
    #[instrument(skip(self), fields(file = %file))]
    pub async fn download(&self, file: FileId) -> Result<Vec<u8>> {
        let meta = self.piece_map.meta(file)?;
        let k = meta.data_pieces;
        let total = meta.total_pieces();

        let live = self.registry.live_hosts().await?;
        let holders = self.piece_map.live_holders(file, &live)?;
        if holders.len() < k {
            return Err(Error::InsufficientPieces {
                available: holders.len(),
                required: k,
            });
        }

        // Fetch every retrievable index concurrently; tolerating
        // individual failures as long as k pieces arrive.
        let mut join = JoinSet::new();
        for (index, host) in holders {
            let transport = self.transport.clone();
            let timeout = self.config.get_timeout;
            join.spawn(async move {
                let result = transport.get_piece(host, file, index, timeout).await;
                (index, host, result)
            });
        }

        let mut slots: Vec<Option<Vec<u8>>> = vec![None; total];
        let mut fetched = 0usize;
        while let Some(joined) = join.join_next().await {
            match joined {
                Ok((index, _host, Ok(data))) => {
                    slots[index as usize] = Some(data.to_vec());
                    fetched += 1;
                }
                Ok((index, host, Err(e))) => {
                    warn!(file = %file, index, host = %host, error = %e, "piece fetch failed");
                }
                Err(e) => {
                    warn!(file = %file, error = %e, "piece fetch task aborted");
                }
            }
        }

        if fetched < k {
            return Err(Error::InsufficientPieces {
                available: fetched,
                required: k,
            });
        }

        debug!(file = %file, fetched, total, "reconstructing from fetched pieces");

        let codec = EcCodec::new(k, meta.parity_pieces)?;
        codec
            .decode(&mut slots, meta.length as usize)
            .map_err(|e| match e {
                Error::InsufficientPieces { .. } => e,
                other => Error::ReconstructionFailed {
                    file,
                    reason: other.to_string(),
                },
            })
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::{MemoryHostRegistry, MemoryTransport};
    use crate::domain::{FileMeta, HostId};
    use crate::transfer::upload::{UploadConfig, UploadManager};
    use assert_matches::assert_matches;
    use chrono::Utc;

    struct Rig {
        piece_map: Arc<PieceMap>,
        registry: Arc<MemoryHostRegistry>,
        uploads: UploadManager,
        downloads: DownloadManager,
    }

    fn setup() -> Rig {
        let piece_map = Arc::new(PieceMap::new());
        let registry = MemoryHostRegistry::new();
        let transport = MemoryTransport::new(registry.clone());
        let uploads = UploadManager::new(
            UploadConfig::default(),
            piece_map.clone(),
            registry.clone(),
            transport.clone(),
        );
        let downloads = DownloadManager::new(
            DownloadConfig::default(),
            piece_map.clone(),
            registry.clone(),
            transport,
        );
        Rig {
            piece_map,
            registry,
            uploads,
            downloads,
        }
    }

    async fn upload_fixture(rig: &Rig, k: usize, m: usize, data: &[u8]) -> (FileId, Vec<HostId>) {
        let hosts = rig.registry.add_hosts(k + m);
        let meta = FileMeta {
            id: FileId::generate(),
            length: data.len() as u64,
            data_pieces: k,
            parity_pieces: m,
            local_path: None,
            uploaded_at: Utc::now(),
        };
        rig.piece_map.insert_file(meta.clone());
        rig.uploads.upload(&meta, data, &hosts).await.unwrap();
        (meta.id, hosts)
    }

    #[tokio::test]
    async fn test_download_roundtrip() {
        let rig = setup();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let (file, _) = upload_fixture(&rig, 4, 2, &data).await;

        let recovered = rig.downloads.download(file).await.unwrap();
        assert_eq!(recovered, data);
    }

    #[tokio::test]
    async fn test_download_succeeds_for_every_surviving_pair() {
        // k=2, m=2: every 2-host survivor subset must reconstruct.
        let data: Vec<u8> = (0..537u32).map(|i| (i * 7 % 256) as u8).collect();

        for (a, b) in [(0, 1), (0, 2), (0, 3), (1, 2), (1, 3), (2, 3)] {
            let rig = setup();
            let (file, hosts) = upload_fixture(&rig, 2, 2, &data).await;

            for (i, host) in hosts.iter().enumerate() {
                if i != a && i != b {
                    rig.registry.remove_host(*host);
                }
            }

            let recovered = rig.downloads.download(file).await.unwrap();
            assert_eq!(recovered, data, "failed with survivors ({}, {})", a, b);
        }
    }

    #[tokio::test]
    async fn test_download_insufficient_pieces() {
        let rig = setup();
        let data = vec![42u8; 300];
        let (file, hosts) = upload_fixture(&rig, 2, 1, &data).await;

        rig.registry.remove_host(hosts[0]);
        rig.registry.remove_host(hosts[1]);

        let result = rig.downloads.download(file).await;
        assert_matches!(
            result,
            Err(Error::InsufficientPieces {
                available: 1,
                required: 2
            })
        );
    }

    #[tokio::test]
    async fn test_download_unknown_file() {
        let rig = setup();
        assert_matches!(
            rig.downloads.download(FileId::generate()).await,
            Err(Error::FileNotFound(_))
        );
    }
}
