//! Domain Ports (Port/Adapter Pattern)
//!
//! This module defines the core abstractions (ports) that the renter engine
//! depends on. Infrastructure adapters implement these traits to provide
//! concrete implementations — a real network stack in production, the
//! in-memory simulation in [`crate::adapters::memory`] for tests and demos.
//!
//! The engine never owns hosts: they are referenced weakly by [`HostId`]
//! and their lifecycle (join/leave/crash) is driven entirely by the
//! [`HostRegistry`] implementation.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::domain::events::HostEvent;
use crate::error::Result;

// =============================================================================
// Value Objects
// =============================================================================

/// File identifier (value object).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileId(pub Uuid);

impl FileId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for FileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host identifier (value object).
///
/// Hosts are external storage providers; the renter only ever refers to
/// them by identifier and never owns their state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HostId(pub Uuid);

impl HostId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata for an uploaded file.
///
/// The identifier, length and `(data_pieces, parity_pieces)` split are
/// fixed at upload time; only piece *placement* changes afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMeta {
    /// Unique file identifier
    pub id: FileId,

    /// Total byte length of the original data
    pub length: u64,

    /// Number of data pieces (k)
    pub data_pieces: usize,

    /// Number of parity pieces (m)
    pub parity_pieces: usize,

    /// Path of the local copy, if one was recorded at upload time.
    /// Repair prefers this source over remote reconstruction.
    pub local_path: Option<String>,

    /// When the upload was started
    pub uploaded_at: DateTime<Utc>,
}

impl FileMeta {
    /// Total number of erasure-coded pieces (k + m).
    pub fn total_pieces(&self) -> usize {
        self.data_pieces + self.parity_pieces
    }

    /// Redundancy when every piece index has a live placement:
    /// `(k + m) / k`.
    pub fn target_redundancy(&self) -> f64 {
        self.total_pieces() as f64 / self.data_pieces as f64
    }
}

// =============================================================================
// Host Registry Port
// =============================================================================

/// Port for host membership and liveness.
///
/// Implementations may learn about liveness transitions by push
/// notification or by polling; the repair scheduler consumes both the
/// snapshot and the event stream and stays correct with either signal
/// alone (events trigger an immediate check, the periodic sweep covers
/// anything missed).
#[async_trait]
pub trait HostRegistry: Send + Sync {
    /// Snapshot of the hosts currently considered live.
    async fn live_hosts(&self) -> Result<HashSet<HostId>>;

    /// Subscribe to liveness transitions.
    ///
    /// The channel is lossy under sustained lag (it is a broadcast ring);
    /// subscribers must treat it as a hint and rely on [`Self::live_hosts`]
    /// snapshots for ground truth.
    fn subscribe(&self) -> broadcast::Receiver<HostEvent>;
}

// =============================================================================
// Piece Transport Port
// =============================================================================

/// Port for moving pieces to and from hosts.
///
/// Both operations carry a caller-specified timeout; implementations must
/// return [`crate::Error::TransferTimeout`] when it expires rather than
/// blocking indefinitely.
#[async_trait]
pub trait PieceTransport: Send + Sync {
    /// Store one piece on a host. Returns only after the host has
    /// acknowledged durable receipt.
    async fn put_piece(
        &self,
        host: HostId,
        file: FileId,
        index: u32,
        data: Bytes,
        timeout: Duration,
    ) -> Result<()>;

    /// Fetch one piece from a host.
    async fn get_piece(
        &self,
        host: HostId,
        file: FileId,
        index: u32,
        timeout: Duration,
    ) -> Result<Bytes>;
}

// =============================================================================
// Local Store Port
// =============================================================================

/// Port for the renter's local copies of uploaded files.
///
/// A readable local copy is the cheap repair source; when it is missing
/// the repair scheduler falls back to remote reconstruction.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Read the full local copy at `path`, or
    /// [`crate::Error::LocalCopyNotFound`].
    async fn read_local_copy(&self, path: &str) -> Result<Bytes>;

    /// Write a local copy (used by the demo binary and tests to seed data).
    async fn write_local_copy(&self, path: &str, data: Bytes) -> Result<()>;

    /// Remove the local copy at `path`.
    async fn delete_local_copy(&self, path: &str) -> Result<()>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_meta_derived_values() {
        let meta = FileMeta {
            id: FileId::generate(),
            length: 100,
            data_pieces: 1,
            parity_pieces: 4,
            local_path: None,
            uploaded_at: Utc::now(),
        };

        assert_eq!(meta.total_pieces(), 5);
        assert!((meta.target_redundancy() - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_target_redundancy_asymmetric_split() {
        let meta = FileMeta {
            id: FileId::generate(),
            length: 4096,
            data_pieces: 4,
            parity_pieces: 2,
            local_path: Some("/tmp/f".to_string()),
            uploaded_at: Utc::now(),
        };

        assert!((meta.target_redundancy() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_ids_are_unique_and_displayable() {
        let a = FileId::generate();
        let b = FileId::generate();
        assert_ne!(a, b);
        assert_eq!(a.to_string().len(), 36);

        let h = HostId::generate();
        assert_eq!(h.to_string(), h.0.to_string());
    }
}
