//! Piece Placement Map
//!
//! Tracks, per file, which erasure-coded piece indices are stored on
//! which hosts. Files live in a `DashMap` arena keyed by [`FileId`];
//! each entry's placement set is guarded by its own `parking_lot::RwLock`
//! (single writer, multiple readers, guards never held across awaits).
//! Hosts are referenced weakly by identifier only, which keeps the
//! File ↔ Placement ↔ Host relation free of ownership cycles.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::domain::{FileId, FileMeta, HostId};
use crate::error::{Error, Result};
use crate::placement::FileHealth;

// =============================================================================
// File Entry
// =============================================================================

/// Per-file placement state: one host set per piece index, plus the
/// health record maintained by the repair scheduler.
struct FileEntry {
    meta: FileMeta,
    /// Indexed by piece index; a piece may be replicated to several hosts
    /// but counts once per distinct index in the redundancy formula.
    placements: RwLock<Vec<HashSet<HostId>>>,
    health: RwLock<FileHealth>,
}

impl FileEntry {
    fn new(meta: FileMeta) -> Self {
        let slots = meta.total_pieces();
        Self {
            meta,
            placements: RwLock::new(vec![HashSet::new(); slots]),
            health: RwLock::new(FileHealth::Healthy),
        }
    }
}

// =============================================================================
// Piece Map
// =============================================================================

/// Placement state for all files known to one renter instance.
///
/// Exclusively owns placement; scoped to the renter, never global.
#[derive(Default)]
pub struct PieceMap {
    files: DashMap<FileId, Arc<FileEntry>>,
}

impl PieceMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, file: FileId) -> Result<Arc<FileEntry>> {
        self.files
            .get(&file)
            .map(|e| e.value().clone())
            .ok_or(Error::FileNotFound(file))
    }

    // =========================================================================
    // File Lifecycle
    // =========================================================================

    /// Start tracking a file with empty placements.
    pub fn insert_file(&self, meta: FileMeta) {
        debug!(file = %meta.id, k = meta.data_pieces, m = meta.parity_pieces, "tracking file");
        self.files.insert(meta.id, Arc::new(FileEntry::new(meta)));
    }

    /// Stop tracking a file and release all of its placements.
    pub fn remove_file(&self, file: FileId) -> Result<()> {
        self.files
            .remove(&file)
            .map(|_| ())
            .ok_or(Error::FileNotFound(file))
    }

    /// Metadata snapshot for a tracked file.
    pub fn meta(&self, file: FileId) -> Result<FileMeta> {
        Ok(self.entry(file)?.meta.clone())
    }

    /// All currently tracked files.
    pub fn files(&self) -> Vec<FileId> {
        self.files.iter().map(|e| *e.key()).collect()
    }

    // =========================================================================
    // Placement Mutation
    // =========================================================================

    /// Record that `host` durably holds piece `index` of `file`.
    ///
    /// Called only after the host acknowledged receipt.
    pub fn record_placement(&self, file: FileId, index: u32, host: HostId) -> Result<()> {
        let entry = self.entry(file)?;
        let mut placements = entry.placements.write();

        let slot = placements
            .get_mut(index as usize)
            .ok_or_else(|| Error::Internal(format!("piece index {} out of range", index)))?;
        slot.insert(host);
        Ok(())
    }

    /// Drop every placement referring to `host` across all files.
    ///
    /// Returns the files that lost at least one placement. Each file's
    /// placement set is updated atomically under its write lock, so no
    /// reader observes a half-pruned set.
    pub fn prune_host(&self, host: HostId) -> Vec<FileId> {
        let mut affected = Vec::new();
        for entry in self.files.iter() {
            let mut placements = entry.value().placements.write();
            let mut touched = false;
            for slot in placements.iter_mut() {
                touched |= slot.remove(&host);
            }
            if touched {
                affected.push(*entry.key());
            }
        }
        if !affected.is_empty() {
            debug!(host = %host, files = affected.len(), "pruned placements for host");
        }
        affected
    }

    // =========================================================================
    // Redundancy Reads
    // =========================================================================

    /// Current redundancy of `file` against a live-host snapshot:
    /// distinct piece indices with at least one live placement, divided by
    /// the data-piece count. Duplicate placements of one index count once.
    ///
    /// Pure read over a consistent snapshot; never cached.
    pub fn redundancy(&self, file: FileId, live: &HashSet<HostId>) -> Result<f64> {
        let entry = self.entry(file)?;
        let live_indices = Self::count_live_indices(&entry, live);
        Ok(live_indices as f64 / entry.meta.data_pieces as f64)
    }

    /// Number of distinct piece indices with at least one live placement.
    pub fn live_piece_count(&self, file: FileId, live: &HashSet<HostId>) -> Result<usize> {
        let entry = self.entry(file)?;
        Ok(Self::count_live_indices(&entry, live))
    }

    fn count_live_indices(entry: &FileEntry, live: &HashSet<HostId>) -> usize {
        entry
            .placements
            .read()
            .iter()
            .filter(|slot| slot.iter().any(|h| live.contains(h)))
            .count()
    }

    /// Piece indices with no live placement, in ascending order.
    ///
    /// This is the repair work list; ascending order is the mandated
    /// tie-break when hosts are scarce.
    pub fn missing_indices(&self, file: FileId, live: &HashSet<HostId>) -> Result<Vec<u32>> {
        let entry = self.entry(file)?;
        let placements = entry.placements.read();
        Ok(placements
            .iter()
            .enumerate()
            .filter(|(_, slot)| !slot.iter().any(|h| live.contains(h)))
            .map(|(i, _)| i as u32)
            .collect())
    }

    /// One live holder per present piece index, ascending by index.
    ///
    /// The choice among a piece's live replicas is arbitrary; downloads
    /// only need a sufficient count of distinct indices.
    pub fn live_holders(&self, file: FileId, live: &HashSet<HostId>) -> Result<Vec<(u32, HostId)>> {
        let entry = self.entry(file)?;
        let placements = entry.placements.read();
        Ok(placements
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| {
                slot.iter()
                    .find(|h| live.contains(h))
                    .map(|h| (i as u32, *h))
            })
            .collect())
    }

    /// Hosts holding at least one piece of `file`.
    ///
    /// Repair excludes these when picking replacement hosts so distinct
    /// pieces land on distinct hosts.
    pub fn placed_hosts(&self, file: FileId) -> Result<HashSet<HostId>> {
        let entry = self.entry(file)?;
        let placements = entry.placements.read();
        Ok(placements.iter().flatten().copied().collect())
    }

    /// Per-index live placement counts (for status reporting).
    pub fn placement_counts(&self, file: FileId, live: &HashSet<HostId>) -> Result<Vec<usize>> {
        let entry = self.entry(file)?;
        let placements = entry.placements.read();
        Ok(placements
            .iter()
            .map(|slot| slot.iter().filter(|h| live.contains(h)).count())
            .collect())
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Current health of `file`.
    pub fn health(&self, file: FileId) -> Result<FileHealth> {
        Ok(*self.entry(file)?.health.read())
    }

    /// Transition `file` to `health`. `Unrecoverable` is terminal: once
    /// entered, every transition except deletion is ignored.
    pub fn set_health(&self, file: FileId, health: FileHealth) -> Result<FileHealth> {
        let entry = self.entry(file)?;
        let mut current = entry.health.write();
        if *current == FileHealth::Unrecoverable {
            return Ok(*current);
        }
        *current = health;
        Ok(*current)
    }
}

// =============================================================================
// Tests
// =============================================================================
