//! Placement tracking and redundancy accounting.
//!
//! The [`PieceMap`] is the single source of truth for which hosts hold
//! which erasure-coded piece indices. Redundancy is never stored: every
//! read recomputes it from a placement snapshot intersected with the live
//! host set, so a dead host's placements are never counted even before
//! the repair scheduler prunes them.

pub mod piece_map;

pub use piece_map::PieceMap;

use serde::{Deserialize, Serialize};

// =============================================================================
// File Health
// =============================================================================

/// Health state of a tracked file, driven by the repair scheduler.
///
/// `Unrecoverable` is terminal: it is entered when live distinct pieces
/// drop below the data-piece minimum with no local copy, and left only by
/// deleting and re-uploading the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FileHealth {
    /// Redundancy is at target.
    #[default]
    Healthy,
    /// Redundancy fell below target but the file can still be repaired.
    Degraded,
    /// A repair round is in flight.
    Repairing,
    /// Data is permanently lost; requires re-upload from an external source.
    Unrecoverable,
}

impl std::fmt::Display for FileHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileHealth::Healthy => write!(f, "Healthy"),
            FileHealth::Degraded => write!(f, "Degraded"),
            FileHealth::Repairing => write!(f, "Repairing"),
            FileHealth::Unrecoverable => write!(f, "Unrecoverable"),
        }
    }
}
