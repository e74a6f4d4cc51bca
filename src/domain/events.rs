//! Domain Events
//!
//! Immutable records of significant occurrences: host membership changes
//! flowing *into* the engine, and repair lifecycle notifications flowing
//! *out* of it. Both are serializable so they can be logged or shipped to
//! an external audit sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::ports::{FileId, HostId};

// =============================================================================
// Host Events
// =============================================================================

/// A host membership / liveness transition.
///
/// These are asynchronous external events; the engine reacts to them but
/// never initiates them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HostEvent {
    /// A host joined or came back up.
    HostAdded {
        host: HostId,
        timestamp: DateTime<Utc>,
    },

    /// A host left or went down. Its placements stop counting toward
    /// redundancy immediately.
    HostRemoved {
        host: HostId,
        timestamp: DateTime<Utc>,
    },
}

impl HostEvent {
    /// The host this event concerns.
    pub fn host(&self) -> HostId {
        match self {
            HostEvent::HostAdded { host, .. } => *host,
            HostEvent::HostRemoved { host, .. } => *host,
        }
    }

    /// Convenience constructor stamped with the current time.
    pub fn added(host: HostId) -> Self {
        HostEvent::HostAdded {
            host,
            timestamp: Utc::now(),
        }
    }

    /// Convenience constructor stamped with the current time.
    pub fn removed(host: HostId) -> Self {
        HostEvent::HostRemoved {
            host,
            timestamp: Utc::now(),
        }
    }
}

// =============================================================================
// Repair Events
// =============================================================================

/// Where repair sourced the file bytes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RepairSource {
    /// Read from the local on-disk copy (cheap path).
    LocalCopy,
    /// Reconstructed from surviving remote pieces.
    RemoteReconstruction,
}

/// Repair lifecycle notifications emitted by the scheduler.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RepairEvent {
    /// A repair round began for a file.
    RepairStarted {
        file: FileId,
        missing: Vec<u32>,
        source: RepairSource,
        timestamp: DateTime<Utc>,
    },

    /// A repair round restored the file to target redundancy.
    RepairCompleted {
        file: FileId,
        restored: Vec<u32>,
        redundancy: f64,
        timestamp: DateTime<Utc>,
    },

    /// Bounded retries were exhausted; operator attention is needed but
    /// the file remains reconstructable and repair resumes on the next
    /// host-set change.
    RepairEscalated {
        file: FileId,
        attempts: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// Live distinct pieces fell below the data-piece minimum with no
    /// local copy. Terminal; the file must be re-uploaded.
    FileUnrecoverable {
        file: FileId,
        live_pieces: usize,
        required: usize,
        timestamp: DateTime<Utc>,
    },
}

impl RepairEvent {
    /// The file this event concerns.
    pub fn file(&self) -> FileId {
        match self {
            RepairEvent::RepairStarted { file, .. }
            | RepairEvent::RepairCompleted { file, .. }
            | RepairEvent::RepairEscalated { file, .. }
            | RepairEvent::FileUnrecoverable { file, .. } => *file,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_event_accessors() {
        let host = HostId::generate();
        assert_eq!(HostEvent::added(host).host(), host);
        assert_eq!(HostEvent::removed(host).host(), host);
    }

    #[test]
    fn test_events_serialize_with_type_tag() {
        let event = RepairEvent::RepairStarted {
            file: FileId::generate(),
            missing: vec![2, 4],
            source: RepairSource::LocalCopy,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"RepairStarted\""));
        assert!(json.contains("\"LocalCopy\""));
    }
}
