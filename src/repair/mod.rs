//! Redundancy repair.
//!
//! The [`RepairScheduler`] watches host membership against the piece map,
//! detects redundancy deficits, and drives recovery: it sources file
//! bytes (local copy first, remote reconstruction otherwise), re-encodes,
//! and re-uploads the missing piece indices through the upload manager.

pub mod scheduler;

pub use scheduler::{RepairConfig, RepairScheduler};
