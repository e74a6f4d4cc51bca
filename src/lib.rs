//! shardkeeper - Redundancy Maintenance and Repair Engine
//!
//! Renter-side core for an erasure-coded distributed file-storage
//! network: files are split into `k` data + `m` parity pieces spread
//! across independent, unreliable hosts, and this crate keeps each file's
//! redundancy at target as hosts come and go.
//!
//! # Architecture
//!
//! ```text
//! Host events ──▶ RepairScheduler ──▶ UploadManager ──▶ PieceMap
//!                     │    ▲                               │
//!                     ▼    └── source bytes ◀── redundancy reads
//!               DownloadManager / LocalStore
//! ```
//!
//! The [`renter::Renter`] facade wires the pieces together and is the
//! surface callers use: upload, download, redundancy queries, and bounded
//! waits on redundancy transitions.
//!
//! # Modules
//!
//! - [`adapters`] - In-memory adapters implementing the domain ports
//! - [`domain`] - Ports, value objects, and domain events
//! - [`ec`] - Erasure coding codec (Reed-Solomon)
//! - [`error`] - Error types
//! - [`placement`] - Piece placement map and redundancy accounting
//! - [`renter`] - Caller-facing facade
//! - [`repair`] - Repair scheduler and health state machine
//! - [`transfer`] - Upload and download managers

pub mod adapters;
pub mod domain;
pub mod ec;
pub mod error;
pub mod placement;
pub mod renter;
pub mod repair;
pub mod transfer;

// Re-export commonly used types
pub use domain::{FileId, FileMeta, HostEvent, HostId, RepairEvent, RepairSource};
pub use error::{Error, Result};
pub use placement::{FileHealth, PieceMap};
pub use renter::{FileInfo, Renter, RenterConfig};
pub use repair::{RepairConfig, RepairScheduler};
pub use transfer::{DownloadManager, UploadManager};
