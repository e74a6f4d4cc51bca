//! Error types for the shardkeeper renter engine.

use std::time::Duration;

use thiserror::Error;

use crate::domain::{FileId, HostId};

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the renter engine.
///
/// Per-host transfer failures (`HostUnreachable`, `TransferTimeout`,
/// `PieceNotFound`) are absorbed and retried inside the upload/repair
/// machinery; only policy-level failures propagate to callers.
#[derive(Error, Debug)]
pub enum Error {
    /// Upload cannot reach the data-piece minimum with the hosts available
    #[error("Insufficient hosts for upload: have {available}, need {required}")]
    InsufficientHosts { available: usize, required: usize },

    /// Download/reconstruction cannot reach the data-piece minimum
    #[error("Insufficient pieces for reconstruction: have {available}, need {required}")]
    InsufficientPieces { available: usize, required: usize },

    /// A single host operation exceeded its deadline
    #[error("Transfer to host {host} timed out after {timeout:?}")]
    TransferTimeout { host: HostId, timeout: Duration },

    /// A host refused or dropped a transfer
    #[error("Host {host} is unreachable")]
    HostUnreachable { host: HostId },

    /// A host does not hold the requested piece
    #[error("Piece {index} of file {file} not found on host {host}")]
    PieceNotFound {
        file: FileId,
        index: u32,
        host: HostId,
    },

    /// Redundancy fell below 1.0 with no repair path; terminal for the file
    #[error("File {file} is unrecoverable: fewer than the required data pieces remain and no local copy exists")]
    Unrecoverable { file: FileId },

    /// A bounded wait expired before its condition held
    #[error("Wait timed out: {0}")]
    WaitTimeout(String),

    /// File is not tracked by this renter
    #[error("File not found: {0}")]
    FileNotFound(FileId),

    /// No local copy exists at the recorded path
    #[error("Local copy not found: {0}")]
    LocalCopyNotFound(String),

    /// Invalid erasure coding configuration
    #[error("Invalid erasure coding configuration: {0}")]
    InvalidEcConfig(String),

    /// Erasure encoding failed
    #[error("Erasure encoding failed: {0}")]
    EncodingFailed(String),

    /// Reconstruction from surviving pieces failed
    #[error("Reconstruction failed for file {file}: {reason}")]
    ReconstructionFailed { file: FileId, reason: String },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
