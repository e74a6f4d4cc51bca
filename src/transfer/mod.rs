//! Piece transfer: initial upload and reconstruction downloads.
//!
//! - **UploadManager** (`upload.rs`): encodes source bytes and pushes one
//!   piece per distinct host concurrently, recording placements only on
//!   acknowledged receipt.
//! - **DownloadManager** (`download.rs`): fetches any sufficient subset of
//!   live pieces and reconstructs the original bytes.
//!
//! Transfers to different hosts are independent failure domains: one slow
//! or unreachable host never blocks or cancels the others.

pub mod download;
pub mod upload;

pub use download::{DownloadConfig, DownloadManager};
pub use upload::{UploadConfig, UploadManager, UploadOutcome};
