//! Erasure Coding Codec
//!
//! Reed-Solomon encoding and decoding using the `reed-solomon-erasure`
//! crate. Splits file bytes into `k` data pieces plus `m` parity pieces
//! and reconstructs the original bytes from any `k` survivors.

use reed_solomon_erasure::galois_8::ReedSolomon;
use tracing::{debug, instrument};

use crate::error::{Error, Result};

/// Erasure coding codec for a fixed `(data_pieces, parity_pieces)` split.
///
/// Encoding is deterministic: the same input always yields the same
/// pieces, which lets repair regenerate a missing piece byte-identical to
/// the one originally uploaded.
#[derive(Debug)]
pub struct EcCodec {
    /// Reed-Solomon codec instance
    rs: ReedSolomon,
    /// Number of data pieces (k)
    data_pieces: usize,
    /// Number of parity pieces (m)
    parity_pieces: usize,
}

impl EcCodec {
    /// Create a codec for the given k+m configuration.
    pub fn new(data_pieces: usize, parity_pieces: usize) -> Result<Self> {
        if data_pieces == 0 {
            return Err(Error::InvalidEcConfig(
                "data_pieces must be greater than 0".to_string(),
            ));
        }
        if parity_pieces == 0 {
            return Err(Error::InvalidEcConfig(
                "parity_pieces must be greater than 0".to_string(),
            ));
        }

        let rs = ReedSolomon::new(data_pieces, parity_pieces).map_err(|e| {
            Error::InvalidEcConfig(format!("Failed to create Reed-Solomon codec: {}", e))
        })?;

        Ok(Self {
            rs,
            data_pieces,
            parity_pieces,
        })
    }

    /// Number of data pieces (k).
    pub fn data_pieces(&self) -> usize {
        self.data_pieces
    }

    /// Number of parity pieces (m).
    pub fn parity_pieces(&self) -> usize {
        self.parity_pieces
    }

    /// Total number of pieces (k + m).
    pub fn total_pieces(&self) -> usize {
        self.data_pieces + self.parity_pieces
    }

    /// Size of each piece for an input of `data_len` bytes.
    pub fn piece_size(&self, data_len: usize) -> usize {
        data_len.div_ceil(self.data_pieces)
    }

    /// Encode data into `k + m` equally sized pieces.
    ///
    /// The input is padded up to a multiple of the piece size; callers
    /// must remember the original length to trim it back on decode.
    #[instrument(skip(self, data), fields(data_len = data.len()))]
    pub fn encode(&self, data: &[u8]) -> Result<Vec<Vec<u8>>> {
        if data.is_empty() {
            return Err(Error::EncodingFailed(
                "cannot encode zero-length input".to_string(),
            ));
        }

        let piece_size = self.piece_size(data.len());
        let mut pieces: Vec<Vec<u8>> = Vec::with_capacity(self.total_pieces());

        for i in 0..self.data_pieces {
            let start = i * piece_size;
            let end = std::cmp::min(start + piece_size, data.len());

            let mut piece = if start < data.len() {
                data[start..end].to_vec()
            } else {
                Vec::new()
            };

            piece.resize(piece_size, 0);
            pieces.push(piece);
        }

        for _ in 0..self.parity_pieces {
            pieces.push(vec![0u8; piece_size]);
        }

        self.rs
            .encode(&mut pieces)
            .map_err(|e| Error::EncodingFailed(format!("Reed-Solomon encoding failed: {}", e)))?;

        debug!(
            "Encoded {} bytes into {} pieces of {} bytes each",
            data.len(),
            self.total_pieces(),
            piece_size
        );

        Ok(pieces)
    }

    /// Decode the original bytes from a partially populated piece set.
    ///
    /// `pieces` must have `k + m` slots indexed by piece index, `None` for
    /// missing pieces. At least `k` present pieces are required; any `k`
    /// suffice regardless of which indices survive.
    #[instrument(skip(self, pieces), fields(original_len))]
    pub fn decode(&self, pieces: &mut [Option<Vec<u8>>], original_len: usize) -> Result<Vec<u8>> {
        self.check_piece_slots(pieces)?;

        self.rs.reconstruct_data(pieces).map_err(|e| {
            Error::EncodingFailed(format!("Reed-Solomon data reconstruction failed: {}", e))
        })?;

        let mut data = Vec::with_capacity(original_len);
        for piece in pieces.iter().take(self.data_pieces).flatten() {
            data.extend_from_slice(piece);
        }
        data.truncate(original_len);

        Ok(data)
    }

    /// Reconstruct every missing piece in place (data and parity).
    ///
    /// Used by repair when regenerating pieces for re-upload without going
    /// through a full decode/encode cycle.
    #[instrument(skip(self, pieces))]
    pub fn reconstruct(&self, pieces: &mut [Option<Vec<u8>>]) -> Result<()> {
        self.check_piece_slots(pieces)?;

        let available = pieces.iter().filter(|p| p.is_some()).count();
        self.rs.reconstruct(pieces).map_err(|e| {
            Error::EncodingFailed(format!("Reed-Solomon reconstruction failed: {}", e))
        })?;

        debug!(
            "Reconstructed pieces from {}/{} available",
            available,
            self.total_pieces()
        );

        Ok(())
    }

    fn check_piece_slots(&self, pieces: &[Option<Vec<u8>>]) -> Result<()> {
        if pieces.len() != self.total_pieces() {
            return Err(Error::InvalidEcConfig(format!(
                "Expected {} piece slots, got {}",
                self.total_pieces(),
                pieces.len()
            )));
        }

        let available = pieces.iter().filter(|p| p.is_some()).count();
        if available < self.data_pieces {
            return Err(Error::InsufficientPieces {
                available,
                required: self.data_pieces,
            });
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
