//! Erasure Coding Module
//!
//! Wraps the `reed-solomon-erasure` crate as the byte-level
//! encode/decode capability the renter engine consumes. The engine itself
//! only ever reasons about piece *indices* and *placement*; everything
//! byte-shaped lives behind [`EcCodec`].
//!
//! - **Codec** (`codec.rs`): split data into k data pieces, derive m
//!   parity pieces, and reconstruct the original bytes from any k
//!   surviving pieces regardless of which indices survive.

pub mod codec;

#[cfg(test)]
mod proptest;

pub use codec::EcCodec;
