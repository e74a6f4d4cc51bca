//! Property-Based Tests for the Erasure Codec
//!
//! The defining correctness property of the codec is that *any* `k`
//! surviving pieces reconstruct the original bytes, regardless of which
//! indices survive. proptest drives that across configurations, input
//! sizes, and erasure patterns.

#![cfg(test)]

use proptest::prelude::*;

use super::codec::EcCodec;

// =============================================================================
// Property Strategies
// =============================================================================

/// Strategy for valid k+m configurations, including the k=1 replication
/// degenerate case the renter relies on.
fn ec_config_strategy() -> impl Strategy<Value = (usize, usize)> {
    (1usize..=6, 1usize..=4)
}

/// Strategy for test data of various sizes.
fn data_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 1..4096)
}

// =============================================================================
// Survival-Subset Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: any subset of exactly k pieces reconstructs the data,
    /// no matter which indices it contains.
    #[test]
    fn prop_any_k_subset_reconstructs(
        (k, m) in ec_config_strategy(),
        data in data_strategy(),
        seed in any::<u64>(),
    ) {
        let codec = EcCodec::new(k, m)?;
        let pieces = codec.encode(&data)?;
        let total = k + m;

        // Derive a pseudo-random k-sized survivor subset from the seed.
        let mut indices: Vec<usize> = (0..total).collect();
        let mut state = seed;
        for i in (1..total).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state % (i as u64 + 1)) as usize;
            indices.swap(i, j);
        }
        let survivors = &indices[..k];

        let mut slots: Vec<Option<Vec<u8>>> = vec![None; total];
        for &i in survivors {
            slots[i] = Some(pieces[i].clone());
        }

        let recovered = codec.decode(&mut slots, data.len())?;
        prop_assert_eq!(recovered, data, "failed with survivors {:?}", survivors);
    }

    /// Property: encoding then decoding without losses returns the input.
    #[test]
    fn prop_roundtrip_no_loss(
        (k, m) in ec_config_strategy(),
        data in data_strategy(),
    ) {
        let codec = EcCodec::new(k, m)?;
        let pieces = codec.encode(&data)?;
        prop_assert_eq!(pieces.len(), k + m);

        let mut slots: Vec<Option<Vec<u8>>> = pieces.into_iter().map(Some).collect();
        let recovered = codec.decode(&mut slots, data.len())?;
        prop_assert_eq!(recovered, data);
    }

    /// Property: fewer than k survivors always fails, never mis-decodes.
    #[test]
    fn prop_below_floor_fails(
        (k, m) in (2usize..=6, 1usize..=4),
        data in data_strategy(),
    ) {
        let codec = EcCodec::new(k, m)?;
        let pieces = codec.encode(&data)?;

        // Keep only k-1 pieces.
        let mut slots: Vec<Option<Vec<u8>>> = vec![None; k + m];
        for (i, slot) in slots.iter_mut().enumerate().take(k - 1) {
            *slot = Some(pieces[i].clone());
        }

        prop_assert!(codec.decode(&mut slots, data.len()).is_err());
    }
}

// =============================================================================
// Determinism Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    /// Property: encoding is deterministic across codec instances, so a
    /// repaired piece is byte-identical to the piece it replaces.
    #[test]
    fn prop_reencode_matches_original_pieces(
        (k, m) in ec_config_strategy(),
        data in data_strategy(),
    ) {
        let first = EcCodec::new(k, m)?.encode(&data)?;
        let second = EcCodec::new(k, m)?.encode(&data)?;
        prop_assert_eq!(first, second);
    }

    /// Property: all piece slots come out the same size.
    #[test]
    fn prop_uniform_piece_size(
        (k, m) in ec_config_strategy(),
        data in data_strategy(),
    ) {
        let codec = EcCodec::new(k, m)?;
        let pieces = codec.encode(&data)?;

        let expected = codec.piece_size(data.len());
        for piece in &pieces {
            prop_assert_eq!(piece.len(), expected);
        }
    }
}
