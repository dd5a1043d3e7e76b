// src/device/preprocess.rs
//! Host-side first absorb step of the Keccak sponge
//!
//! The device runs the permutation and everything after it; the host only
//! pads the header blob into one rate block, mixes it into a zero state and
//! swaps each lane into the order the bitstream reads.

use crate::device::protocol::STATE_LANES;
use crate::utils::error::MinerError;

/// Keccak-256 rate (136 bytes, 17 lanes)
pub const RATE_BYTES: usize = 136;

/// Scratch area: one rate block plus one spare lane
pub const SCRATCH_BYTES: usize = RATE_BYTES + 8;

/// Absorbs `input` into a fresh state and byte-swaps every lane for the wire
///
/// # Errors
/// `InputTooLarge` when `input.len() + 1 >= rate_bytes + 8`.
pub fn build_absorb_state(input: &[u8], rate_bytes: usize) -> Result<[u64; STATE_LANES], MinerError> {
    let mut state = absorb_lanes(input, rate_bytes)?;
    for lane in state.iter_mut() {
        *lane = lane.swap_bytes();
    }
    Ok(state)
}

/// Absorbs `input` into a fresh state, host byte order
///
/// Padding is pad10*1 with the Keccak domain byte `0x01`. Lanes past the rate
/// (the capacity) stay zero.
pub fn absorb_lanes(input: &[u8], rate_bytes: usize) -> Result<[u64; STATE_LANES], MinerError> {
    if rate_bytes == 0 || rate_bytes % 8 != 0 || rate_bytes > STATE_LANES * 8 {
        return Err(MinerError::InputError(format!(
            "Rate of {} bytes is not a whole number of lanes within the state",
            rate_bytes
        )));
    }
    let limit = rate_bytes + 8;
    if input.len() + 1 >= limit {
        return Err(MinerError::InputTooLarge {
            len: input.len(),
            limit,
        });
    }

    let mut scratch = vec![0u8; limit];
    scratch[..input.len()].copy_from_slice(input);
    scratch[input.len()] = 0x01;
    scratch[rate_bytes - 1] |= 0x80;

    let mut state = [0u64; STATE_LANES];
    for (lane, chunk) in state.iter_mut().zip(scratch[..rate_bytes].chunks_exact(8)) {
        let mut word = [0u8; 8];
        word.copy_from_slice(chunk);
        *lane ^= u64::from_le_bytes(word);
    }
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::algorithm::cryptonight::SELF_TEST_INPUT;
    use hex_literal::hex;

    const RATE_LANES: usize = RATE_BYTES / 8;

    #[test]
    fn padding_sets_high_bit_and_leaves_capacity_zero() {
        for len in 0..(SCRATCH_BYTES - 1) {
            let input = vec![0x5Au8; len];
            let state = absorb_lanes(&input, RATE_BYTES).unwrap();
            let last_rate_byte = state[RATE_LANES - 1].to_le_bytes()[7];
            assert_eq!(last_rate_byte & 0x80, 0x80, "len {}", len);
            assert!(state[RATE_LANES..].iter().all(|&l| l == 0), "len {}", len);
        }
    }

    #[test]
    fn domain_byte_follows_input() {
        let state = absorb_lanes(b"abc", RATE_BYTES).unwrap();
        assert_eq!(state[0].to_le_bytes(), [b'a', b'b', b'c', 0x01, 0, 0, 0, 0]);
        assert_eq!(state[RATE_LANES - 1], 0x80 << 56);
    }

    #[test]
    fn wire_state_is_lane_byte_swapped() {
        let host = absorb_lanes(SELF_TEST_INPUT, RATE_BYTES).unwrap();
        let wire = build_absorb_state(SELF_TEST_INPUT, RATE_BYTES).unwrap();
        for (h, w) in host.iter().zip(wire.iter()) {
            assert_eq!(h.to_be_bytes(), w.to_le_bytes());
        }
    }

    #[test]
    fn too_large_input_is_rejected() {
        assert!(absorb_lanes(&[0u8; 142], RATE_BYTES).is_ok());
        assert!(matches!(
            absorb_lanes(&[0u8; 143], RATE_BYTES),
            Err(MinerError::InputTooLarge { len: 143, limit: 144 })
        ));
        assert!(matches!(
            build_absorb_state(&[0u8; 200], RATE_BYTES),
            Err(MinerError::InputTooLarge { .. })
        ));
    }

    #[test]
    fn odd_rates_are_rejected() {
        assert!(absorb_lanes(b"x", 130).is_err());
        assert!(absorb_lanes(b"x", 0).is_err());
        assert!(absorb_lanes(b"x", 208).is_err());
    }

    /// The absorb state followed by one Keccak-f[1600] must give Keccak-256
    #[test]
    fn self_test_blob_completes_to_known_digest() {
        let mut state = absorb_lanes(SELF_TEST_INPUT, RATE_BYTES).unwrap();
        keccak::f1600(&mut state);
        let mut digest = [0u8; 32];
        for (chunk, lane) in digest.chunks_exact_mut(8).zip(state.iter()) {
            chunk.copy_from_slice(&lane.to_le_bytes());
        }
        assert_eq!(
            digest,
            hex!("af6fe96f8cb409bdd2a61fb837e346f1a28007b0f078a8d68bc1224b6fcfcc3c")
        );
    }
}
