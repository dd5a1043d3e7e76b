// src/miner/algorithm/keccak.rs
//! Keccak-256 engine
//!
//! Original Keccak padding (`0x01 .. 0x80`), not SHA3. This is exactly the
//! sponge whose first absorb step the device preprocessor produces.

use crate::miner::algorithm::Algorithm;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use sha3::{Digest, Keccak256};

/// Keccak-256 of [`SELF_TEST_INPUT`](super::cryptonight::SELF_TEST_INPUT)
pub const SELF_TEST_DIGEST: [u8; 32] = [
    0xaf, 0x6f, 0xe9, 0x6f, 0x8c, 0xb4, 0x09, 0xbd, 0xd2, 0xa6, 0x1f, 0xb8, 0x37, 0xe3, 0x46, 0xf1,
    0xa2, 0x80, 0x07, 0xb0, 0xf0, 0x78, 0xa8, 0xd6, 0x8b, 0xc1, 0x22, 0x4b, 0x6f, 0xcf, 0xcc, 0x3c,
];

/// Keccak-256 hash engine
#[derive(Debug, Clone, Copy, Default)]
pub struct Keccak256Algo;

impl Algorithm for Keccak256Algo {
    fn digest(&self, input: &[u8]) -> Result<[u8; 32], MinerError> {
        Ok(Keccak256::digest(input).into())
    }

    fn algorithm_type(&self) -> AlgorithmType {
        AlgorithmType::Keccak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hex_literal::hex;

    #[test]
    fn empty_input_matches_reference() {
        let out = Keccak256Algo.digest(b"").unwrap();
        assert_eq!(
            out,
            hex!("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")
        );
    }

    #[test]
    fn self_test_blob_matches_reference() {
        let out = Keccak256Algo
            .digest(b"This is a test This is a test This is a test")
            .unwrap();
        assert_eq!(out, SELF_TEST_DIGEST);
    }
}
