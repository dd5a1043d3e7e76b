// src/miner/algorithm/cryptonight.rs
//! CryptoNight algorithm implementation
//!
//! Software reference for what the FPGA computes. Every hardware candidate is
//! re-hashed here before it is published.

use crate::miner::algorithm::Algorithm;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use cryptonight::cryptonight;

/// Digest of [`SELF_TEST_INPUT`] under CryptoNight V7
pub const SELF_TEST_V7_DIGEST: [u8; 32] = [
    0x01, 0x57, 0xc5, 0xee, 0x18, 0x8b, 0xbe, 0xc8, 0x97, 0x52, 0x85, 0xa3, 0x06, 0x4e, 0xe9, 0x20,
    0x65, 0x21, 0x76, 0x72, 0xfd, 0x69, 0xa1, 0xae, 0xbd, 0x07, 0x66, 0xc7, 0xb5, 0x6e, 0xe0, 0xbd,
];

/// Input blob shared by the software and device self-tests
pub const SELF_TEST_INPUT: &[u8; 44] = b"This is a test This is a test This is a test";

/// CryptoNight algorithm implementation
///
/// Only tracks the variant; hashing is delegated to the cryptonight library.
pub struct CryptoNightAlgo {
    /// Algorithm variant identifier
    ///
    /// - `1` for CryptoNight V7
    /// - `4` for CryptoNight R
    variant: i32,
}

impl CryptoNightAlgo {
    /// Creates a new CryptoNight algorithm instance for the specified variant
    pub fn new(variant: i32) -> Self {
        Self { variant }
    }
}

impl Algorithm for CryptoNightAlgo {
    fn digest(&self, input: &[u8]) -> Result<[u8; 32], MinerError> {
        let hash = cryptonight(input, input.len(), self.variant);
        hash.as_slice().try_into().map_err(|_| {
            MinerError::AlgorithmError(format!(
                "CryptoNight variant {} returned {} bytes",
                self.variant,
                hash.len()
            ))
        })
    }

    fn algorithm_type(&self) -> AlgorithmType {
        match self.variant {
            4 => AlgorithmType::CryptoNightR,
            _ => AlgorithmType::CryptoNightV7,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v7_matches_known_vector() {
        let algo = CryptoNightAlgo::new(1);
        assert_eq!(algo.digest(SELF_TEST_INPUT).unwrap(), SELF_TEST_V7_DIGEST);
        assert_eq!(algo.algorithm_type(), AlgorithmType::CryptoNightV7);
        assert_eq!(CryptoNightAlgo::new(4).algorithm_type(), AlgorithmType::CryptoNightR);
    }
}
