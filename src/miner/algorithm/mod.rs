// src/miner/algorithm/mod.rs
//! Hash engines
//!
//! Every engine is a pure function from bytes to a 32-byte digest. Workers
//! never hash through a device-specific path: the [`HashEngine`] registry is
//! the single place candidates are (re)computed.

/// RandomX algorithm implementation
///
/// Requires significant memory allocation for the dataset.
pub mod randomx;

/// CryptoNight algorithm implementations (V7 and R)
pub mod cryptonight;

/// Keccak-256 engine
pub mod keccak;

use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use std::collections::HashMap;
use std::sync::Arc;

/// Offset of the 32-bit little-endian nonce inside a CryptoNote header blob
pub const NONCE_OFFSET: usize = 39;

/// Largest header blob a job may carry
pub const MAX_BLOB_SIZE: usize = 112;

/// Common interface for all hash engines
///
/// Implementations must be stateless from the caller's view so that one
/// instance can be shared by every worker thread.
pub trait Algorithm: Send + Sync {
    /// Compute the digest of `input`
    fn digest(&self, input: &[u8]) -> Result<[u8; 32], MinerError>;

    /// Get the algorithm type
    fn algorithm_type(&self) -> AlgorithmType;
}

/// Registry of hash engines keyed by algorithm
///
/// Cloning is cheap; engines are shared behind `Arc`.
#[derive(Clone, Default)]
pub struct HashEngine {
    engines: HashMap<AlgorithmType, Arc<dyn Algorithm>>,
}

impl HashEngine {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry holding one engine per requested algorithm
    ///
    /// RandomX starts with a zero seed key; it is only built when asked for
    /// because fast mode allocates the full dataset.
    pub fn for_algorithms(algorithms: &[AlgorithmType]) -> Self {
        let mut engine = Self::new();
        for &algo in algorithms {
            if engine.engines.contains_key(&algo) {
                continue;
            }
            let imp: Arc<dyn Algorithm> = match algo {
                AlgorithmType::RandomX => Arc::new(randomx::RandomX::new(true, &[0u8; 32])),
                AlgorithmType::CryptoNightV7 => Arc::new(cryptonight::CryptoNightAlgo::new(1)),
                AlgorithmType::CryptoNightR => Arc::new(cryptonight::CryptoNightAlgo::new(4)),
                AlgorithmType::Keccak => Arc::new(keccak::Keccak256Algo),
            };
            engine.engines.insert(algo, imp);
        }
        engine
    }

    /// Registers (or replaces) an engine under its own algorithm type
    pub fn register(&mut self, algorithm: Arc<dyn Algorithm>) {
        self.engines.insert(algorithm.algorithm_type(), algorithm);
    }

    /// True when an engine for `algorithm` is available
    pub fn supports(&self, algorithm: AlgorithmType) -> bool {
        self.engines.contains_key(&algorithm)
    }

    /// Checks every registered engine that has a known vector
    ///
    /// CryptoNight V7 and Keccak-256 are checked against
    /// [`cryptonight::SELF_TEST_INPUT`]; RandomX and CryptoNight R depend on
    /// chain state and are skipped.
    pub fn self_test(&self) -> Result<(), MinerError> {
        let vectors = [
            (AlgorithmType::CryptoNightV7, cryptonight::SELF_TEST_V7_DIGEST),
            (AlgorithmType::Keccak, keccak::SELF_TEST_DIGEST),
        ];
        for (algo, expected) in vectors {
            if !self.supports(algo) {
                continue;
            }
            let digest = self.digest(algo, cryptonight::SELF_TEST_INPUT)?;
            if digest != expected {
                return Err(MinerError::AlgorithmError(format!(
                    "{} self test produced {}, expected {}",
                    algo,
                    hex::encode(digest),
                    hex::encode(expected)
                )));
            }
            log::debug!("{} self test passed", algo);
        }
        Ok(())
    }

    /// Compute the digest of `input` with the engine for `algorithm`
    pub fn digest(&self, algorithm: AlgorithmType, input: &[u8]) -> Result<[u8; 32], MinerError> {
        self.engines
            .get(&algorithm)
            .ok_or_else(|| MinerError::AlgorithmError(format!("No engine for {}", algorithm)))?
            .digest(input)
    }
}

/// Difficulty check shared by every worker
///
/// The last 8 digest bytes are read as a little-endian integer and must be
/// strictly below `target`.
pub fn meets_target(digest: &[u8; 32], target: u64) -> bool {
    digest_value(digest) < target
}

/// The little-endian integer formed by the last 8 digest bytes
pub fn digest_value(digest: &[u8; 32]) -> u64 {
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&digest[24..32]);
    u64::from_le_bytes(tail)
}

/// Writes `nonce` into its slot of a header blob
///
/// Fails if the blob is too short to carry a nonce.
pub fn set_blob_nonce(blob: &mut [u8], nonce: u32) -> Result<(), MinerError> {
    let blob_len = blob.len();
    let slot = blob
        .get_mut(NONCE_OFFSET..NONCE_OFFSET + 4)
        .ok_or_else(|| MinerError::InputError(format!("Blob of {} bytes has no nonce slot", blob_len)))?;
    slot.copy_from_slice(&nonce.to_le_bytes());
    Ok(())
}

/// Reads the nonce currently stored in a header blob
pub fn blob_nonce(blob: &[u8]) -> Option<u32> {
    let slot = blob.get(NONCE_OFFSET..NONCE_OFFSET + 4)?;
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(slot);
    Some(u32::from_le_bytes(bytes))
}
