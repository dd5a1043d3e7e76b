// src/miner/algorithm/randomx.rs
//! RandomX algorithm implementation
//!
//! Only used by software lanes; no device bitstream speaks RandomX.

use crate::miner::algorithm::Algorithm;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use rust_randomx::{Context, Hasher};
use std::sync::Arc;

/// RandomX algorithm implementation
///
/// The dataset lives in a shared `Context`; each digest call builds a
/// lightweight `Hasher` over it so threads never contend on one VM.
#[derive(Clone)]
pub struct RandomX {
    /// Shared RandomX context containing the dataset
    context: Arc<Context>,
}

impl RandomX {
    /// Creates a new RandomX instance with initialized dataset
    ///
    /// # Arguments
    /// * `fast` - Enables fast mode when true (uses more memory but better performance)
    /// * `key` - The key/seed used to initialize the dataset (typically block seed)
    ///
    /// Fast mode needs ~2080MB RAM vs ~256MB in light mode.
    pub fn new(fast: bool, key: &[u8]) -> Self {
        Self {
            context: Arc::new(Context::new(key, fast)),
        }
    }
}

impl Algorithm for RandomX {
    fn digest(&self, input: &[u8]) -> Result<[u8; 32], MinerError> {
        let hasher = Hasher::new(Arc::clone(&self.context));
        let output = hasher.hash(input);
        output
            .as_ref()
            .try_into()
            .map_err(|_| MinerError::AlgorithmError("RandomX output is not 32 bytes".into()))
    }

    fn algorithm_type(&self) -> AlgorithmType {
        AlgorithmType::RandomX
    }
}
