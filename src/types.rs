// src/types.rs
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported proof-of-work algorithms
///
/// The device computes CryptoNight internally; the host re-hashes every
/// candidate it reports with the matching software engine before publishing.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlgorithmType {
    /// RandomX algorithm (CPU-optimized, ASIC-resistant)
    #[clap(name = "randomx")]
    RandomX,

    /// CryptoNight variant 7 algorithm
    ///
    /// The variant the FPGA bitstreams target.
    #[default]
    #[clap(name = "cryptonight-v7")]
    CryptoNightV7,

    /// CryptoNight-R algorithm
    #[clap(name = "cryptonight-r")]
    CryptoNightR,

    /// Plain Keccak-256 (the first sponge step of CryptoNight)
    ///
    /// Cheap and deterministic; used for rig bring-up and tests.
    #[clap(name = "keccak")]
    Keccak,
}

impl fmt::Display for AlgorithmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlgorithmType::RandomX => write!(f, "randomx"),
            AlgorithmType::CryptoNightV7 => write!(f, "cryptonight-v7"),
            AlgorithmType::CryptoNightR => write!(f, "cryptonight-r"),
            AlgorithmType::Keccak => write!(f, "keccak"),
        }
    }
}

impl FromStr for AlgorithmType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "randomx" => Ok(AlgorithmType::RandomX),
            "cnv7" | "cryptonight-v7" => Ok(AlgorithmType::CryptoNightV7),
            "cnr" | "cryptonight-r" => Ok(AlgorithmType::CryptoNightR),
            "keccak" | "keccak-256" => Ok(AlgorithmType::Keccak),
            _ => Err(format!("Unknown algorithm: {}", s)),
        }
    }
}
