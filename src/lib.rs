//! XMR FPGA Miner - drives FPGA proof-of-work boards over serial links
//!
//! This crate provides:
//! - A framed, counter-checked wire protocol for the hashing boards
//! - Per-device sessions with reset bracketing and scripted self-tests
//! - The host-side Keccak absorb step the boards expect
//! - A global job state with versioning and nonce partitioning
//! - Device and software workers that verify every candidate before
//!   publishing it
//! - Performance benchmarking and hardware monitoring

#![warn(missing_docs)]
#![deny(unsafe_code)]

/// FPGA protocol, transports and sessions
pub mod device;

/// Miner core implementation including algorithms, job state and workers
pub mod miner;

/// Statistics collection and reporting functionality
pub mod stats;

/// Utility functions and error handling
pub mod utils;

/// Command-line interface definitions
pub mod cli;

/// Configuration management
pub mod config;

/// Shared type definitions
pub mod types;

// Core exports
pub use cli::Commands;
pub use config::{Config, DeviceConfig};
pub use device::{DeviceSession, SimulatedDevice};
pub use miner::{
    Algorithm, ChannelSink, EventSink, GlobalJobState, HashEngine, JobResult, MinerEvent, WorkItem, Worker,
};
pub use stats::{HardwareStats, MiningStats, StatsReporter};
pub use types::AlgorithmType;
pub use utils::{MinerError, init_logging};
