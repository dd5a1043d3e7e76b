// src/miner/mod.rs
//! Core mining functionality
//!
//! This module contains everything between a published job and a verified
//! result:
//! - Hash engines (RandomX, CryptoNight, Keccak-256)
//! - Global job state and nonce partitioning
//! - Worker threads for devices and software lanes
//! - The event sink results and diagnostics leave through

/// Hash engine implementations
///
/// Contains implementations of supported mining algorithms:
/// - RandomX (for Monero's current algorithm)
/// - CryptoNight variants (what the FPGA bitstreams compute)
/// - Keccak-256 (bring-up and tests)
pub mod algorithm;

/// Results and diagnostics emitted by workers
pub mod events;

/// Global job state
///
/// Holds the current work item and its version, and hands out disjoint
/// nonce ranges to software workers.
pub mod scheduler;

/// Worker thread implementation
///
/// Device and software backends behind one loop that tracks job versions and
/// verifies every candidate before publishing it.
pub mod worker;

// Re-export main components for cleaner imports
pub use self::algorithm::{Algorithm, HashEngine};
pub use self::events::{ChannelSink, EventSink, JobResult, MinerEvent};
pub use self::scheduler::{GlobalJobState, JobSnapshot, NonceRange, WorkItem};
pub use self::worker::{Backend, DeviceBackend, DeviceSetup, SoftwareBackend, Worker, WorkerContext};
