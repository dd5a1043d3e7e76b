// src/utils/mod.rs
//! Utilities module for common functionality
//!
//! Error handling, logging setup and thread placement helpers shared by the
//! device and miner modules.

/// Error types and handling utilities
///
/// Contains the [`MinerError`] enum which defines all possible error conditions
/// for the mining application, along with conversion implementations.
pub mod error;

/// Logging configuration and utilities
pub mod logging;

/// CPU affinity for worker threads
pub mod affinity;

// Re-export for easier access
pub use error::MinerError;
pub use logging::init_logging;
