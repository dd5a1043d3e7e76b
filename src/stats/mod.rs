//! Statistics collection and reporting module
//!
//! This module provides functionality for tracking and reporting mining statistics,
//! including:
//! - Software hashrate
//! - Verified and invalid candidate counts
//! - Hardware monitoring (CPU, memory, temperature)
//!
//! The main component is [`StatsReporter`] which collects data and can periodically
//! report statistics to logs.

/// Submodule containing the statistics reporter implementation
pub mod reporter;

// Re-export main components
pub use reporter::{HardwareStats, MiningStats, StatsReporter};
