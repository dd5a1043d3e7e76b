// src/config/mod.rs
//! Configuration management for the FPGA miner
//!
//! This module handles all configuration-related functionality including:
//! - Loading, parsing and validating configuration files
//! - Generating configuration templates
//! - Turning device entries into worker setups
//!
//! The configuration uses TOML format. Scripted self-test exchanges may live
//! inline or in a separate JSON file.

/// Core configuration implementation
///
/// Contains the [`Config`] struct and related types that define
/// the miner's configuration structure and behavior.
pub mod config;

// Re-export key items for easy access
pub use config::{Config, DeviceConfig, StaticJob};

use crate::utils::error::MinerError;
use std::path::PathBuf;

/// Loads miner configuration from a TOML file
///
/// # Arguments
/// * `path` - Path to the configuration file (anything convertible to PathBuf)
///
/// # Returns
/// * `Ok(Config)` - Successfully loaded configuration
/// * `Err(MinerError)` - If the file couldn't be read, parsed or validated
pub fn load(path: impl Into<PathBuf>) -> Result<Config, MinerError> {
    Config::load(path)
}

/// Generates a commented configuration template
///
/// # Arguments
/// * `devices` - Device addresses to include
///
/// # Returns
/// String containing a ready-to-use TOML configuration template
pub fn generate_template(devices: &[String]) -> String {
    Config::generate_template(devices)
}
