// src/cli/mod.rs
//! Command-line interface definitions

/// Subcommands and their options
pub mod commands;

pub use commands::{Action, BenchmarkOptions, Commands, ConfigOptions, SelfTestOptions, StartOptions};
