// src/cli/commands.rs
use crate::types::AlgorithmType;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// XMR FPGA Miner CLI - drives FPGA hashing boards alongside software lanes
#[derive(Parser, Debug)]
#[command(name = "xmr-fpga-miner")]
#[command(version, about, long_about = None)]
pub struct Commands {
    /// The action to perform
    #[command(subcommand)]
    pub action: Action,
}

/// Top-level commands for the miner application
#[derive(Subcommand, Debug)]
pub enum Action {
    /// Start mining with the configured devices and software threads
    Start(StartOptions),

    /// Run performance benchmarks for the software hash engines
    Benchmark(BenchmarkOptions),

    /// Generate configuration file template
    Config(ConfigOptions),

    /// Run scripted exchanges against one device and exit
    SelfTest(SelfTestOptions),
}

/// Options for starting the mining operation
#[derive(Parser, Debug)]
pub struct StartOptions {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Number of software worker threads (overrides config)
    #[arg(short, long)]
    pub software_threads: Option<usize>,

    /// Default algorithm (overrides config)
    #[arg(short, long)]
    pub algorithm: Option<AlgorithmType>,
}

/// Options for running mining benchmarks
#[derive(Parser, Debug)]
pub struct BenchmarkOptions {
    /// Algorithm to benchmark
    #[arg(short, long)]
    pub algorithm: AlgorithmType,

    /// Duration of benchmark in seconds
    #[arg(short, long, default_value_t = 60)]
    pub duration: u64,

    /// Number of threads to use
    #[arg(short, long, default_value_t = num_cpus::get())]
    pub threads: usize,
}

/// Options for generating configuration files
#[derive(Parser, Debug)]
pub struct ConfigOptions {
    /// Output file path
    #[arg(short, long, default_value = "config.toml")]
    pub output: PathBuf,

    /// Device addresses to include (repeatable)
    #[arg(short, long = "device")]
    pub devices: Vec<String>,
}

/// Options for the standalone device self-test
#[derive(Parser, Debug)]
pub struct SelfTestOptions {
    /// Serial port path or `sim:<name>`
    #[arg(short, long)]
    pub device: String,

    /// JSON file with scripted exchanges (default: reset handshake)
    #[arg(short, long)]
    pub script: Option<PathBuf>,

    /// Line speed
    #[arg(short, long, default_value_t = 115_200)]
    pub baud_rate: u32,

    /// Reply window in milliseconds
    #[arg(short, long, default_value_t = 1000)]
    pub timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_subcommands() {
        let cli = Commands::try_parse_from(["xmr-fpga-miner", "self-test", "-d", "/dev/ttyUSB0"]).unwrap();
        let Action::SelfTest(opts) = cli.action else {
            panic!("expected self-test");
        };
        assert_eq!(opts.device, "/dev/ttyUSB0");
        assert_eq!(opts.baud_rate, 115_200);

        let cli = Commands::try_parse_from([
            "xmr-fpga-miner",
            "config",
            "--device",
            "/dev/ttyUSB0",
            "--device",
            "sim:x",
        ])
        .unwrap();
        let Action::Config(opts) = cli.action else {
            panic!("expected config");
        };
        assert_eq!(opts.devices, vec!["/dev/ttyUSB0", "sim:x"]);

        let cli = Commands::try_parse_from(["xmr-fpga-miner", "start", "-a", "keccak"]).unwrap();
        let Action::Start(opts) = cli.action else {
            panic!("expected start");
        };
        assert_eq!(opts.algorithm, Some(AlgorithmType::Keccak));
    }
}
