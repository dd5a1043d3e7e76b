// src/config/config.rs
use crate::device::self_test::{ScriptedExchange, default_script, load_script};
use crate::device::transport::SerialSettings;
use crate::miner::scheduler::WorkItem;
use crate::miner::worker::DeviceSetup;
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration structure for the mining application
///
/// Contains the default algorithm, the software lanes and every FPGA device
/// to drive. A static job can be given for bench rigs without a pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Algorithm used when a job does not name one
    #[serde(default)]
    pub algorithm: AlgorithmType,

    /// Number of software worker threads (0 disables software mining)
    #[serde(default)]
    pub software_threads: usize,

    /// Nonces each software worker reserves at a time
    /// (default: 4096)
    #[serde(default = "default_nonce_chunk")]
    pub nonce_chunk: u32,

    /// FPGA devices
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,

    /// Job to publish at startup
    #[serde(default)]
    pub job: Option<StaticJob>,
}

/// One FPGA board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial port path (`/dev/ttyUSB0`, `COM3`) or `sim:<name>`
    pub address: String,

    /// Hashing channels on the board
    ///
    /// Informational: the board is driven by a single worker since its port
    /// has exactly one owner.
    #[serde(default = "default_device_threads")]
    pub threads: usize,

    /// CPU the device worker is pinned to
    #[serde(default)]
    pub affinity: Option<usize>,

    /// Line speed
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Reply window for request/response exchanges, milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// How long one read or result poll may block, milliseconds
    #[serde(default = "default_read_poll_ms")]
    pub read_poll_ms: u64,

    /// Scripted exchanges run before mining; the reset handshake when empty
    #[serde(default)]
    pub self_test: Vec<ScriptedExchange>,

    /// JSON file with more scripted exchanges, appended to `self_test`
    #[serde(default)]
    pub self_test_file: Option<PathBuf>,
}

/// A fixed job for rigs without a pool connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticJob {
    /// Job identifier reported with results
    pub job_id: String,
    /// Header blob, hex
    pub blob: String,
    /// Target as a 64-bit integer
    pub target: u64,
    /// Overrides the global algorithm
    #[serde(default)]
    pub algorithm: Option<AlgorithmType>,
    /// Pool identifier reported with results
    #[serde(default)]
    pub pool_id: u32,
    /// Keep the top nonce byte fixed
    #[serde(default)]
    pub nicehash: bool,
}

fn default_nonce_chunk() -> u32 {
    4096
}

fn default_device_threads() -> usize {
    1
}

fn default_baud_rate() -> u32 {
    115_200
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_read_poll_ms() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            algorithm: AlgorithmType::default(),
            software_threads: 0,
            nonce_chunk: default_nonce_chunk(),
            devices: Vec::new(),
            job: None,
        }
    }
}

impl DeviceConfig {
    /// A device at `address` with default settings
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            threads: default_device_threads(),
            affinity: None,
            baud_rate: default_baud_rate(),
            timeout_ms: default_timeout_ms(),
            read_poll_ms: default_read_poll_ms(),
            self_test: Vec::new(),
            self_test_file: None,
        }
    }

    /// Serial line settings for this device
    pub fn serial_settings(&self) -> SerialSettings {
        SerialSettings {
            baud_rate: self.baud_rate,
            read_timeout: Duration::from_millis(self.read_poll_ms),
        }
    }

    /// Scripted exchanges to run, inline ones first
    pub fn script(&self) -> Result<Vec<ScriptedExchange>, MinerError> {
        let mut script = self.self_test.clone();
        if let Some(path) = &self.self_test_file {
            script.extend(load_script(path)?);
        }
        if script.is_empty() {
            script = default_script();
        }
        Ok(script)
    }

    /// Everything a worker needs to open this device
    pub fn setup(&self) -> Result<DeviceSetup, MinerError> {
        Ok(DeviceSetup {
            address: self.address.clone(),
            settings: self.serial_settings(),
            timeout: Duration::from_millis(self.timeout_ms),
            poll_window: Duration::from_millis(self.timeout_ms),
            script: self.script()?,
        })
    }
}

impl StaticJob {
    /// Builds the work item, falling back to `default_algorithm`
    pub fn to_work_item(&self, default_algorithm: AlgorithmType) -> Result<WorkItem, MinerError> {
        let blob = hex::decode(&self.blob)?;
        Ok(WorkItem::new(
            self.job_id.clone(),
            blob,
            self.target,
            self.algorithm.unwrap_or(default_algorithm),
        )?
        .with_pool(self.pool_id)
        .with_nicehash(self.nicehash))
    }
}

impl Config {
    /// Loads configuration from a file
    ///
    /// # Arguments
    /// * `path` - Path to the configuration file (TOML format)
    ///
    /// # Returns
    /// * `Ok(Config)` - Successfully loaded and validated configuration
    /// * `Err(MinerError)` - If file couldn't be read, parsed or validated
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, MinerError> {
        let path = path.into();
        let config_str = std::fs::read_to_string(&path).map_err(|e| {
            MinerError::ConfigError(format!(
                "Failed to read config at {}: {}",
                path.display(),
                e
            ))
        })?;

        let config: Config = toml::from_str(&config_str)
            .map_err(|e| MinerError::ConfigError(format!("Invalid config format: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects configurations that cannot mine
    pub fn validate(&self) -> Result<(), MinerError> {
        if self.software_threads == 0 && self.devices.is_empty() {
            return Err(MinerError::ConfigError(
                "No devices and no software threads configured".into(),
            ));
        }
        if self.nonce_chunk == 0 {
            return Err(MinerError::ConfigError("nonce_chunk must be positive".into()));
        }
        for (i, dev) in self.devices.iter().enumerate() {
            if dev.address.is_empty() {
                return Err(MinerError::ConfigError(format!("Device {} has no address", i)));
            }
            if dev.threads == 0 || dev.timeout_ms == 0 || dev.read_poll_ms == 0 {
                return Err(MinerError::ConfigError(format!(
                    "Device {} needs positive threads, timeout_ms and read_poll_ms",
                    dev.address
                )));
            }
            if self
                .devices
                .iter()
                .skip(i + 1)
                .any(|other| other.address == dev.address)
            {
                return Err(MinerError::ConfigError(format!(
                    "Device {} listed twice; a port has exactly one owner",
                    dev.address
                )));
            }
        }
        Ok(())
    }

    /// Generates a configuration template string
    ///
    /// # Arguments
    /// * `devices` - Device addresses to pre-fill; a simulated device if empty
    ///
    /// # Returns
    /// String containing a commented TOML configuration template
    pub fn generate_template(devices: &[String]) -> String {
        let mut template = String::new();
        template.push_str("# XMR FPGA Miner Configuration\n\n");
        template.push_str("# Supported algorithms: randomx, cryptonight-v7, cryptonight-r, keccak\n");
        template.push_str("algorithm = \"cryptonight-v7\"\n");
        template.push_str("# Number of software worker threads (0 = devices only)\n");
        template.push_str("software_threads = 0\n");
        template.push_str("# Nonces reserved per software allocation\n");
        template.push_str("nonce_chunk = 4096\n\n");

        template.push_str("# Fixed job for bench rigs (remove when fed by a pool)\n");
        template.push_str("# [job]\n");
        template.push_str("# job_id = \"bench\"\n");
        template.push_str("# blob = \"0707...\"\n");
        template.push_str("# target = 18446744073709551615\n\n");

        let fallback = [format!("{}fpga0", crate::device::transport::SIMULATED_PREFIX)];
        let addresses = if devices.is_empty() { &fallback[..] } else { devices };
        for address in addresses {
            template.push_str("[[devices]]\n");
            template.push_str(&format!("address = \"{}\"\n", address));
            template.push_str("threads = 1\n");
            template.push_str("# affinity = 0\n");
            template.push_str("baud_rate = 115200\n");
            template.push_str("# Reply window and read poll, milliseconds\n");
            template.push_str("timeout_ms = 1000\n");
            template.push_str("read_poll_ms = 10\n");
            template.push_str("# self_test_file = \"selftest.json\"\n\n");
        }

        template
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn template_parses_and_validates() {
        let text = Config::generate_template(&["/dev/ttyUSB0".into(), "/dev/ttyUSB1".into()]);
        let config: Config = toml::from_str(&text).unwrap();
        config.validate().unwrap();
        assert_eq!(config.algorithm, AlgorithmType::CryptoNightV7);
        assert_eq!(config.devices.len(), 2);
        assert_eq!(config.devices[1], DeviceConfig::new("/dev/ttyUSB1"));
    }

    #[test]
    fn load_reads_devices_scripts_and_job() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
algorithm = "keccak"
software_threads = 2

[job]
job_id = "j7"
blob = "{}"
target = 1000
pool_id = 4

[[devices]]
address = "sim:a"
affinity = 3
timeout_ms = 250

[[devices.self_test]]
operation = "reset"
input = "01"
"#,
            "07".repeat(76)
        )
        .unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.software_threads, 2);
        assert_eq!(config.nonce_chunk, 4096);

        let dev = &config.devices[0];
        assert_eq!(dev.affinity, Some(3));
        assert_eq!(dev.baud_rate, 115_200);
        let setup = dev.setup().unwrap();
        assert_eq!(setup.timeout, Duration::from_millis(250));
        assert_eq!(setup.settings.read_timeout, Duration::from_millis(10));
        assert_eq!(setup.script.len(), 1);

        let work = config.job.unwrap().to_work_item(config.algorithm).unwrap();
        assert_eq!(work.algorithm, AlgorithmType::Keccak);
        assert_eq!((work.pool_id, work.version, work.target), (4, 7, 1000));
    }

    #[test]
    fn script_file_is_appended_and_default_fills_empty() {
        let mut script = tempfile::NamedTempFile::new().unwrap();
        write!(script, r#"[{{"operation": "query_reset_status", "expected": "01"}}]"#).unwrap();

        let mut dev = DeviceConfig::new("sim:b");
        assert_eq!(dev.script().unwrap(), default_script());
        dev.self_test_file = Some(script.path().to_path_buf());
        assert_eq!(dev.script().unwrap().len(), 1);
    }

    #[test]
    fn validation_rejects_unusable_configs() {
        assert!(Config::default().validate().is_err());

        let mut config = Config {
            devices: vec![DeviceConfig::new("/dev/ttyUSB0"), DeviceConfig::new("/dev/ttyUSB0")],
            ..Config::default()
        };
        assert!(config.validate().is_err());
        config.devices.pop();
        config.validate().unwrap();
        config.devices[0].timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        assert!(matches!(
            Config::load("/nonexistent/miner.toml"),
            Err(MinerError::ConfigError(_))
        ));
    }
}
