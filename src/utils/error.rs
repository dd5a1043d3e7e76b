// src/utils/error.rs
use crate::miner::events::MinerEvent;
use std::io;
use thiserror::Error;

/// Main error type for the mining application
///
/// Timeouts are deliberately absent: a device that has nothing to say yet is
/// reported through the `Decoded` / `Awaited` outcome enums, never as an error.
#[derive(Error, Debug)]
pub enum MinerError {
    /// Errors related to mining algorithms (e.g., unsupported algorithm)
    #[error("Algorithm error: {0}")]
    AlgorithmError(String),

    /// Frame payload does not fit the 16-bit length field
    #[error("Payload too large: {len} bytes (max {max})")]
    PayloadTooLarge {
        /// Offending payload length
        len: usize,
        /// Largest length the wire format can carry
        max: usize,
    },

    /// Preprocessor input does not fit a single absorb block
    #[error("Input too large: {len} bytes (limit {limit})")]
    InputTooLarge {
        /// Offending input length
        len: usize,
        /// Exclusive upper bound on `len + 1`
        limit: usize,
    },

    /// A message argument has the wrong shape; rejected before any I/O
    #[error("Invalid payload for {message}: expected {expected} bytes, got {actual}")]
    InvalidPayload {
        /// Message the payload was meant for
        message: &'static str,
        /// Required payload size
        expected: usize,
        /// Supplied payload size
        actual: usize,
    },

    /// The device transport could not be opened or configured
    #[error("Cannot open device {address}: {reason}")]
    DeviceOpen {
        /// Transport address (e.g. `/dev/ttyUSB0`, `COM3`)
        address: String,
        /// Human readable cause
        reason: String,
    },

    /// The device session is unusable (closed, faulted, write failure)
    #[error("Session fault on {address}: {reason}")]
    SessionFault {
        /// Transport address of the device
        address: String,
        /// Human readable cause
        reason: String,
    },

    /// Scripted exchange did not produce the expected reply
    #[error("Self test failed on {address}: {reason}")]
    SelfTest {
        /// Transport address of the device
        address: String,
        /// Which exchange failed and how
        reason: String,
    },

    /// Standard I/O operation errors
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// Serial port layer errors
    #[error("Serial port error: {0}")]
    SerialError(#[from] serialport::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// Configuration file or parameter errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Thread communication channel errors
    #[error("Thread communication error: {0}")]
    ChannelError(String),

    /// Invalid user input or parameter errors
    #[error("Invalid input: {0}")]
    InputError(String),
}

impl MinerError {
    /// True for errors that must stop the owning device or process path
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MinerError::DeviceOpen { .. }
                | MinerError::SessionFault { .. }
                | MinerError::SelfTest { .. }
                | MinerError::IoError(_)
                | MinerError::SerialError(_)
        )
    }
}

/// Converts crossbeam channel send errors for miner events into MinerError
impl From<crossbeam_channel::SendError<MinerEvent>> for MinerError {
    fn from(e: crossbeam_channel::SendError<MinerEvent>) -> Self {
        MinerError::ChannelError(format!("Event send failed: {}", e))
    }
}

/// Converts hex decoding errors into MinerError
///
/// Hex shows up in scripted exchanges and static job blobs.
impl From<hex::FromHexError> for MinerError {
    fn from(e: hex::FromHexError) -> Self {
        MinerError::InputError(format!("Hex conversion failed: {}", e))
    }
}
