// src/device/mod.rs
//! FPGA device support
//!
//! Layers, bottom up:
//! - [`protocol`]: frame layout, message ids and typed payloads
//! - [`codec`]: frame encoding and resynchronising stream decoding
//! - [`transport`]: serial port and in-memory byte streams
//! - [`preprocess`]: Keccak absorb state sent with every job
//! - [`session`]: counter-checked request/response state machine
//! - [`self_test`]: scripted known-good exchanges run before mining

/// Frame encoding and stream decoding
pub mod codec;
/// Host-side absorb state
pub mod preprocess;
/// Wire constants and typed messages
pub mod protocol;
/// Device session state machine
pub mod session;
/// Byte-stream transports
pub mod transport;

pub use codec::{Decoded, FrameDecoder};
pub use protocol::{Frame, Reply, ReplyKind, Request};
pub use self_test::{Operation, ScriptedExchange};
pub use session::{Awaited, DeviceSession, SessionState};
pub use transport::{SerialSettings, SimulatedDevice, Transport};
