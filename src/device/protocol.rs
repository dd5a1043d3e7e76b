// src/device/protocol.rs
//! Wire protocol for the FPGA hashing boards
//!
//! Every message travels in a self-delimiting frame:
//!
//! ```text
//! | header (4) | type (1) | counter (1) | length (2, LE) | payload | tail (4) |
//! ```
//!
//! There is no escaping and no checksum; receivers resynchronise on the
//! header magic and reject frames whose tail magic does not match.

use crate::utils::error::MinerError;

/// Frame header magic
pub const HEADER_MAGIC: [u8; 4] = [0xde, 0xad, 0xbe, 0xef];

/// Frame tail magic
pub const TAIL_MAGIC: [u8; 4] = [0xb1, 0x6b, 0x00, 0xb5];

/// Bytes between the header magic and the payload: type, counter, length
pub const FIELDS_LEN: usize = 4;

/// Fixed bytes around every payload
pub const FRAME_OVERHEAD: usize = HEADER_MAGIC.len() + FIELDS_LEN + TAIL_MAGIC.len();

/// Largest payload the 16-bit length field can describe
pub const MAX_PAYLOAD_LEN: usize = u16::MAX as usize;

/// Receive buffer the device side of the link is sized for
pub const MAX_INBOUND_FRAME: usize = 64;

/// Largest payload accepted from the device
///
/// A declared length must stay strictly below what a full receive buffer
/// leaves after framing. Anything larger is treated as line noise.
pub const MAX_INBOUND_PAYLOAD: usize = MAX_INBOUND_FRAME - FRAME_OVERHEAD - 1;

/// Number of 64-bit lanes in the absorb state
pub const STATE_LANES: usize = 25;

/// Payload length of `SetData`: 25 lanes plus the 64-bit target
pub const SET_DATA_LEN: usize = STATE_LANES * 8 + 8;

/// Payload length of `Reset`
pub const RESET_LEN: usize = 1;

/// Payload length of `HashResult`: 32-bit nonce plus 32-byte digest
pub const HASH_RESULT_LEN: usize = 4 + 32;

/// Payload length of `ResetStatusReply`
pub const RESET_STATUS_LEN: usize = 1;

/// Message type identifiers
///
/// Request and reply directions share the identifier space; `0x13` is both
/// the reset-status query and its reply.
pub mod msg_type {
    /// Host -> device: absorb state and target
    pub const SET_DATA: u8 = 0x01;
    /// Host -> device: assert / release the hashing core reset
    pub const RESET: u8 = 0x03;
    /// Host -> device: ask whether the reset completed
    pub const QUERY_RESET_STATUS: u8 = 0x13;
    /// Device -> host: candidate nonce and its digest
    pub const HASH_RESULT: u8 = 0x11;
    /// Device -> host: reset completion flag
    pub const RESET_STATUS_REPLY: u8 = 0x13;
}

/// One decoded (or to-be-encoded) frame
///
/// The codec only deals in frames; typing the payload is the session's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Message type identifier (see [`msg_type`])
    pub msg_type: u8,
    /// Rolling request counter
    pub counter: u8,
    /// Raw payload bytes
    pub payload: Vec<u8>,
}

impl Frame {
    /// Creates a frame
    pub fn new(msg_type: u8, counter: u8, payload: Vec<u8>) -> Self {
        Self {
            msg_type,
            counter,
            payload,
        }
    }
}

/// Requests the host sends to a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Load a new absorb state and difficulty target
    SetData {
        /// Byte-swapped absorb state from the preprocessor
        state: [u64; STATE_LANES],
        /// Acceptance threshold
        target: u64,
    },
    /// Drive the hashing core reset line
    ///
    /// `hold == true` keeps the core in reset (deactivated).
    Reset {
        /// Whether the core is held in reset
        hold: bool,
    },
    /// Ask the device whether its last reset finished
    QueryResetStatus,
}

impl Request {
    /// Wire identifier of this request
    pub fn msg_type(&self) -> u8 {
        match self {
            Request::SetData { .. } => msg_type::SET_DATA,
            Request::Reset { .. } => msg_type::RESET,
            Request::QueryResetStatus => msg_type::QUERY_RESET_STATUS,
        }
    }

    /// Short name for logs and errors
    pub fn name(&self) -> &'static str {
        match self {
            Request::SetData { .. } => "SetData",
            Request::Reset { .. } => "Reset",
            Request::QueryResetStatus => "QueryResetStatus",
        }
    }

    /// Reply the device sends for this request, if any
    ///
    /// `SetData` is answered by a stream of `HashResult` frames that carry the
    /// `SetData` counter; `Reset` is fire-and-forget.
    pub fn expected_reply(&self) -> Option<ReplyKind> {
        match self {
            Request::SetData { .. } => Some(ReplyKind::HashResult),
            Request::Reset { .. } => None,
            Request::QueryResetStatus => Some(ReplyKind::ResetStatus),
        }
    }

    /// Serialises the payload
    ///
    /// Lanes go out as little-endian words; since the preprocessor already
    /// byte-swapped them, each lane is big-endian on the wire. The target is
    /// little-endian.
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Request::SetData { state, target } => {
                let mut out = Vec::with_capacity(SET_DATA_LEN);
                for lane in state {
                    out.extend_from_slice(&lane.to_le_bytes());
                }
                out.extend_from_slice(&target.to_le_bytes());
                out
            }
            Request::Reset { hold } => vec![u8::from(*hold)],
            Request::QueryResetStatus => Vec::new(),
        }
    }

    /// Builds a request from a type identifier and raw payload
    ///
    /// Validates the payload size before anything touches the transport.
    /// An empty `Reset` payload means "hold in reset".
    pub fn from_raw(msg_type: u8, payload: &[u8]) -> Result<Self, MinerError> {
        match msg_type {
            msg_type::SET_DATA => {
                check_len("SetData", SET_DATA_LEN, payload)?;
                let mut state = [0u64; STATE_LANES];
                for (lane, chunk) in state.iter_mut().zip(payload.chunks_exact(8)) {
                    *lane = read_u64_le(chunk);
                }
                let target = read_u64_le(&payload[STATE_LANES * 8..]);
                Ok(Request::SetData { state, target })
            }
            msg_type::RESET => match payload {
                [] => Ok(Request::Reset { hold: true }),
                [flag] => Ok(Request::Reset { hold: *flag != 0 }),
                _ => Err(MinerError::InvalidPayload {
                    message: "Reset",
                    expected: RESET_LEN,
                    actual: payload.len(),
                }),
            },
            msg_type::QUERY_RESET_STATUS => {
                check_len("QueryResetStatus", 0, payload)?;
                Ok(Request::QueryResetStatus)
            }
            other => Err(MinerError::InputError(format!(
                "Unknown request type 0x{:02x}",
                other
            ))),
        }
    }
}

/// Reply shapes the host waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    /// A candidate from the hashing core
    HashResult,
    /// Reset completion flag
    ResetStatus,
}

impl ReplyKind {
    /// Wire identifier
    pub fn msg_type(self) -> u8 {
        match self {
            ReplyKind::HashResult => msg_type::HASH_RESULT,
            ReplyKind::ResetStatus => msg_type::RESET_STATUS_REPLY,
        }
    }

    /// Declared payload size a valid reply carries
    pub fn payload_len(self) -> usize {
        match self {
            ReplyKind::HashResult => HASH_RESULT_LEN,
            ReplyKind::ResetStatus => RESET_STATUS_LEN,
        }
    }
}

/// Typed reply from a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Candidate found by the device
    HashResult {
        /// Nonce counter as reported by the device
        nonce: u32,
        /// Digest the device computed
        digest: [u8; 32],
    },
    /// Whether the requested reset has completed
    ResetStatus {
        /// Reset completion flag
        completed: bool,
    },
}

impl Reply {
    /// Interprets a frame as `kind`
    ///
    /// Returns `None` when the type or payload size does not fit, which the
    /// session treats as chatter and skips.
    pub fn parse(kind: ReplyKind, frame: &Frame) -> Option<Self> {
        if frame.msg_type != kind.msg_type() || frame.payload.len() != kind.payload_len() {
            return None;
        }
        match kind {
            ReplyKind::HashResult => {
                let mut nonce = [0u8; 4];
                nonce.copy_from_slice(&frame.payload[..4]);
                let mut digest = [0u8; 32];
                digest.copy_from_slice(&frame.payload[4..HASH_RESULT_LEN]);
                Some(Reply::HashResult {
                    nonce: u32::from_le_bytes(nonce),
                    digest,
                })
            }
            ReplyKind::ResetStatus => Some(Reply::ResetStatus {
                completed: frame.payload[0] != 0,
            }),
        }
    }

    /// Payload bytes as the device would send them
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Reply::HashResult { nonce, digest } => {
                let mut out = Vec::with_capacity(HASH_RESULT_LEN);
                out.extend_from_slice(&nonce.to_le_bytes());
                out.extend_from_slice(digest);
                out
            }
            Reply::ResetStatus { completed } => vec![u8::from(*completed)],
        }
    }

    /// Wire identifier
    pub fn msg_type(&self) -> u8 {
        match self {
            Reply::HashResult { .. } => msg_type::HASH_RESULT,
            Reply::ResetStatus { .. } => msg_type::RESET_STATUS_REPLY,
        }
    }
}

fn check_len(message: &'static str, expected: usize, payload: &[u8]) -> Result<(), MinerError> {
    if payload.len() != expected {
        return Err(MinerError::InvalidPayload {
            message,
            expected,
            actual: payload.len(),
        });
    }
    Ok(())
}

fn read_u64_le(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(word)
}
