// src/device/session.rs
//! Per-device protocol session
//!
//! A session exclusively owns one transport. It numbers every request with a
//! rolling counter and only accepts replies that echo the counter of the
//! last request sent; everything else on the line is logged and skipped.
//!
//! ```text
//! Closed -> Open -> Idle <-> AwaitingReply
//!                     \-> Faulted (write/read failure)
//! ```

use crate::device::codec::{Decoded, FrameDecoder, encode};
use crate::device::preprocess::{RATE_BYTES, build_absorb_state};
use crate::device::protocol::{Frame, MAX_INBOUND_PAYLOAD, Reply, ReplyKind, Request};
use crate::device::transport::{SerialSettings, Transport, open_transport};
use crate::utils::error::MinerError;
use std::time::{Duration, Instant};

/// How many status queries to spend waiting for a reset to complete
pub const RESET_POLL_ATTEMPTS: u32 = 5;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transport attached
    Closed,
    /// Transport attached, line not yet prepared
    Open,
    /// Ready for the next request
    Idle,
    /// Blocked waiting for a reply
    AwaitingReply,
    /// A transport failure made the session unusable
    Faulted,
}

/// Outcome of waiting on the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Awaited {
    /// A reply matching type, counter and size
    Reply(Reply),
    /// The request carries no reply; it was written successfully
    Delivered,
    /// Nothing matching arrived in time; the device may still be working
    Timeout,
}

/// Protocol session with one device
pub struct DeviceSession<T: Transport> {
    address: String,
    transport: Option<T>,
    counter: u8,
    timeout: Duration,
    state: SessionState,
    decoder: FrameDecoder,
}

impl DeviceSession<Box<dyn Transport>> {
    /// Opens the device at `address` and prepares the line
    ///
    /// # Errors
    /// `DeviceOpen` if the transport cannot be opened or configured. This is
    /// fatal for the device; it must not be retried automatically.
    pub fn open(address: &str, settings: &SerialSettings, timeout: Duration) -> Result<Self, MinerError> {
        let transport = open_transport(address, settings)?;
        Self::with_transport(address, transport, timeout)
    }
}

impl<T: Transport> DeviceSession<T> {
    /// Wraps an already open transport
    pub fn with_transport(address: &str, transport: T, timeout: Duration) -> Result<Self, MinerError> {
        let mut session = Self {
            address: address.to_string(),
            transport: Some(transport),
            counter: 0,
            timeout,
            state: SessionState::Open,
            decoder: FrameDecoder::new(MAX_INBOUND_PAYLOAD),
        };

        let flushed = match session.transport.as_mut() {
            Some(transport) => transport.discard_input(),
            None => Ok(()),
        };
        if let Err(e) = flushed {
            session.state = SessionState::Faulted;
            return Err(MinerError::DeviceOpen {
                address: address.to_string(),
                reason: format!("cannot flush receive buffer: {}", e),
            });
        }

        session.state = SessionState::Idle;
        log::info!("Device {} session open, reply timeout {:?}", address, timeout);
        Ok(session)
    }

    /// Transport address of the device
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Counter carried by the last request sent
    pub fn counter(&self) -> u8 {
        self.counter
    }

    /// Default reply window
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Frames dropped by the decoder so far (bad length or tail)
    pub fn dropped_frames(&self) -> u64 {
        self.decoder.dropped_frames()
    }

    fn fault(&self, reason: impl Into<String>) -> MinerError {
        MinerError::SessionFault {
            address: self.address.clone(),
            reason: reason.into(),
        }
    }

    fn usable_transport(&mut self) -> Result<&mut T, MinerError> {
        match self.state {
            SessionState::Faulted => Err(self.fault("session is faulted")),
            SessionState::Closed => Err(self.fault("session is closed")),
            _ => {
                let address = self.address.clone();
                self.transport.as_mut().ok_or(MinerError::SessionFault {
                    address,
                    reason: "no transport".into(),
                })
            }
        }
    }

    /// Writes `request` with the next counter value
    ///
    /// Returns the counter used.
    pub fn send(&mut self, request: &Request) -> Result<u8, MinerError> {
        let counter = self.counter.wrapping_add(1);
        let frame = Frame::new(request.msg_type(), counter, request.payload());
        let bytes = encode(&frame)?;

        let transport = self.usable_transport()?;
        let written = match transport.write_all(&bytes) {
            Ok(()) => transport.flush(),
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            self.state = SessionState::Faulted;
            log::error!("Device {}: writing {} failed: {}", self.address, request.name(), e);
            return Err(self.fault(format!("write failed: {}", e)));
        }

        self.counter = counter;
        log::trace!(
            "Device {}: tx {} cnt: {} data: {}",
            self.address,
            request.name(),
            counter,
            hex::encode(&frame.payload)
        );
        Ok(counter)
    }

    /// Waits for a reply of `kind` that echoes the last sent counter
    ///
    /// Frames with the wrong type, counter or size are stale or partial
    /// chatter; they are logged and skipped.
    pub fn await_reply(&mut self, kind: ReplyKind, timeout: Duration) -> Result<Awaited, MinerError> {
        let deadline = Instant::now() + timeout;
        let expected_counter = self.counter;
        self.usable_transport()?;
        self.state = SessionState::AwaitingReply;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.state = SessionState::Idle;
                return Ok(Awaited::Timeout);
            }

            let Some(transport) = self.transport.as_mut() else {
                self.state = SessionState::Faulted;
                return Err(self.fault("no transport"));
            };
            let frame = match self.decoder.decode_stream(transport, remaining) {
                Ok(Decoded::Frame(frame)) => frame,
                Ok(Decoded::Timeout) => {
                    self.state = SessionState::Idle;
                    return Ok(Awaited::Timeout);
                }
                Err(e) => {
                    self.state = SessionState::Faulted;
                    log::error!("Device {}: read failed: {}", self.address, e);
                    return Err(self.fault(format!("read failed: {}", e)));
                }
            };

            if frame.msg_type != kind.msg_type() {
                log::debug!(
                    "Device {}: msg id 0x{:02x} != 0x{:02x}, skipped",
                    self.address,
                    frame.msg_type,
                    kind.msg_type()
                );
                continue;
            }
            if frame.counter != expected_counter {
                log::debug!(
                    "Device {}: msg counter 0x{:02x} != 0x{:02x}, skipped",
                    self.address,
                    frame.counter,
                    expected_counter
                );
                continue;
            }
            match Reply::parse(kind, &frame) {
                Some(reply) => {
                    self.state = SessionState::Idle;
                    return Ok(Awaited::Reply(reply));
                }
                None => log::debug!(
                    "Device {}: msg size {} != {}, skipped",
                    self.address,
                    frame.payload.len(),
                    kind.payload_len()
                ),
            }
        }
    }

    /// Sends `request` and waits for its reply, if it has one
    pub fn submit_and_await(&mut self, request: &Request, timeout: Duration) -> Result<Awaited, MinerError> {
        self.send(request)?;
        match request.expected_reply() {
            Some(kind) => self.await_reply(kind, timeout),
            None => Ok(Awaited::Delivered),
        }
    }

    /// Activates (`true`) or deactivates (`false`) the hashing core
    pub fn reset(&mut self, activate: bool) -> Result<(), MinerError> {
        self.send(&Request::Reset { hold: !activate })?;
        Ok(())
    }

    /// Asks whether the last reset completed; `None` on timeout
    pub fn query_reset_status(&mut self) -> Result<Option<bool>, MinerError> {
        match self.submit_and_await(&Request::QueryResetStatus, self.timeout)? {
            Awaited::Reply(Reply::ResetStatus { completed }) => Ok(Some(completed)),
            _ => Ok(None),
        }
    }

    /// Loads a new job into the device
    ///
    /// Deactivates the core, waits for the reset to complete, reactivates it
    /// and sends the absorb state. After this, `HashResult` replies carry the
    /// `SetData` counter.
    pub fn load_job(&mut self, blob: &[u8], target: u64) -> Result<(), MinerError> {
        let state = build_absorb_state(blob, RATE_BYTES)?;

        self.reset(false)?;
        let mut completed = false;
        for attempt in 1..=RESET_POLL_ATTEMPTS {
            match self.query_reset_status()? {
                Some(true) => {
                    completed = true;
                    break;
                }
                Some(false) => log::debug!("Device {}: reset pending ({})", self.address, attempt),
                None => log::debug!("Device {}: no reset status yet ({})", self.address, attempt),
            }
        }
        if !completed {
            log::warn!(
                "Device {}: reset not confirmed after {} queries, loading anyway",
                self.address,
                RESET_POLL_ATTEMPTS
            );
        }
        self.reset(true)?;

        self.send(&Request::SetData { state, target })?;
        Ok(())
    }

    /// Waits up to `timeout` for a candidate from the current job
    ///
    /// `Ok(None)` means the device is still searching.
    pub fn poll_hash_result(&mut self, timeout: Duration) -> Result<Option<(u32, [u8; 32])>, MinerError> {
        match self.await_reply(ReplyKind::HashResult, timeout)? {
            Awaited::Reply(Reply::HashResult { nonce, digest }) => Ok(Some((nonce, digest))),
            _ => Ok(None),
        }
    }

    /// Deactivates the core and releases the transport
    ///
    /// Never fails: a faulty device must not block shutdown.
    pub fn close(&mut self) {
        if self.transport.is_none() {
            self.state = SessionState::Closed;
            return;
        }
        if self.state != SessionState::Faulted {
            if let Err(e) = self.reset(false) {
                log::warn!("Device {}: reset on close failed: {}", self.address, e);
            }
        }
        self.transport = None;
        self.state = SessionState::Closed;
        log::info!("Device {} session closed", self.address);
    }
}

impl<T: Transport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        self.close();
    }
}
