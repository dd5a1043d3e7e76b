// src/device/transport.rs
//! Byte-stream transports a device session can run over
//!
//! A transport is anything with blocking `Read + Write`. A read that finds
//! nothing should either return `Ok(0)` or a `TimedOut` error; the codec
//! keeps waiting until its own deadline either way.

use crate::device::codec::encode;
use crate::device::protocol::{FIELDS_LEN, Frame, HEADER_MAGIC, Reply, Request, TAIL_MAGIC};
use crate::utils::error::MinerError;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Address prefix that selects the in-memory simulated device
pub const SIMULATED_PREFIX: &str = "sim:";

/// A bidirectional byte stream owned by exactly one session
pub trait Transport: Read + Write + Send {
    /// Drops anything the device sent before we started listening
    fn discard_input(&mut self) -> Result<(), MinerError> {
        Ok(())
    }
}

impl Transport for Box<dyn Transport> {
    fn discard_input(&mut self) -> Result<(), MinerError> {
        (**self).discard_input()
    }
}

/// Line settings for a serial link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialSettings {
    /// Bits per second
    pub baud_rate: u32,
    /// How long a single read may block before reporting "no data"
    pub read_timeout: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            baud_rate: 115_200,
            read_timeout: Duration::from_millis(10),
        }
    }
}

/// Serial port transport (8 data bits, no parity, one stop bit, no flow control)
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Opens and configures the port at `address`
    ///
    /// Applied parameters are read back; a port that silently ignores them is
    /// as unusable as one that fails to open.
    ///
    /// # Errors
    /// `DeviceOpen` for every failure; callers must not retry on their own.
    pub fn open(address: &str, settings: &SerialSettings) -> Result<Self, MinerError> {
        let open_err = |reason: String| MinerError::DeviceOpen {
            address: address.to_string(),
            reason,
        };

        let port = serialport::new(address, settings.baud_rate)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(settings.read_timeout)
            .open()
            .map_err(|e| open_err(format!("open failed: {}", e)))?;

        let baud = port
            .baud_rate()
            .map_err(|e| open_err(format!("cannot read line parameters: {}", e)))?;
        if baud != settings.baud_rate {
            return Err(open_err(format!(
                "requested {} baud, port reports {}",
                settings.baud_rate, baud
            )));
        }

        let mut transport = Self { port };
        transport.discard_input()?;
        log::debug!(
            "Opened {} at {} baud, read timeout {:?}",
            address,
            baud,
            settings.read_timeout
        );
        Ok(transport)
    }
}

impl Read for SerialTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl Write for SerialTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.port.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

impl Transport for SerialTransport {
    fn discard_input(&mut self) -> Result<(), MinerError> {
        self.port.clear(ClearBuffer::All)?;
        Ok(())
    }
}

/// Opens the transport named by `address`
///
/// `sim:<name>` gives an in-memory [`SimulatedDevice`]; anything else is a
/// serial port path.
pub fn open_transport(address: &str, settings: &SerialSettings) -> Result<Box<dyn Transport>, MinerError> {
    if address.starts_with(SIMULATED_PREFIX) {
        log::warn!("{} is a simulated device; it never reports results", address);
        return Ok(Box::new(SimulatedDevice::new()));
    }
    Ok(Box::new(SerialTransport::open(address, settings)?))
}

#[derive(Debug, Default)]
struct SimState {
    /// Host -> device bytes not yet parsed into frames
    inbound: Vec<u8>,
    /// Device -> host bytes waiting to be read
    outbound: VecDeque<u8>,
    /// Every frame the host sent, in order
    received: Vec<Frame>,
    /// Total bytes the host wrote
    bytes_written: usize,
    /// Core held in reset
    held: bool,
    /// Results to stream back after the next SetData
    pending_results: Vec<(u32, [u8; 32])>,
    /// Answer QueryResetStatus with "not yet" this many times
    reset_delay: u32,
}

/// In-memory device speaking the wire protocol
///
/// Clones share state, so a test can keep a handle while a worker thread
/// owns the transport.
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDevice {
    /// Creates an idle device
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a `HashResult` to be sent after the next `SetData`
    pub fn queue_result(&self, nonce: u32, digest: [u8; 32]) {
        self.lock().pending_results.push((nonce, digest));
    }

    /// Makes the next reset take `polls` extra status queries to complete
    pub fn delay_reset(&self, polls: u32) {
        self.lock().reset_delay = polls;
    }

    /// Pushes raw bytes towards the host, e.g. line noise or stale frames
    pub fn inject_raw(&self, bytes: &[u8]) {
        self.lock().outbound.extend(bytes.iter().copied());
    }

    /// Frames the host has sent so far
    pub fn received(&self) -> Vec<Frame> {
        self.lock().received.clone()
    }

    /// Total bytes the host has written
    pub fn bytes_written(&self) -> usize {
        self.lock().bytes_written
    }

    /// Whether the hashing core is currently held in reset
    pub fn is_held(&self) -> bool {
        self.lock().held
    }

    fn respond(state: &mut SimState, counter: u8, reply: Reply) {
        let frame = Frame::new(reply.msg_type(), counter, reply.payload());
        if let Ok(bytes) = encode(&frame) {
            state.outbound.extend(bytes);
        }
    }

    fn handle(state: &mut SimState, frame: Frame) {
        match Request::from_raw(frame.msg_type, &frame.payload) {
            Ok(Request::Reset { hold }) => state.held = hold,
            Ok(Request::QueryResetStatus) => {
                let completed = state.held && state.reset_delay == 0;
                state.reset_delay = state.reset_delay.saturating_sub(1);
                Self::respond(state, frame.counter, Reply::ResetStatus { completed });
            }
            Ok(Request::SetData { .. }) => {
                let results = std::mem::take(&mut state.pending_results);
                for (nonce, digest) in results {
                    Self::respond(state, frame.counter, Reply::HashResult { nonce, digest });
                }
            }
            Err(e) => log::debug!("simulated device ignored frame: {}", e),
        }
        state.received.push(frame);
    }
}

/// Pulls one complete frame off the front of `buf`, dropping noise and bad frames
fn take_frame(buf: &mut Vec<u8>) -> Option<Frame> {
    let fields_end = HEADER_MAGIC.len() + FIELDS_LEN;
    loop {
        let start = buf.windows(HEADER_MAGIC.len()).position(|w| w == HEADER_MAGIC)?;
        buf.drain(..start);
        if buf.len() < fields_end {
            return None;
        }
        let len = u16::from_le_bytes([buf[6], buf[7]]) as usize;
        let end = fields_end + len + TAIL_MAGIC.len();
        if buf.len() < end {
            return None;
        }
        let frame_bytes: Vec<u8> = buf.drain(..end).collect();
        if frame_bytes[end - TAIL_MAGIC.len()..] == TAIL_MAGIC {
            return Some(Frame::new(
                frame_bytes[4],
                frame_bytes[5],
                frame_bytes[fields_end..fields_end + len].to_vec(),
            ));
        }
    }
}

impl Read for SimulatedDevice {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        let n = buf.len().min(state.outbound.len());
        for (slot, byte) in buf.iter_mut().zip(state.outbound.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimulatedDevice {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        state.bytes_written += buf.len();
        state.inbound.extend_from_slice(buf);
        let mut inbound = std::mem::take(&mut state.inbound);
        while let Some(frame) = take_frame(&mut inbound) {
            Self::handle(&mut state, frame);
        }
        state.inbound = inbound;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Transport for SimulatedDevice {
    fn discard_input(&mut self) -> Result<(), MinerError> {
        self.lock().outbound.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::protocol::msg_type;

    #[test]
    fn simulated_device_answers_status_queries_with_request_counter() {
        let mut dev = SimulatedDevice::new();
        dev.write_all(&encode(&Frame::new(msg_type::RESET, 4, vec![1])).unwrap())
            .unwrap();
        dev.write_all(&encode(&Frame::new(msg_type::QUERY_RESET_STATUS, 5, vec![])).unwrap())
            .unwrap();
        assert!(dev.is_held());

        let mut out = vec![0u8; 64];
        let n = dev.read(&mut out).unwrap();
        let mut bytes = out[..n].to_vec();
        let frame = take_frame(&mut bytes).unwrap();
        assert_eq!(frame, Frame::new(msg_type::RESET_STATUS_REPLY, 5, vec![1]));
        assert_eq!(dev.received().len(), 2);
    }

    #[test]
    fn frames_split_across_writes_are_reassembled() {
        let mut dev = SimulatedDevice::new();
        let bytes = encode(&Frame::new(msg_type::RESET, 1, vec![0])).unwrap();
        dev.write_all(&bytes[..5]).unwrap();
        assert!(dev.received().is_empty());
        dev.write_all(&bytes[5..]).unwrap();
        assert_eq!(dev.received(), vec![Frame::new(msg_type::RESET, 1, vec![0])]);
        assert_eq!(dev.bytes_written(), bytes.len());
    }

    #[test]
    fn simulated_address_opens_without_hardware() {
        assert!(open_transport("sim:fpga0", &SerialSettings::default()).is_ok());
    }
}
