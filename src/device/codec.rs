// src/device/codec.rs
//! Frame encoder and resynchronising stream decoder
//!
//! The decoder pulls bytes from any `Read` until a complete frame with valid
//! header and tail magic has arrived, or the wall-clock budget is spent.
//! Running out of time is an ordinary outcome ([`Decoded::Timeout`]).
//!
//! The budget only bounds the header search. Once the header has matched,
//! the rest of the frame gets at least the frame grace, so a frame still on
//! the wire when the budget expires is finished rather than torn.

use crate::device::protocol::{FIELDS_LEN, Frame, HEADER_MAGIC, MAX_PAYLOAD_LEN, TAIL_MAGIC};
use crate::utils::error::MinerError;
use std::io::{ErrorKind, Read};
use std::time::{Duration, Instant};

/// Pause after a read that returned no data and no timeout of its own
const IDLE_BACKOFF: Duration = Duration::from_millis(1);

/// Minimum time a matched frame gets to finish arriving
pub const FRAME_GRACE: Duration = Duration::from_millis(100);

/// Serialises a frame
///
/// # Errors
/// `PayloadTooLarge` if the payload does not fit the 16-bit length field.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, MinerError> {
    let len = frame.payload.len();
    if len > MAX_PAYLOAD_LEN {
        return Err(MinerError::PayloadTooLarge {
            len,
            max: MAX_PAYLOAD_LEN,
        });
    }

    let mut out = Vec::with_capacity(HEADER_MAGIC.len() + FIELDS_LEN + len + TAIL_MAGIC.len());
    out.extend_from_slice(&HEADER_MAGIC);
    out.push(frame.msg_type);
    out.push(frame.counter);
    out.extend_from_slice(&(len as u16).to_le_bytes());
    out.extend_from_slice(&frame.payload);
    out.extend_from_slice(&TAIL_MAGIC);
    Ok(out)
}

/// Result of one decode attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete, magic-checked frame
    Frame(Frame),
    /// The time budget ran out before a frame completed
    Timeout,
}

/// Stream decoder with magic-sequence resynchronisation
///
/// Keeps counters of discarded input so a session can report link quality.
#[derive(Debug)]
pub struct FrameDecoder {
    max_payload: usize,
    frame_grace: Duration,
    skipped_bytes: u64,
    dropped_frames: u64,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_LEN)
    }
}

impl FrameDecoder {
    /// Creates a decoder that accepts payloads up to `max_payload` bytes
    ///
    /// A larger declared length means the length field is garbage; the frame
    /// is dropped and header matching restarts.
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload: max_payload.min(MAX_PAYLOAD_LEN),
            frame_grace: FRAME_GRACE,
            skipped_bytes: 0,
            dropped_frames: 0,
        }
    }

    /// Overrides how long a matched frame may take to complete
    pub fn with_frame_grace(mut self, grace: Duration) -> Self {
        self.frame_grace = grace;
        self
    }

    /// Bytes discarded while hunting for a header
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    /// Frames discarded after the header matched (bad length, bad tail or stalled)
    pub fn dropped_frames(&self) -> u64 {
        self.dropped_frames
    }

    /// Reads the next valid frame from `source`
    ///
    /// There is no backtracking: bytes consumed by a rejected frame are gone,
    /// and the search restarts at the next header.
    ///
    /// # Errors
    /// Only hard transport failures; timeouts are `Ok(Decoded::Timeout)`.
    pub fn decode_stream<R: Read + ?Sized>(
        &mut self,
        source: &mut R,
        timeout: Duration,
    ) -> Result<Decoded, MinerError> {
        let deadline = Instant::now() + timeout;

        loop {
            if !self.match_header(source, deadline)? {
                return Ok(Decoded::Timeout);
            }
            let frame_deadline = deadline.max(Instant::now() + self.frame_grace);

            let mut fields = [0u8; FIELDS_LEN];
            if !read_exact_until(source, &mut fields, frame_deadline)? {
                self.torn("fields");
                return Ok(Decoded::Timeout);
            }
            let msg_type = fields[0];
            let counter = fields[1];
            let len = u16::from_le_bytes([fields[2], fields[3]]) as usize;

            if len > self.max_payload {
                log::debug!(
                    "Declared payload {} exceeds {} bytes, resyncing",
                    len,
                    self.max_payload
                );
                self.dropped_frames += 1;
                continue;
            }

            let mut payload = vec![0u8; len];
            if !read_exact_until(source, &mut payload, frame_deadline)? {
                self.torn("payload");
                return Ok(Decoded::Timeout);
            }

            let mut tail = [0u8; 4];
            if !read_exact_until(source, &mut tail, frame_deadline)? {
                self.torn("tail");
                return Ok(Decoded::Timeout);
            }
            if tail != TAIL_MAGIC {
                log::debug!(
                    "Tail mismatch ({}), dropping frame type 0x{:02x}",
                    hex::encode(tail),
                    msg_type
                );
                self.dropped_frames += 1;
                continue;
            }

            let frame = Frame::new(msg_type, counter, payload);
            log::trace!(
                "rx frame id: 0x{:02x} cnt: {} sz: {} data: {}",
                frame.msg_type,
                frame.counter,
                len,
                hex::encode(&frame.payload)
            );
            return Ok(Decoded::Frame(frame));
        }
    }

    fn torn(&mut self, part: &str) {
        log::debug!("Frame stalled in its {} after the header, dropping it", part);
        self.dropped_frames += 1;
    }

    /// Consumes bytes until the full header magic has been seen
    ///
    /// A mismatching byte that equals the first magic byte starts a new match
    /// rather than being thrown away.
    fn match_header<R: Read + ?Sized>(
        &mut self,
        source: &mut R,
        deadline: Instant,
    ) -> Result<bool, MinerError> {
        let mut matched = 0;
        while matched < HEADER_MAGIC.len() {
            let Some(byte) = read_byte_until(source, deadline)? else {
                return Ok(false);
            };
            if byte == HEADER_MAGIC[matched] {
                matched += 1;
                continue;
            }
            log::trace!(
                "Header mismatch, skipped {:02x} (expected {:02x} at {})",
                byte,
                HEADER_MAGIC[matched],
                matched
            );
            self.skipped_bytes += matched as u64 + 1;
            matched = 0;
            if byte == HEADER_MAGIC[0] {
                self.skipped_bytes -= 1;
                matched = 1;
            }
        }
        Ok(true)
    }
}

/// Reads one byte, waiting up to `deadline`
fn read_byte_until<R: Read + ?Sized>(
    source: &mut R,
    deadline: Instant,
) -> Result<Option<u8>, MinerError> {
    let mut byte = [0u8; 1];
    Ok(read_exact_until(source, &mut byte, deadline)?.then_some(byte[0]))
}

/// Fills `buf`, waiting up to `deadline`
///
/// Returns `false` if the deadline passed first; partially read data is lost.
fn read_exact_until<R: Read + ?Sized>(
    source: &mut R,
    buf: &mut [u8],
    deadline: Instant,
) -> Result<bool, MinerError> {
    let mut filled = 0;
    while filled < buf.len() {
        let now = Instant::now();
        if now >= deadline {
            return Ok(false);
        }
        match source.read(&mut buf[filled..]) {
            Ok(0) => std::thread::sleep(IDLE_BACKOFF.min(deadline - now)),
            Ok(n) => filled += n,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(IDLE_BACKOFF.min(deadline - now))
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}
