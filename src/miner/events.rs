// src/miner/events.rs
//! Results and diagnostics leaving the workers
//!
//! Workers never block on the consumer: publishing is a single enqueue onto
//! an unbounded channel.

use crate::types::AlgorithmType;
use crossbeam_channel::{Receiver, Sender, unbounded};

/// A verified candidate
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobResult {
    /// Job the candidate belongs to
    pub job_id: String,
    /// Nonce that produced `digest`
    pub nonce: u32,
    /// Digest recomputed on the host
    pub digest: [u8; 32],
    /// Worker that found it
    pub worker_id: usize,
    /// Algorithm used
    pub algorithm: AlgorithmType,
    /// Pool the job came from
    pub pool_id: u32,
}

/// Operator-facing message about a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// What happened
    pub message: String,
    /// Device address
    pub device: String,
    /// Pool the affected job came from
    pub pool_id: u32,
}

/// Everything a worker can emit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MinerEvent {
    /// Verified candidate
    Result(JobResult),
    /// Hardware-correctness or lifecycle notice
    Diagnostic(Diagnostic),
}

/// Destination for worker output
///
/// Fire-and-forget: implementations must not block for longer than an enqueue.
pub trait EventSink: Send + Sync {
    /// Publishes a verified candidate
    fn publish(&self, result: JobResult);

    /// Publishes a diagnostic
    fn publish_diagnostic(&self, message: &str, device: &str, pool_id: u32);
}

/// [`EventSink`] backed by a crossbeam channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: Sender<MinerEvent>,
}

impl ChannelSink {
    /// Creates a sink and the receiver that drains it
    pub fn new() -> (Self, Receiver<MinerEvent>) {
        let (sender, receiver) = unbounded();
        (Self { sender }, receiver)
    }

    /// Wraps an existing sender
    pub fn from_sender(sender: Sender<MinerEvent>) -> Self {
        Self { sender }
    }

    fn send(&self, event: MinerEvent) {
        // A dropped receiver means the process is shutting down.
        if let Err(e) = self.sender.send(event) {
            log::debug!("Event dropped: {:?}", e.into_inner());
        }
    }
}

impl EventSink for ChannelSink {
    fn publish(&self, result: JobResult) {
        self.send(MinerEvent::Result(result));
    }

    fn publish_diagnostic(&self, message: &str, device: &str, pool_id: u32) {
        self.send(MinerEvent::Diagnostic(Diagnostic {
            message: message.to_string(),
            device: device.to_string(),
            pool_id,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_arrive_in_order() {
        let (sink, rx) = ChannelSink::new();
        sink.publish_diagnostic("FPGA invalid result", "sim:0", 3);
        sink.publish(JobResult {
            job_id: "j1".into(),
            nonce: 9,
            digest: [0; 32],
            worker_id: 1,
            algorithm: AlgorithmType::Keccak,
            pool_id: 3,
        });

        assert!(matches!(rx.recv().unwrap(), MinerEvent::Diagnostic(d) if d.device == "sim:0"));
        assert!(matches!(rx.recv().unwrap(), MinerEvent::Result(r) if r.nonce == 9));
    }

    #[test]
    fn publishing_after_receiver_drop_does_not_panic() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.publish_diagnostic("late", "sim:0", 0);
    }
}
