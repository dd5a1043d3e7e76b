// src/stats/reporter.rs
use crate::miner::events::MinerEvent;
use crate::miner::worker::INVALID_RESULT_MESSAGE;
use crossbeam_channel::{Receiver, Sender};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use sysinfo::{Components, System};

/// Statistics related to mining performance
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MiningStats {
    /// Total number of hashes computed by software workers
    pub hashes_total: u64,
    /// Candidates that passed host verification
    pub results_verified: u64,
    /// Device candidates that failed host verification
    pub results_invalid: u64,
    /// Average software hashrate since start (hashes per second)
    pub avg_hashrate: f64,
}

/// Statistics related to hardware performance
#[derive(Debug, Clone)]
pub struct HardwareStats {
    /// Current CPU usage percentage (0-100)
    pub cpu_usage: f32,
    /// Memory currently used (in bytes)
    pub memory_used: u64,
    /// Current CPU temperature in Celsius
    pub temperature: f32,
}

/// Atomic counters shared by the listeners and the reporting thread
struct MiningStatsAtomic {
    hashes: AtomicU64,
    verified: AtomicU64,
    invalid: AtomicU64,
    start_time: Instant,
}

/// Collects and reports mining and hardware statistics
pub struct StatsReporter {
    stats: Arc<MiningStatsAtomic>,
    system: System,
    components: Components,
    report_interval: Duration,
}

impl StatsReporter {
    /// Creates a new StatsReporter with the specified reporting interval
    ///
    /// # Arguments
    /// * `report_interval` - How often to log statistics
    pub fn new(report_interval: Duration) -> Self {
        StatsReporter {
            stats: Arc::new(MiningStatsAtomic {
                hashes: AtomicU64::new(0),
                verified: AtomicU64::new(0),
                invalid: AtomicU64::new(0),
                start_time: Instant::now(),
            }),
            system: System::new(),
            components: Components::new_with_refreshed_list(),
            report_interval,
        }
    }

    /// Creates a channel sender for hash counts
    ///
    /// A background listener adds every received count to the total and
    /// exits once all senders are dropped.
    pub fn hash_sender(&self) -> Sender<u64> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.start_hashrate_listener(rx);
        tx
    }

    /// Counts one worker event
    pub fn record(&self, event: &MinerEvent) {
        match event {
            MinerEvent::Result(_) => {
                self.stats.verified.fetch_add(1, Ordering::Relaxed);
            }
            MinerEvent::Diagnostic(d) if d.message == INVALID_RESULT_MESSAGE => {
                self.stats.invalid.fetch_add(1, Ordering::Relaxed);
            }
            MinerEvent::Diagnostic(_) => {}
        }
    }

    /// Gets the current mining statistics
    pub fn get_stats(&self) -> MiningStats {
        let seconds = self.stats.start_time.elapsed().as_secs_f64();
        let hashes = self.stats.hashes.load(Ordering::Relaxed);

        MiningStats {
            hashes_total: hashes,
            results_verified: self.stats.verified.load(Ordering::Relaxed),
            results_invalid: self.stats.invalid.load(Ordering::Relaxed),
            avg_hashrate: if seconds > 0.0 { hashes as f64 / seconds } else { 0.0 },
        }
    }

    /// Gets the current hardware statistics
    ///
    /// This refreshes system information before returning the stats.
    pub fn get_hardware_stats(&mut self) -> HardwareStats {
        self.system.refresh_cpu_all();
        self.system.refresh_memory();
        self.components.refresh(true);

        let cpus = self.system.cpus();
        let cpu_usage = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| c.cpu_usage()).sum::<f32>() / cpus.len() as f32
        };

        let temperature = self
            .components
            .iter()
            .find(|c| c.label().contains("CPU"))
            .and_then(|c| c.temperature())
            .unwrap_or(0.0);

        HardwareStats {
            cpu_usage,
            memory_used: self.system.used_memory(),
            temperature,
        }
    }

    /// Starts the periodic reporting of statistics
    ///
    /// Spawns a background thread that logs stats at the configured interval
    /// until `quit` is set.
    pub fn start_reporting(&self, quit: Arc<AtomicBool>) -> JoinHandle<()> {
        let stats = self.stats.clone();
        let interval = self.report_interval;

        std::thread::spawn(move || {
            let mut reporter = StatsReporter {
                stats,
                system: System::new(),
                components: Components::new_with_refreshed_list(),
                report_interval: interval,
            };

            let tick = Duration::from_millis(100).min(interval);
            let mut last = Instant::now();
            while !quit.load(Ordering::Relaxed) {
                std::thread::sleep(tick);
                if last.elapsed() < interval {
                    continue;
                }
                last = Instant::now();

                let mining_stats = reporter.get_stats();
                let hw_stats = reporter.get_hardware_stats();
                log::info!(
                    "Hashrate: {:.2} H/s | Verified/Invalid: {}/{} | CPU: {:.1}% | Temp: {:.1}°C",
                    mining_stats.avg_hashrate,
                    mining_stats.results_verified,
                    mining_stats.results_invalid,
                    hw_stats.cpu_usage,
                    hw_stats.temperature
                );
            }
        })
    }

    /// Starts a listener for hash counts on a background thread
    fn start_hashrate_listener(&self, receiver: Receiver<u64>) {
        let stats = self.stats.clone();

        std::thread::spawn(move || {
            for count in receiver {
                stats.hashes.fetch_add(count, Ordering::Relaxed);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::events::Diagnostic;

    #[test]
    fn counts_hashes_and_events() {
        let reporter = StatsReporter::new(Duration::from_secs(60));
        let tx = reporter.hash_sender();
        tx.send(100).unwrap();
        tx.send(28).unwrap();
        drop(tx);

        reporter.record(&MinerEvent::Diagnostic(Diagnostic {
            message: INVALID_RESULT_MESSAGE.into(),
            device: "sim:0".into(),
            pool_id: 0,
        }));
        reporter.record(&MinerEvent::Diagnostic(Diagnostic {
            message: "Cannot open device".into(),
            device: "sim:0".into(),
            pool_id: 0,
        }));
        reporter.record(&MinerEvent::Diagnostic(Diagnostic {
            message: crate::miner::worker::VERIFY_FAILED_MESSAGE.into(),
            device: "sim:0".into(),
            pool_id: 0,
        }));

        let deadline = Instant::now() + Duration::from_secs(2);
        while reporter.get_stats().hashes_total < 128 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        let stats = reporter.get_stats();
        assert_eq!(stats.hashes_total, 128);
        assert_eq!(stats.results_invalid, 1);
        assert_eq!(stats.results_verified, 0);
    }
}
