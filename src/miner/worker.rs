// src/miner/worker.rs
//! Worker threads
//!
//! One worker per device and one per software lane. Every worker follows the
//! same loop: wait while stalled, resync on a new job version, search, and
//! publish only candidates the host has re-hashed itself against a version
//! that is still current.

use crate::device::self_test::{ScriptedExchange, run_self_test};
use crate::device::session::DeviceSession;
use crate::device::transport::{SerialSettings, Transport};
use crate::miner::algorithm::{HashEngine, meets_target, set_blob_nonce};
use crate::miner::events::{EventSink, JobResult};
use crate::miner::scheduler::{GlobalJobState, JobSnapshot};
use crate::types::AlgorithmType;
use crate::utils::affinity::set_thread_affinity;
use crate::utils::error::MinerError;
use crossbeam_channel::{Sender, bounded};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// How far the device nonce counter has moved past the candidate it reports
pub const DEVICE_NONCE_ADVANCE: u32 = 1;

/// Diagnostic published for a device candidate that fails re-verification
pub const INVALID_RESULT_MESSAGE: &str = "FPGA invalid result";

/// Diagnostic published when the host engine cannot re-hash a device candidate
pub const VERIFY_FAILED_MESSAGE: &str = "Host verification failed";

/// Longest a stalled worker sleeps before rechecking the quit flag
const STALL_WAIT: Duration = Duration::from_millis(100);

/// Software workers recheck version and quit flag every this many hashes
const VERSION_CHECK_INTERVAL: usize = 64;

/// Shared handles every worker gets
#[derive(Clone)]
pub struct WorkerContext {
    /// Global job state
    pub jobs: Arc<GlobalJobState>,
    /// Digest engines used for software search and verification
    pub engine: HashEngine,
    /// Where results and diagnostics go
    pub sink: Arc<dyn EventSink>,
    /// Set by the owner to stop every worker
    pub quit: Arc<AtomicBool>,
    /// Hash count reports for the stats reporter
    pub hashes: Option<Sender<u64>>,
    /// Nonces reserved per software allocation
    pub nonce_chunk: u32,
}

impl WorkerContext {
    fn should_quit(&self) -> bool {
        self.quit.load(Ordering::Relaxed)
    }

    fn report_hashes(&self, count: u64) {
        if let Some(tx) = &self.hashes {
            // The reporter may already be gone during shutdown.
            let _ = tx.send(count);
        }
    }
}

/// Everything needed to bring up one device
#[derive(Debug, Clone)]
pub struct DeviceSetup {
    /// Transport address
    pub address: String,
    /// Serial line settings
    pub settings: SerialSettings,
    /// Reply window for request/response exchanges
    pub timeout: Duration,
    /// How long one result poll may block
    pub poll_window: Duration,
    /// Scripted exchanges run before mining
    pub script: Vec<ScriptedExchange>,
}

/// Device-backed search
pub struct DeviceBackend {
    session: DeviceSession<Box<dyn Transport>>,
    poll_window: Duration,
    blob: Vec<u8>,
}

impl DeviceBackend {
    /// Wraps an open session
    pub fn new(session: DeviceSession<Box<dyn Transport>>, poll_window: Duration) -> Self {
        Self {
            session,
            poll_window,
            blob: Vec::new(),
        }
    }

    /// Opens the device and runs its scripted self-test
    ///
    /// # Errors
    /// `DeviceOpen` or `SelfTest`; both are fatal for this device.
    pub fn open(setup: &DeviceSetup) -> Result<Self, MinerError> {
        let mut session = DeviceSession::open(&setup.address, &setup.settings, setup.timeout)?;
        if !setup.script.is_empty() {
            run_self_test(&mut session, &setup.script)?;
        }
        Ok(Self::new(session, setup.poll_window))
    }

    fn load(&mut self, job: &JobSnapshot) -> Result<(), MinerError> {
        self.session.load_job(&job.work.blob, job.work.target)?;
        self.blob = job.work.blob.clone();
        Ok(())
    }

    fn search(&mut self, worker_id: usize, job: &JobSnapshot, ctx: &WorkerContext) -> Result<(), MinerError> {
        let Some((reported, device_digest)) = self.session.poll_hash_result(self.poll_window)? else {
            return Ok(());
        };
        let nonce = reported.wrapping_sub(DEVICE_NONCE_ADVANCE);
        if !ctx.jobs.is_current(job.version) {
            log::debug!(
                "Device {}: dropping nonce {:08x} from superseded job {}",
                self.session.address(),
                nonce,
                job.work.job_id
            );
            return Ok(());
        }

        set_blob_nonce(&mut self.blob, nonce)?;
        let verified = match ctx.engine.digest(job.work.algorithm, &self.blob) {
            Ok(digest) if meets_target(&digest, job.work.target) => Some(digest),
            Ok(_) => None,
            Err(e) => {
                log::error!("Device {}: cannot verify nonce {:08x}: {}", self.session.address(), nonce, e);
                ctx.sink
                    .publish_diagnostic(VERIFY_FAILED_MESSAGE, self.session.address(), job.work.pool_id);
                return Ok(());
            }
        };

        match verified {
            Some(digest) if ctx.jobs.is_current(job.version) => {
                log::info!(
                    "Device {}: nonce {:08x} verified for job {}",
                    self.session.address(),
                    nonce,
                    job.work.job_id
                );
                ctx.sink.publish(JobResult {
                    job_id: job.work.job_id.clone(),
                    nonce,
                    digest,
                    worker_id,
                    algorithm: job.work.algorithm,
                    pool_id: job.work.pool_id,
                });
            }
            Some(_) => log::debug!("Device {}: job changed during verification", self.session.address()),
            None => {
                log::warn!(
                    "Device {}: {} (nonce {:08x}, device digest {})",
                    self.session.address(),
                    INVALID_RESULT_MESSAGE,
                    nonce,
                    hex::encode(device_digest)
                );
                ctx.sink
                    .publish_diagnostic(INVALID_RESULT_MESSAGE, self.session.address(), job.work.pool_id);
            }
        }
        Ok(())
    }
}

/// Pure software search over reserved nonce ranges
#[derive(Debug, Default)]
pub struct SoftwareBackend {
    blob: Vec<u8>,
}

impl SoftwareBackend {
    /// Creates an idle backend
    pub fn new() -> Self {
        Self::default()
    }

    fn search(&mut self, worker_id: usize, job: &JobSnapshot, ctx: &WorkerContext) -> Result<(), MinerError> {
        let range = ctx.jobs.allocate_nonce_range(ctx.nonce_chunk);
        if range.job_version != job.version {
            return Ok(());
        }

        let mut hashed = 0u64;
        for (i, local) in range.iter().enumerate() {
            if i % VERSION_CHECK_INTERVAL == 0 && (ctx.should_quit() || !ctx.jobs.is_current(job.version)) {
                break;
            }
            let nonce = job.work.effective_nonce(local);
            set_blob_nonce(&mut self.blob, nonce)?;
            let digest = ctx.engine.digest(job.work.algorithm, &self.blob)?;
            hashed += 1;

            if meets_target(&digest, job.work.target) && ctx.jobs.is_current(job.version) {
                log::info!("Worker {}: found nonce {:08x} for job {}", worker_id, nonce, job.work.job_id);
                ctx.sink.publish(JobResult {
                    job_id: job.work.job_id.clone(),
                    nonce,
                    digest,
                    worker_id,
                    algorithm: job.work.algorithm,
                    pool_id: job.work.pool_id,
                });
            }
        }
        ctx.report_hashes(hashed);
        Ok(())
    }
}

/// The two kinds of worker, chosen from configuration at startup
pub enum Backend {
    /// FPGA over a byte transport
    Device(DeviceBackend),
    /// CPU hashing
    Software(SoftwareBackend),
}

impl Backend {
    /// Human readable name for logs
    pub fn label(&self) -> String {
        match self {
            Backend::Device(d) => format!("device {}", d.session.address()),
            Backend::Software(_) => "software".to_string(),
        }
    }

    fn load(&mut self, job: &JobSnapshot) -> Result<(), MinerError> {
        match self {
            Backend::Device(d) => d.load(job),
            Backend::Software(s) => {
                s.blob = job.work.blob.clone();
                Ok(())
            }
        }
    }

    fn search(&mut self, worker_id: usize, job: &JobSnapshot, ctx: &WorkerContext) -> Result<(), MinerError> {
        match self {
            Backend::Device(d) => d.search(worker_id, job, ctx),
            Backend::Software(s) => s.search(worker_id, job, ctx),
        }
    }

    fn address(&self) -> &str {
        match self {
            Backend::Device(d) => d.session.address(),
            Backend::Software(_) => "software",
        }
    }

    fn shutdown(&mut self) {
        if let Backend::Device(d) = self {
            d.session.close();
        }
    }
}

/// Last job parameters a worker mined with, for switch logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct JobShape {
    algorithm: AlgorithmType,
    blob_version: u8,
    pool_id: u32,
}

/// Handle to a running worker thread
pub struct Worker {
    id: usize,
    label: String,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    /// Starts a worker thread
    ///
    /// `open` runs on the new thread, so anything it allocates is placed
    /// there. The call blocks until `open` finished and the thread is about
    /// to enter its loop; only then is the thread pinned to `affinity`.
    ///
    /// # Errors
    /// Whatever `open` returned, or `IoError` if the thread cannot be spawned.
    pub fn spawn<F>(id: usize, ctx: WorkerContext, affinity: Option<usize>, open: F) -> Result<Self, MinerError>
    where
        F: FnOnce() -> Result<Backend, MinerError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = bounded::<Result<String, MinerError>>(1);

        let handle = thread::Builder::new()
            .name(format!("worker-{}", id))
            .spawn(move || {
                let mut backend = match open() {
                    Ok(backend) => backend,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                ctx.jobs.consume_work();
                if ready_tx.send(Ok(backend.label())).is_err() {
                    ctx.jobs.release_work();
                    backend.shutdown();
                    return;
                }
                drop(ready_tx);
                run(id, &mut backend, &ctx);
                ctx.jobs.release_work();
                backend.shutdown();
            })?;

        let label = match ready_rx.recv() {
            Ok(Ok(label)) => label,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(MinerError::ChannelError(format!(
                    "Worker {} exited before signalling readiness",
                    id
                )));
            }
        };

        if let Some(cpu) = affinity {
            if set_thread_affinity(&handle, cpu) {
                log::info!("Worker {} ({}) pinned to CPU {}", id, label, cpu);
            } else {
                log::warn!("Worker {} ({}): could not pin to CPU {}", id, label, cpu);
            }
        }
        log::info!("Worker {} ({}) started", id, label);

        Ok(Self {
            id,
            label,
            handle: Some(handle),
        })
    }

    /// Worker id
    pub fn id(&self) -> usize {
        self.id
    }

    /// Backend description
    pub fn label(&self) -> &str {
        &self.label
    }

    /// True once the thread has left its loop
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Waits for the thread to exit
    pub fn join(mut self) -> Result<(), MinerError> {
        match self.handle.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| MinerError::ChannelError(format!("Worker {} panicked", self.id))),
            None => Ok(()),
        }
    }
}

/// Main loop; returns when the quit flag is set or the backend hits a fatal error
fn run(id: usize, backend: &mut Backend, ctx: &WorkerContext) {
    let mut last_version = 0u64;
    let mut active: Option<Arc<JobSnapshot>> = None;
    let mut shape: Option<JobShape> = None;

    while !ctx.should_quit() {
        if ctx.jobs.current_version() != last_version {
            let job = ctx.jobs.snapshot();
            last_version = job.version;
            active = None;

            if job.work.stalled {
                log::debug!("Worker {}: no job available", id);
                continue;
            }
            if !ctx.engine.supports(job.work.algorithm) {
                log::error!("Worker {}: no engine for {}, skipping job {}", id, job.work.algorithm, job.work.job_id);
                continue;
            }

            let next = JobShape {
                algorithm: job.work.algorithm,
                blob_version: job.work.version,
                pool_id: job.work.pool_id,
            };
            if shape != Some(next) {
                log::info!(
                    "Worker {}: switching to {} (blob v{}, pool {})",
                    id,
                    next.algorithm,
                    next.blob_version,
                    next.pool_id
                );
                shape = Some(next);
            }

            match backend.load(&job) {
                Ok(()) => {
                    log::debug!("Worker {}: loaded job {} (version {})", id, job.work.job_id, job.version);
                    active = Some(job);
                }
                Err(e) if e.is_fatal() => {
                    fail(id, backend, ctx, &job, &e);
                    break;
                }
                Err(e) => log::error!("Worker {}: cannot load job {}: {}", id, job.work.job_id, e),
            }
            continue;
        }

        let Some(job) = active.as_ref() else {
            ctx.jobs.wait_for_new_version(last_version, STALL_WAIT);
            continue;
        };

        if let Err(e) = backend.search(id, job, ctx) {
            if e.is_fatal() {
                fail(id, backend, ctx, job, &e);
                break;
            }
            log::error!("Worker {}: {}; dropping job {}", id, e, job.work.job_id);
            active = None;
        }
    }

    log::info!("Worker {} stopped", id);
}

fn fail(id: usize, backend: &Backend, ctx: &WorkerContext, job: &JobSnapshot, error: &MinerError) {
    log::error!("Worker {} ({}) stopping: {}", id, backend.label(), error);
    ctx.sink
        .publish_diagnostic(&error.to_string(), backend.address(), job.work.pool_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::miner::events::{ChannelSink, MinerEvent};
    use crate::miner::scheduler::WorkItem;
    use crossbeam_channel::Receiver;

    fn context(algorithms: &[AlgorithmType]) -> (WorkerContext, Receiver<MinerEvent>) {
        let (sink, rx) = ChannelSink::new();
        let ctx = WorkerContext {
            jobs: Arc::new(GlobalJobState::new()),
            engine: HashEngine::for_algorithms(algorithms),
            sink: Arc::new(sink),
            quit: Arc::new(AtomicBool::new(false)),
            hashes: None,
            nonce_chunk: 256,
        };
        (ctx, rx)
    }

    #[test]
    fn failed_open_is_reported_to_the_constructor() {
        let (ctx, _rx) = context(&[AlgorithmType::Keccak]);
        let err = Worker::spawn(0, ctx, None, || {
            Err(MinerError::DeviceOpen {
                address: "/dev/null0".into(),
                reason: "no such device".into(),
            })
        })
        .err()
        .unwrap();
        assert!(matches!(err, MinerError::DeviceOpen { .. }));
    }

    #[test]
    fn software_worker_stops_on_quit() {
        let (ctx, _rx) = context(&[AlgorithmType::Keccak]);
        let quit = ctx.quit.clone();
        let jobs = ctx.jobs.clone();
        let worker = Worker::spawn(3, ctx, None, || Ok(Backend::Software(SoftwareBackend::new()))).unwrap();
        assert_eq!(worker.label(), "software");

        jobs.publish(WorkItem::new("j", vec![0u8; 76], 0, AlgorithmType::Keccak).unwrap());
        thread::sleep(Duration::from_millis(20));
        quit.store(true, Ordering::Relaxed);
        worker.join().unwrap();
        assert_eq!(jobs.consumers(), 0);
    }

    #[test]
    fn software_worker_publishes_only_target_meeting_digests() {
        let (ctx, rx) = context(&[AlgorithmType::Keccak]);
        let target = u64::MAX / 16;
        let job = Arc::new(JobSnapshot {
            version: ctx.jobs.publish(WorkItem::new("j", vec![1u8; 76], target, AlgorithmType::Keccak).unwrap()),
            work: ctx.jobs.snapshot().work.clone(),
        });

        let mut backend = SoftwareBackend::new();
        backend.blob = job.work.blob.clone();
        backend.search(5, &job, &ctx).unwrap();

        let results: Vec<_> = rx.try_iter().collect();
        assert!(!results.is_empty());
        for event in results {
            let MinerEvent::Result(r) = event else {
                panic!("unexpected {:?}", event);
            };
            let mut blob = job.work.blob.clone();
            set_blob_nonce(&mut blob, r.nonce).unwrap();
            let digest = ctx.engine.digest(AlgorithmType::Keccak, &blob).unwrap();
            assert_eq!(digest, r.digest);
            assert!(meets_target(&digest, target));
            assert_eq!(r.worker_id, 5);
        }
    }

    #[test]
    fn engine_failure_is_not_blamed_on_the_device() {
        use crate::device::session::DeviceSession;
        use crate::device::transport::SimulatedDevice;

        // No Keccak engine registered, so re-hashing the candidate fails.
        let (ctx, rx) = context(&[]);
        let dev = SimulatedDevice::new();
        dev.queue_result(500, [0u8; 32]);
        let window = Duration::from_millis(30);
        let transport: Box<dyn Transport> = Box::new(dev);
        let session = DeviceSession::with_transport("sim:verify", transport, window).unwrap();
        let mut backend = DeviceBackend::new(session, window);

        let work = WorkItem::new("j", vec![3u8; 76], u64::MAX, AlgorithmType::Keccak).unwrap();
        let job = JobSnapshot {
            version: ctx.jobs.publish(work.clone()),
            work,
        };
        backend.load(&job).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while rx.is_empty() && std::time::Instant::now() < deadline {
            backend.search(0, &job, &ctx).unwrap();
        }
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events.len(), 1);
        let MinerEvent::Diagnostic(diag) = &events[0] else {
            panic!("unexpected {:?}", events[0]);
        };
        assert_eq!(diag.message, VERIFY_FAILED_MESSAGE);
        assert_ne!(diag.message, INVALID_RESULT_MESSAGE);
        assert_eq!(diag.device, "sim:verify");
    }

    #[test]
    fn stale_range_is_not_searched() {
        let (ctx, rx) = context(&[AlgorithmType::Keccak]);
        let work = WorkItem::new("old", vec![0u8; 76], u64::MAX, AlgorithmType::Keccak).unwrap();
        let old = JobSnapshot {
            version: ctx.jobs.publish(work.clone()),
            work,
        };
        ctx.jobs.publish(WorkItem::new("new", vec![0u8; 76], u64::MAX, AlgorithmType::Keccak).unwrap());

        let mut backend = SoftwareBackend::new();
        backend.blob = old.work.blob.clone();
        backend.search(0, &old, &ctx).unwrap();
        assert!(rx.try_recv().is_err());
    }
}
