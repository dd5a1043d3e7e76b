// src/main.rs
use clap::Parser;
use crossbeam_channel::RecvTimeoutError;
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use xmr_fpga_miner::device::self_test::{default_script, load_script, run_self_test};
use xmr_fpga_miner::device::{DeviceSession, SerialSettings};
use xmr_fpga_miner::miner::algorithm::{NONCE_OFFSET, set_blob_nonce};
use xmr_fpga_miner::miner::{
    Backend, ChannelSink, DeviceBackend, GlobalJobState, HashEngine, MinerEvent, SoftwareBackend, Worker,
    WorkerContext,
};
use xmr_fpga_miner::utils::logging::init_bench_logging;
use xmr_fpga_miner::*;

/// Main entry point for the FPGA miner
///
/// # Returns
/// - `Ok(())` on successful execution
/// - `Err(MinerError)` if any operation fails; a failed device open or
///   self-test ends up here and terminates the process
fn main() -> Result<(), MinerError> {
    let cli = cli::Commands::parse();

    match cli.action {
        cli::Action::Start(opts) => start_mining(opts),
        cli::Action::Benchmark(opts) => run_benchmark(opts),
        cli::Action::Config(opts) => generate_config(opts),
        cli::Action::SelfTest(opts) => run_device_self_test(opts),
    }
}

/// Starts mining with the given configuration options
///
/// # Operations
/// 1. Loads and validates configuration
/// 2. Checks the hash engines against known vectors
/// 3. Starts one worker per device (each opened and self-tested on its own
///    thread) and the software workers
/// 4. Publishes the static job, if any
/// 5. Drains results and diagnostics until every worker has stopped
fn start_mining(opts: cli::StartOptions) -> Result<(), MinerError> {
    utils::init_logging();

    let mut config = config::load(&opts.config)?;
    if let Some(threads) = opts.software_threads {
        config.software_threads = threads;
    }
    if let Some(algo) = opts.algorithm {
        config.algorithm = algo;
    }
    config.validate()?;

    let mut algorithms = vec![config.algorithm];
    if let Some(algo) = config.job.as_ref().and_then(|j| j.algorithm) {
        algorithms.push(algo);
    }
    let engine = HashEngine::for_algorithms(&algorithms);
    engine.self_test()?;

    let jobs = Arc::new(GlobalJobState::new());
    let quit = Arc::new(AtomicBool::new(false));
    let (sink, events) = ChannelSink::new();
    let reporter = StatsReporter::new(Duration::from_secs(60));

    let ctx = WorkerContext {
        jobs: jobs.clone(),
        engine,
        sink: Arc::new(sink),
        quit: quit.clone(),
        hashes: Some(reporter.hash_sender()),
        nonce_chunk: config.nonce_chunk,
    };

    let mut workers = Vec::new();
    for (id, device) in config.devices.iter().enumerate() {
        let setup = match device.setup() {
            Ok(setup) => setup,
            Err(e) => {
                shutdown(&quit, workers);
                return Err(e);
            }
        };
        log::info!(
            "Starting device {} ({} channel(s), {} baud)",
            device.address,
            device.threads,
            device.baud_rate
        );
        let spawned = Worker::spawn(id, ctx.clone(), device.affinity, move || {
            DeviceBackend::open(&setup).map(Backend::Device)
        });
        match spawned {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                log::error!("Device {} failed to start: {}", device.address, e);
                shutdown(&quit, workers);
                return Err(e);
            }
        }
    }

    let first_software = workers.len();
    for id in first_software..first_software + config.software_threads {
        match Worker::spawn(id, ctx.clone(), None, || Ok(Backend::Software(SoftwareBackend::new()))) {
            Ok(worker) => workers.push(worker),
            Err(e) => {
                shutdown(&quit, workers);
                return Err(e);
            }
        }
    }
    drop(ctx);

    match &config.job {
        Some(job) => {
            let version = jobs.publish(job.to_work_item(config.algorithm)?);
            log::info!("Published static job {} as version {}", job.job_id, version);
        }
        None => log::warn!("No job configured; workers stay idle"),
    }

    let stats = reporter.start_reporting(quit.clone());

    loop {
        match events.recv_timeout(Duration::from_millis(500)) {
            Ok(event) => {
                reporter.record(&event);
                match event {
                    MinerEvent::Result(r) => log::info!(
                        "Result: job {} nonce {:08x} digest {} (worker {}, {}, pool {})",
                        r.job_id,
                        r.nonce,
                        hex::encode(r.digest),
                        r.worker_id,
                        r.algorithm,
                        r.pool_id
                    ),
                    MinerEvent::Diagnostic(d) => {
                        log::warn!("Diagnostic from {} (pool {}): {}", d.device, d.pool_id, d.message)
                    }
                }
            }
            Err(RecvTimeoutError::Timeout) if workers.iter().all(Worker::is_finished) => break,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    shutdown(&quit, workers);
    let _ = stats.join();
    Err(MinerError::ChannelError("All workers stopped".into()))
}

/// Sets the quit flag and waits for every worker
fn shutdown(quit: &AtomicBool, workers: Vec<Worker>) {
    quit.store(true, Ordering::Relaxed);
    for worker in workers {
        let id = worker.id();
        if let Err(e) = worker.join() {
            log::error!("Worker {}: {}", id, e);
        }
    }
}

/// Runs software hash engine benchmarks
///
/// # Operations
/// 1. Initializes benchmark-specific logging
/// 2. Builds and self-tests the engine
/// 3. Hashes a fixed blob on a rayon pool for the requested duration
/// 4. Reports the hashrate
fn run_benchmark(opts: cli::BenchmarkOptions) -> Result<(), MinerError> {
    init_bench_logging();

    let engine = HashEngine::for_algorithms(&[opts.algorithm]);
    engine.self_test()?;
    let reporter = StatsReporter::new(Duration::from_secs(5));
    let hash_sender = reporter.hash_sender();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(opts.threads)
        .build()
        .map_err(|e| MinerError::ConfigError(format!("Cannot build thread pool: {}", e)))?;

    log::info!(
        "Starting {} benchmark for {} seconds on {} threads",
        opts.algorithm,
        opts.duration,
        opts.threads
    );

    let deadline = Duration::from_secs(opts.duration);
    let start_time = Instant::now();
    pool.install(|| {
        (0..opts.threads).into_par_iter().try_for_each(|thread| {
            let mut blob = vec![0u8; NONCE_OFFSET + 37];
            let mut nonce = (thread as u32) << 24;
            let mut last_log = Instant::now();
            let mut hashes = 0u64;

            while start_time.elapsed() < deadline {
                set_blob_nonce(&mut blob, nonce)?;
                engine.digest(opts.algorithm, &blob)?;
                nonce = nonce.wrapping_add(1);
                hashes += 1;

                if last_log.elapsed().as_secs() >= 1 {
                    log::debug!(
                        "Thread {}: {:.1} H/s",
                        thread,
                        hashes as f64 / last_log.elapsed().as_secs_f64()
                    );
                    let _ = hash_sender.send(hashes);
                    hashes = 0;
                    last_log = Instant::now();
                }
            }
            let _ = hash_sender.send(hashes);
            Ok::<(), MinerError>(())
        })
    })?;
    drop(hash_sender);

    // The listener drains asynchronously; give it a moment to catch up.
    std::thread::sleep(Duration::from_millis(50));
    let stats = reporter.get_stats();
    let elapsed = start_time.elapsed().as_secs_f64().max(f64::EPSILON);
    log::info!("Benchmark results:");
    log::info!("Total hashes: {}", stats.hashes_total);
    log::info!("Average hashrate: {:.2} H/s", stats.hashes_total as f64 / elapsed);
    log::logger().flush();

    Ok(())
}

/// Writes a configuration template
fn generate_config(opts: cli::ConfigOptions) -> Result<(), MinerError> {
    let config = config::generate_template(&opts.devices);
    std::fs::write(&opts.output, config)?;
    println!("Configuration template written to {}", opts.output.display());
    Ok(())
}

/// Opens one device, runs its scripted exchanges and closes it
fn run_device_self_test(opts: cli::SelfTestOptions) -> Result<(), MinerError> {
    utils::init_logging();

    let script = match &opts.script {
        Some(path) => load_script(path)?,
        None => default_script(),
    };
    let settings = SerialSettings {
        baud_rate: opts.baud_rate,
        ..SerialSettings::default()
    };
    let timeout = Duration::from_millis(opts.timeout_ms);

    let mut session = DeviceSession::open(&opts.device, &settings, timeout)?;
    let outcome = run_self_test(&mut session, &script);
    session.close();
    outcome?;

    log::info!("Device {} passed {} exchanges", opts.device, script.len());
    Ok(())
}
