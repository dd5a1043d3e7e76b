// tests/device_worker.rs
//! Device workers driven against the in-memory simulated board

use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use xmr_fpga_miner::device::protocol::msg_type;
use xmr_fpga_miner::device::transport::Transport;
use xmr_fpga_miner::miner::algorithm::{meets_target, set_blob_nonce};
use xmr_fpga_miner::miner::worker::{DEVICE_NONCE_ADVANCE, INVALID_RESULT_MESSAGE};
use xmr_fpga_miner::miner::{Backend, DeviceBackend, DeviceSetup, WorkerContext};
use xmr_fpga_miner::{
    AlgorithmType, ChannelSink, DeviceSession, GlobalJobState, HashEngine, MinerError, MinerEvent,
    SimulatedDevice, WorkItem, Worker,
};

const WINDOW: Duration = Duration::from_millis(30);

fn context() -> (WorkerContext, Receiver<MinerEvent>) {
    let (sink, rx) = ChannelSink::new();
    let ctx = WorkerContext {
        jobs: Arc::new(GlobalJobState::new()),
        engine: HashEngine::for_algorithms(&[AlgorithmType::Keccak]),
        sink: Arc::new(sink),
        quit: Arc::new(AtomicBool::new(false)),
        hashes: None,
        nonce_chunk: 1024,
    };
    (ctx, rx)
}

fn spawn_on(dev: &SimulatedDevice, ctx: &WorkerContext) -> Worker {
    let dev = dev.clone();
    Worker::spawn(0, ctx.clone(), None, move || {
        let transport: Box<dyn Transport> = Box::new(dev);
        let session = DeviceSession::with_transport("sim:board", transport, WINDOW)?;
        Ok(Backend::Device(DeviceBackend::new(session, WINDOW)))
    })
    .unwrap()
}

fn job(id: &str, target: u64) -> WorkItem {
    let mut blob = vec![0u8; 76];
    blob[0] = 7;
    blob[1..].iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
    WorkItem::new(id, blob, target, AlgorithmType::Keccak).unwrap().with_pool(2)
}

fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn stop(ctx: &WorkerContext, worker: Worker) {
    ctx.quit.store(true, Ordering::Relaxed);
    worker.join().unwrap();
}

#[test]
fn candidate_failing_target_is_never_published() {
    let (ctx, rx) = context();
    let dev = SimulatedDevice::new();
    dev.queue_result(1000, [0xEE; 32]);
    let worker = spawn_on(&dev, &ctx);

    ctx.jobs.publish(job("hard", 1));

    let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let MinerEvent::Diagnostic(diag) = event else {
        panic!("expected a diagnostic, got {:?}", event);
    };
    assert_eq!(diag.message, INVALID_RESULT_MESSAGE);
    assert_eq!(diag.device, "sim:board");
    assert_eq!(diag.pool_id, 2);

    std::thread::sleep(Duration::from_millis(200));
    assert!(rx.try_recv().is_err(), "exactly one diagnostic and no result");
    stop(&ctx, worker);
}

#[test]
fn verified_candidate_is_published_with_host_digest() {
    let (ctx, rx) = context();
    let dev = SimulatedDevice::new();
    let reported = 0x0102_0304;
    dev.queue_result(reported, [0u8; 32]);
    let worker = spawn_on(&dev, &ctx);

    let work = job("easy", u64::MAX);
    ctx.jobs.publish(work.clone());

    let event = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    let MinerEvent::Result(result) = event else {
        panic!("expected a result, got {:?}", event);
    };
    let nonce = reported - DEVICE_NONCE_ADVANCE;
    assert_eq!(result.nonce, nonce);
    assert_eq!(result.job_id, "easy");
    assert_eq!(result.algorithm, AlgorithmType::Keccak);

    let mut blob = work.blob.clone();
    set_blob_nonce(&mut blob, nonce).unwrap();
    let expected = ctx.engine.digest(AlgorithmType::Keccak, &blob).unwrap();
    assert_eq!(result.digest, expected);
    assert!(meets_target(&expected, u64::MAX));
    stop(&ctx, worker);
}

#[test]
fn every_job_is_loaded_inside_a_reset_bracket() {
    let (ctx, _rx) = context();
    let dev = SimulatedDevice::new();
    let worker = spawn_on(&dev, &ctx);

    ctx.jobs.publish(job("a", 1));
    assert!(wait_until(|| dev.received().iter().any(|f| f.msg_type == msg_type::SET_DATA)));
    ctx.jobs.publish(job("b", 1));
    assert!(wait_until(|| {
        dev.received()
            .iter()
            .filter(|f| f.msg_type == msg_type::SET_DATA)
            .count()
            == 2
    }));
    stop(&ctx, worker);

    let frames = dev.received();
    for (i, frame) in frames.iter().enumerate() {
        if frame.msg_type == msg_type::SET_DATA {
            assert_eq!(frames[i - 1].msg_type, msg_type::RESET);
            assert_eq!(frames[i - 1].payload, vec![0], "core released right before SetData");
        }
    }
    let last = frames.last().unwrap();
    assert_eq!((last.msg_type, last.payload.clone()), (msg_type::RESET, vec![1]));
    assert!(dev.is_held(), "closing the session deactivates the core");
}

#[test]
fn unopenable_device_fails_startup() {
    let (ctx, _rx) = context();
    let setup = DeviceSetup {
        address: "/dev/this-port-does-not-exist".into(),
        settings: Default::default(),
        timeout: WINDOW,
        poll_window: WINDOW,
        script: Vec::new(),
    };
    let err = Worker::spawn(0, ctx, None, move || DeviceBackend::open(&setup).map(Backend::Device))
        .err()
        .unwrap();
    assert!(matches!(err, MinerError::DeviceOpen { .. }));
    assert!(err.is_fatal());
}

#[test]
fn failing_self_test_fails_startup() {
    use xmr_fpga_miner::device::self_test::{Operation, ScriptedExchange};

    let (ctx, _rx) = context();
    let setup = DeviceSetup {
        address: "sim:untested".into(),
        settings: Default::default(),
        timeout: WINDOW,
        poll_window: WINDOW,
        script: vec![ScriptedExchange::expecting(Operation::QueryResetStatus, &[], &[1])],
    };
    let err = Worker::spawn(0, ctx, None, move || DeviceBackend::open(&setup).map(Backend::Device))
        .err()
        .unwrap();
    assert!(matches!(err, MinerError::SelfTest { .. }));
}
