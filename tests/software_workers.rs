// tests/software_workers.rs
//! Software lanes sharing one job state

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use xmr_fpga_miner::miner::algorithm::{meets_target, set_blob_nonce};
use xmr_fpga_miner::miner::{Backend, SoftwareBackend, WorkerContext};
use xmr_fpga_miner::{AlgorithmType, ChannelSink, GlobalJobState, HashEngine, MinerEvent, WorkItem, Worker};

fn blob(seed: u8) -> Vec<u8> {
    (0..76).map(|i| seed.wrapping_mul(31).wrapping_add(i)).collect()
}

#[test]
fn lanes_find_distinct_valid_nonces_and_follow_job_changes() {
    let (sink, rx) = ChannelSink::new();
    let (hash_tx, hash_rx) = crossbeam_channel::unbounded();
    let ctx = WorkerContext {
        jobs: Arc::new(GlobalJobState::new()),
        engine: HashEngine::for_algorithms(&[AlgorithmType::Keccak]),
        sink: Arc::new(sink),
        quit: Arc::new(AtomicBool::new(false)),
        hashes: Some(hash_tx),
        nonce_chunk: 128,
    };

    let workers: Vec<Worker> = (0..3)
        .map(|id| {
            Worker::spawn(id, ctx.clone(), None, || Ok(Backend::Software(SoftwareBackend::new()))).unwrap()
        })
        .collect();
    assert_eq!(ctx.jobs.consumers(), 3);

    let target = u64::MAX / 32;
    let first = WorkItem::new("first", blob(1), target, AlgorithmType::Keccak).unwrap();
    ctx.jobs.publish(first.clone());

    let mut seen = HashSet::new();
    let deadline = Instant::now() + Duration::from_secs(10);
    while seen.len() < 20 && Instant::now() < deadline {
        if let Ok(MinerEvent::Result(r)) = rx.recv_timeout(Duration::from_millis(100)) {
            assert_eq!(r.job_id, "first");
            let mut b = first.blob.clone();
            set_blob_nonce(&mut b, r.nonce).unwrap();
            let digest = ctx.engine.digest(AlgorithmType::Keccak, &b).unwrap();
            assert_eq!(digest, r.digest);
            assert!(meets_target(&digest, target));
            assert!(seen.insert(r.nonce), "nonce {} searched twice", r.nonce);
        }
    }
    assert_eq!(seen.len(), 20);

    // Nothing meets a zero target, so after the switch no result may carry
    // the new job id, and any straggler must belong to the old job.
    let version = ctx.jobs.publish(WorkItem::new("second", blob(2), 0, AlgorithmType::Keccak).unwrap());
    std::thread::sleep(Duration::from_millis(200));
    while let Ok(event) = rx.try_recv() {
        if let MinerEvent::Result(r) = event {
            assert_eq!(r.job_id, "first");
        }
    }
    std::thread::sleep(Duration::from_millis(200));
    assert!(rx.try_recv().is_err());
    assert!(ctx.jobs.is_current(version));

    ctx.quit.store(true, Ordering::Relaxed);
    for worker in workers {
        worker.join().unwrap();
    }
    assert_eq!(ctx.jobs.consumers(), 0);
    assert!(hash_rx.try_iter().sum::<u64>() > 0);
}

#[test]
fn nicehash_results_keep_the_pool_byte() {
    let (sink, rx) = ChannelSink::new();
    let ctx = WorkerContext {
        jobs: Arc::new(GlobalJobState::new()),
        engine: HashEngine::for_algorithms(&[AlgorithmType::Keccak]),
        sink: Arc::new(sink),
        quit: Arc::new(AtomicBool::new(false)),
        hashes: None,
        nonce_chunk: 256,
    };
    let worker = Worker::spawn(0, ctx.clone(), None, || Ok(Backend::Software(SoftwareBackend::new()))).unwrap();

    let mut b = blob(9);
    set_blob_nonce(&mut b, 0x5A00_0000).unwrap();
    let work = WorkItem::new("nh", b, u64::MAX / 8, AlgorithmType::Keccak)
        .unwrap()
        .with_nicehash(true);
    ctx.jobs.publish(work);

    for _ in 0..5 {
        let Ok(MinerEvent::Result(r)) = rx.recv_timeout(Duration::from_secs(5)) else {
            panic!("no result");
        };
        assert_eq!(r.nonce >> 24, 0x5A);
    }

    ctx.quit.store(true, Ordering::Relaxed);
    worker.join().unwrap();
}
