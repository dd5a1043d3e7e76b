// src/miner/scheduler.rs
//! Process-wide job state shared by every worker
//!
//! One [`GlobalJobState`] is built at startup and handed to each worker. A
//! publisher swaps in a new [`WorkItem`] and bumps the job version; workers
//! compare their last-seen version against [`GlobalJobState::current_version`]
//! and resync when it moves. Software workers carve the nonce space into
//! disjoint ranges through [`GlobalJobState::allocate_nonce_range`].

use crate::miner::algorithm::{MAX_BLOB_SIZE, NONCE_OFFSET, blob_nonce};
use crate::types::AlgorithmType;
use crate::utils::error::MinerError;
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A unit of work as seen by the workers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    /// Header blob, nonce at [`NONCE_OFFSET`]
    pub blob: Vec<u8>,
    /// Acceptance threshold for the trailing digest word
    pub target: u64,
    /// Pool-assigned job identifier
    pub job_id: String,
    /// Pool the job came from
    pub pool_id: u32,
    /// Blob major version (first byte of the header)
    pub version: u8,
    /// Hash algorithm the job is mined with
    pub algorithm: AlgorithmType,
    /// Pool owns the top nonce byte
    pub nicehash: bool,
    /// No job available; workers wait
    pub stalled: bool,
}

impl WorkItem {
    /// Builds a job from a header blob
    ///
    /// # Errors
    /// `InputError` if the blob is too short to carry a nonce or longer than
    /// [`MAX_BLOB_SIZE`].
    pub fn new(
        job_id: impl Into<String>,
        blob: Vec<u8>,
        target: u64,
        algorithm: AlgorithmType,
    ) -> Result<Self, MinerError> {
        if blob.len() < NONCE_OFFSET + 4 || blob.len() > MAX_BLOB_SIZE {
            return Err(MinerError::InputError(format!(
                "Blob of {} bytes outside {}..={}",
                blob.len(),
                NONCE_OFFSET + 4,
                MAX_BLOB_SIZE
            )));
        }
        Ok(Self {
            version: blob[0],
            blob,
            target,
            job_id: job_id.into(),
            pool_id: 0,
            algorithm,
            nicehash: false,
            stalled: false,
        })
    }

    /// Placeholder meaning "nothing to do yet"
    pub fn stalled() -> Self {
        Self {
            blob: Vec::new(),
            target: 0,
            job_id: String::new(),
            pool_id: 0,
            version: 0,
            algorithm: AlgorithmType::default(),
            nicehash: false,
            stalled: true,
        }
    }

    /// Sets the originating pool
    pub fn with_pool(mut self, pool_id: u32) -> Self {
        self.pool_id = pool_id;
        self
    }

    /// Enables NiceHash nonce mode
    pub fn with_nicehash(mut self, nicehash: bool) -> Self {
        self.nicehash = nicehash;
        self
    }

    /// Maps a worker-local nonce onto the job's nonce space
    ///
    /// In NiceHash mode the pool's top byte is kept and only the low 24 bits
    /// vary.
    pub fn effective_nonce(&self, nonce: u32) -> u32 {
        if !self.nicehash {
            return nonce;
        }
        let fixed = blob_nonce(&self.blob).unwrap_or(0) & 0xFF00_0000;
        fixed | (nonce & 0x00FF_FFFF)
    }
}

/// A work item tagged with the version it was published under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSnapshot {
    /// Job version
    pub version: u64,
    /// The work itself
    pub work: WorkItem,
}

/// A reserved run of nonces `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceRange {
    /// Job version the range was carved from
    pub job_version: u64,
    /// First nonce
    pub start: u32,
    /// One past the last nonce (up to `2^32`)
    pub end: u64,
}

impl NonceRange {
    /// Number of nonces in the range
    pub fn len(&self) -> u64 {
        self.end - u64::from(self.start)
    }

    /// True when the range holds no nonces
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates the nonces in order
    pub fn iter(&self) -> impl Iterator<Item = u32> {
        (u64::from(self.start)..self.end).map(|n| n as u32)
    }

    /// True when `self` and `other` share a nonce
    pub fn overlaps(&self, other: &NonceRange) -> bool {
        u64::from(self.start) < other.end && u64::from(other.start) < self.end
    }
}

/// Shared job state
///
/// The nonce cursor packs the low 32 bits of the job version above the next
/// free nonce, so a reservation can never land in a range reset by a newer
/// publish.
pub struct GlobalJobState {
    current: ArcSwap<JobSnapshot>,
    version: AtomicU64,
    cursor: AtomicU64,
    consumers: AtomicUsize,
    publish_lock: Mutex<()>,
    published: Condvar,
}

impl Default for GlobalJobState {
    fn default() -> Self {
        Self::new()
    }
}

impl GlobalJobState {
    /// Creates a stalled state at version 0
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(JobSnapshot {
                version: 0,
                work: WorkItem::stalled(),
            }),
            version: AtomicU64::new(0),
            cursor: AtomicU64::new(0),
            consumers: AtomicUsize::new(0),
            publish_lock: Mutex::new(()),
            published: Condvar::new(),
        }
    }

    /// Replaces the current work item and bumps the version
    ///
    /// Returns the new version. Once this returns, every later
    /// [`current_version`](Self::current_version) sees it.
    pub fn publish(&self, work: WorkItem) -> u64 {
        let _guard = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let version = self.version.load(Ordering::Acquire) + 1;

        log::debug!(
            "Publishing job {} (pool {}, {}) as version {}",
            work.job_id,
            work.pool_id,
            work.algorithm,
            version
        );
        self.current.store(Arc::new(JobSnapshot { version, work }));
        self.cursor.store(Self::pack(version, 0), Ordering::Release);
        self.version.store(version, Ordering::Release);
        self.published.notify_all();
        version
    }

    /// Latest published version
    pub fn current_version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Current work item with its version
    pub fn snapshot(&self) -> Arc<JobSnapshot> {
        self.current.load_full()
    }

    /// True when `version` is still the latest
    pub fn is_current(&self, version: u64) -> bool {
        self.current_version() == version
    }

    /// Registers a worker as a consumer of published work
    ///
    /// Returns the number of consumers including the new one.
    pub fn consume_work(&self) -> usize {
        self.consumers.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Unregisters a consumer
    pub fn release_work(&self) {
        // Saturate instead of wrapping on an unbalanced release.
        let _ = self
            .consumers
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Number of registered consumers
    pub fn consumers(&self) -> usize {
        self.consumers.load(Ordering::Acquire)
    }

    /// Blocks until the version differs from `last` or `timeout` passes
    ///
    /// Returns the version observed on wake-up.
    pub fn wait_for_new_version(&self, last: u64, timeout: Duration) -> u64 {
        let deadline = Instant::now() + timeout;
        let mut guard = self.publish_lock.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let version = self.current_version();
            let remaining = deadline.saturating_duration_since(Instant::now());
            if version != last || remaining.is_zero() {
                return version;
            }
            guard = match self.published.wait_timeout(guard, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }

    /// Reserves `chunk_size` nonces for the current version
    ///
    /// Ranges handed out under one version never overlap until the 32-bit
    /// space is exhausted; the cursor then restarts at zero. A caller must
    /// drop the range once [`is_current`](Self::is_current) turns false.
    pub fn allocate_nonce_range(&self, chunk_size: u32) -> NonceRange {
        let chunk = u64::from(chunk_size.max(1));
        loop {
            let version = self.current_version();
            let cursor = self.cursor.load(Ordering::Acquire);
            if (cursor >> 32) as u32 != version as u32 {
                // A publish is between resetting the cursor and bumping the version.
                std::hint::spin_loop();
                continue;
            }

            let start = cursor as u32;
            let end = (u64::from(start) + chunk).min(1 << 32);
            let next = if end == 1 << 32 { 0 } else { end as u32 };
            if self
                .cursor
                .compare_exchange_weak(
                    cursor,
                    Self::pack(version, next),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                if next == 0 {
                    log::debug!("Nonce space of version {} exhausted, wrapping", version);
                }
                return NonceRange {
                    job_version: version,
                    start,
                    end,
                };
            }
        }
    }

    fn pack(version: u64, nonce: u32) -> u64 {
        (u64::from(version as u32) << 32) | u64::from(nonce)
    }
}
