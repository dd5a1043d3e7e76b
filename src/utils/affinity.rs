// src/utils/affinity.rs
//! CPU pinning for worker threads
//!
//! Applied from the constructing thread once the worker signalled readiness,
//! so anything the worker allocated during startup lives on its own node.

use std::thread::JoinHandle;

/// Pins the thread behind `handle` to `cpu_id`
///
/// Returns `false` when the platform refuses or does not support pinning.
/// Callers only warn on failure; an unpinned worker still mines.
#[cfg(target_os = "linux")]
#[allow(unsafe_code)]
pub fn set_thread_affinity<T>(handle: &JoinHandle<T>, cpu_id: usize) -> bool {
    use std::os::unix::thread::JoinHandleExt;

    if cpu_id >= libc::CPU_SETSIZE as usize {
        log::warn!("CPU id {} exceeds CPU_SETSIZE, not pinning", cpu_id);
        return false;
    }

    let thread = handle.as_pthread_t();
    // SAFETY: `set` is a plain bitmask initialised by CPU_ZERO before use and
    // `thread` refers to a live thread owned by `handle`.
    unsafe {
        let mut set: libc::cpu_set_t = std::mem::zeroed();
        libc::CPU_ZERO(&mut set);
        libc::CPU_SET(cpu_id, &mut set);
        libc::pthread_setaffinity_np(thread, std::mem::size_of::<libc::cpu_set_t>(), &set) == 0
    }
}

/// Pins the thread behind `handle` to `cpu_id`
#[cfg(not(target_os = "linux"))]
pub fn set_thread_affinity<T>(_handle: &JoinHandle<T>, cpu_id: usize) -> bool {
    log::warn!("Thread pinning to CPU {} is not supported on this platform", cpu_id);
    false
}
