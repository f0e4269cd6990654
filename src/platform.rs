//! Platform facade: page size, page mapping, monotonic time, OS threads,
//! and a mutex/condvar pair where the condvar carries its associated
//! mutex internally so callers never pair them by hand.
//!
//! Unsafe is confined to this module's page-mapping calls and to the raw
//! `lock_api::RawMutex` plumbing; every unsafe block carries a `SAFETY:`
//! comment, the same discipline the teacher crate this module descends
//! from applies to its own platform-specific unsafe operations.

use std::io;
use std::ptr::NonNull;
use std::sync::Once;
use std::time::Instant;

use lock_api::RawMutex as _;
use parking_lot::{Condvar as PlCondvar, Mutex as PlMutex, RawMutex as PlRawMutex};

use crate::error::{FabricError, Result};

static PROCESS_START_ONCE: Once = Once::new();
static mut PROCESS_START: Option<Instant> = None;

fn process_start() -> Instant {
    // SAFETY: `Once::call_once` guarantees the write happens before any
    // read below observes it, across all threads.
    PROCESS_START_ONCE.call_once(|| unsafe {
        PROCESS_START = Some(Instant::now());
    });
    unsafe { PROCESS_START.expect("process start initialized by call_once above") }
}

/// Host page size in bytes.
pub fn page_size() -> usize {
    // SAFETY: sysconf with _SC_PAGESIZE takes no pointer arguments and
    // never fails on any POSIX host this crate targets.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 {
        4096
    } else {
        size as usize
    }
}

/// Round `size` up to the next multiple of the host page size.
pub fn page_align(size: u64) -> u64 {
    let page = page_size() as u64;
    size.div_ceil(page) * page
}

/// Map `size` bytes of anonymous, private, read-write host memory.
pub fn map(size: usize) -> Result<NonNull<u8>> {
    // SAFETY: mmap with MAP_ANON|MAP_PRIVATE and a null hint address is
    // the documented pattern for anonymous memory; the MAP_FAILED check
    // below happens before the raw pointer is trusted.
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_ANON | libc::MAP_PRIVATE,
            -1,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(FabricError::HostOutOfMemory(
            io::Error::last_os_error().to_string(),
        ));
    }
    // SAFETY: a non-MAP_FAILED return from mmap is always a non-null base
    // address.
    Ok(unsafe { NonNull::new_unchecked(ptr as *mut u8) })
}

/// Unmap a region previously returned by [`map`].
///
/// # Safety (invariant, not memory-safety)
/// Caller must pass the exact `(ptr, size)` pair returned by a prior
/// matching `map` call, and must guarantee no outstanding references into
/// the region remain.
pub fn free(ptr: NonNull<u8>, size: usize) {
    // SAFETY: contract documented above; the caller (arena teardown) is
    // the sole owner of this mapping.
    let rc = unsafe { libc::munmap(ptr.as_ptr() as *mut libc::c_void, size) };
    debug_assert_eq!(rc, 0, "munmap failed: {}", io::Error::last_os_error());
}

/// Milliseconds elapsed since process start, monotonic.
pub fn monotonic_ms() -> u64 {
    process_start().elapsed().as_millis() as u64
}

/// A platform OS thread. Thin wrapper over [`std::thread::JoinHandle`].
pub struct Thread {
    handle: std::thread::JoinHandle<()>,
}

impl Thread {
    /// Spawn `f` on a new OS thread.
    pub fn spawn<F>(f: F) -> Result<Self>
    where
        F: FnOnce() + Send + 'static,
    {
        std::thread::Builder::new()
            .spawn(f)
            .map(|handle| Thread { handle })
            .map_err(|e| FabricError::ThreadResource(e.to_string()))
    }

    /// Join the thread. A panic inside the spawned closure surfaces as
    /// [`FabricError::Deadlock`], mirroring the source's treatment of a
    /// failed join as a deadlock-class error — no other join failure mode
    /// is reachable once a thread has successfully started on this
    /// platform.
    pub fn join(self) -> Result<()> {
        self.handle
            .join()
            .map_err(|_| FabricError::Deadlock("worker thread panicked".to_string()))
    }

    /// Stable integer id for the calling thread.
    pub fn current_id() -> u64 {
        use std::hash::{Hash, Hasher};
        let id = std::thread::current().id();
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        id.hash(&mut hasher);
        hasher.finish()
    }

    /// Sleep the calling thread for `ms` milliseconds. Not interruptible —
    /// interruptible sleep is a [`crate::scheduler::worker::Worker`]
    /// responsibility layered on top of this primitive.
    pub fn static_sleep(ms: u64) {
        std::thread::sleep(std::time::Duration::from_millis(ms));
    }
}

/// A plain mutex with explicit `lock`/`unlock`, not a scope guard. Built
/// directly on [`parking_lot::RawMutex`] (via `lock_api::RawMutex`) rather
/// than the guard-returning `parking_lot::Mutex<T>`, since the scheduler
/// and ordered-queue code pair lock/unlock across non-lexical control flow
/// the way the original's `os::Mutex` does.
pub struct Mutex {
    raw: PlRawMutex,
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutex {
    pub fn new() -> Self {
        Self {
            raw: PlRawMutex::INIT,
        }
    }

    pub fn lock(&self) {
        self.raw.lock();
    }

    /// # Safety (invariant, not memory-safety)
    /// Caller must currently hold the lock via a prior [`Mutex::lock`]
    /// call on this same instance from this same thread. Unlocking a
    /// mutex this thread does not own is an implementation fault.
    pub fn unlock(&self) {
        // SAFETY: contract documented above.
        unsafe { self.raw.unlock() };
    }
}

/// A condition variable that fuses its own internal mutex, so callers
/// never manage mutex/condvar pairing themselves. Each call to `wait`,
/// `wait_for`, `notify_one`, or `notify_all` performs its own internal
/// lock/unlock cycle, matching the original's `ConditionVariable::wait`
/// which locks its `associate` mutex, blocks, then unlocks before
/// returning.
pub struct ConditionVariable {
    associate: PlMutex<()>,
    cv: PlCondvar,
}

impl Default for ConditionVariable {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionVariable {
    pub fn new() -> Self {
        Self {
            associate: PlMutex::new(()),
            cv: PlCondvar::new(),
        }
    }

    /// Block until notified. Re-checking the predicate after return is
    /// the caller's responsibility — spurious wake is always possible.
    pub fn wait(&self) {
        let mut guard = self.associate.lock();
        self.cv.wait(&mut guard);
    }

    /// Block until notified or `ms` milliseconds elapse. Returns `true` if
    /// notified, `false` on timeout. Uses a monotonic deadline internally
    /// (via `parking_lot`'s `wait_for`); does not itself loop on spurious
    /// wake — the caller must re-check its predicate and call again if
    /// needed.
    pub fn wait_for(&self, ms: u64) -> bool {
        let mut guard = self.associate.lock();
        let result = self
            .cv
            .wait_for(&mut guard, std::time::Duration::from_millis(ms));
        !result.timed_out()
    }

    pub fn notify_one(&self) {
        self.cv.notify_one();
    }

    pub fn notify_all(&self) {
        self.cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_reasonable() {
        let size = page_size();
        assert!(size >= 4096);
        assert_eq!(size & (size - 1), 0, "page size must be a power of two");
    }

    #[test]
    fn page_align_rounds_up() {
        let page = page_size() as u64;
        assert_eq!(page_align(1), page);
        assert_eq!(page_align(page), page);
        assert_eq!(page_align(page + 1), page * 2);
    }

    #[test]
    fn map_and_free_roundtrip() {
        let size = page_size();
        let ptr = map(size).unwrap();
        // SAFETY: freshly mapped, writable, at least `size` bytes.
        unsafe { ptr.as_ptr().write(0xAB) };
        free(ptr, size);
    }

    #[test]
    fn mutex_lock_unlock() {
        let m = Mutex::new();
        m.lock();
        m.unlock();
    }

    #[test]
    fn condvar_wait_for_times_out() {
        let cv = ConditionVariable::new();
        assert!(!cv.wait_for(10));
    }

    #[test]
    fn condvar_notify_wakes_waiter() {
        use std::sync::Arc;
        let cv = Arc::new(ConditionVariable::new());
        let cv2 = cv.clone();
        let t = Thread::spawn(move || {
            Thread::static_sleep(20);
            cv2.notify_one();
        })
        .unwrap();
        assert!(cv.wait_for(2000));
        t.join().unwrap();
    }

    #[test]
    fn monotonic_ms_advances() {
        let a = monotonic_ms();
        Thread::static_sleep(5);
        let b = monotonic_ms();
        assert!(b >= a);
    }
}
