//! Fair FIFO mutex with a one-atomic-pointer footprint on the protected
//! object ([`OrderedQueue`]), plus the per-thread [`QueueClient`] that owns
//! the bulky [`OrderedWaiter`] slots and supports reentrance and nesting
//! across many queues.
//!
//! Grounded in `fabric/src/threading/ordered-queue.hpp`/`.cpp`
//! (`OrderedQueue`, `OrderedQueuee`, `OrderedQueueClient` — renamed
//! `OrderedWaiter`/`QueueClient` here). The hand-off protocol (spin, then
//! exchange into `tail_waiter`, block on the *predecessor's* condition
//! variable, signal `successor_ack`) is reproduced exactly.

use std::cell::Cell;
use std::mem::MaybeUninit;
use std::ptr;
use std::ptr::NonNull;

use crate::atomics::{AtomicFlag, AtomicPointer, AtomicWord};
use crate::config::Config;
use crate::error::Result;
use crate::memory::typed_arena::{TypedArena, TypedArenaIterator};
use crate::platform;

const IDLE: u64 = 0;
const WAITING: u64 = 1;
const OWNING: u64 = 2;

/// The protected object: exactly one atomic pointer, initially null.
/// Cacheline-friendly footprint for huge populations of protected
/// objects — contention cost is borne entirely by the contending
/// thread's [`QueueClient`].
#[derive(Debug, Default)]
pub struct OrderedQueue {
    tail_waiter: AtomicPointer<OrderedWaiter>,
}

impl OrderedQueue {
    pub fn new() -> Self {
        OrderedQueue {
            tail_waiter: AtomicPointer::null(),
        }
    }

    fn as_ptr(&self) -> *mut OrderedQueue {
        self as *const OrderedQueue as *mut OrderedQueue
    }
}

/// Per-acquire slot embedded in a [`QueueClient`]'s typed arena. One
/// waiter fuses all reentrant acquires on the same target.
#[derive(Debug)]
pub struct OrderedWaiter {
    status: AtomicWord,
    reentrance_count: AtomicWord,
    target: AtomicPointer<OrderedQueue>,
    blocker_cv: platform::ConditionVariable,
    exit_signaled: AtomicFlag,
    successor_ack: AtomicFlag,
}

impl OrderedWaiter {
    fn new() -> Self {
        OrderedWaiter {
            status: AtomicWord::new(IDLE),
            reentrance_count: AtomicWord::new(0),
            target: AtomicPointer::null(),
            blocker_cv: platform::ConditionVariable::new(),
            exit_signaled: AtomicFlag::new(false),
            successor_ack: AtomicFlag::new(false),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.status.load() == IDLE
    }

    pub fn is_owning(&self) -> bool {
        self.status.load() == OWNING
    }

    pub fn reentrance_count(&self) -> u64 {
        self.reentrance_count.load()
    }

    fn self_ptr(&self) -> *mut OrderedWaiter {
        self as *const OrderedWaiter as *mut OrderedWaiter
    }

    /// Reentrance short-circuit, spin-then-block acquire, exactly
    /// `OrderedQueuee::try_queue`/`queue` fused into one call (the spin
    /// phase below *is* the `try_queue` attempt; falling out of the spin
    /// loop is the transition into the blocking `queue` phase).
    fn acquire(&self, target: &OrderedQueue, spin_rounds: u32) {
        let target_ptr = target.as_ptr();

        if self.status.load() == OWNING && self.target.load() == target_ptr {
            self.reentrance_count.fetch_add(1);
            return;
        }

        self.target.store(target_ptr);
        let self_ptr = self.self_ptr();

        for _ in 0..spin_rounds {
            if target.tail_waiter.compare_exchange(ptr::null_mut(), self_ptr) == ptr::null_mut() {
                self.status.store(OWNING);
                return;
            }
            std::thread::yield_now();
        }

        let prior = target.tail_waiter.exchange(self_ptr);
        self.status.store(WAITING);

        if !prior.is_null() {
            // SAFETY: `prior` is a waiter some `QueueClient` installed into
            // `target.tail_waiter` and has not yet released — callers
            // never free a waiter still in `Waiting`/`Owning` state (the
            // arena-ownership invariant `QueueClient` upholds), so it
            // remains valid for the duration of this wait.
            let predecessor = unsafe { &*prior };
            while !predecessor.exit_signaled.load() {
                predecessor.blocker_cv.wait();
            }
            predecessor.successor_ack.store(true);
        }

        self.status.store(OWNING);
    }

    /// Release; `false` if this waiter does not currently own `target`.
    fn release(&self, target: &OrderedQueue) -> bool {
        let target_ptr = target.as_ptr();
        if self.target.load() != target_ptr {
            return false;
        }

        if self.reentrance_count.load() > 0 {
            self.reentrance_count.fetch_sub(1);
            return true;
        }

        let self_ptr = self.self_ptr();
        if target.tail_waiter.compare_exchange(self_ptr, ptr::null_mut()) == self_ptr {
            self.reset_idle();
            return true;
        }

        self.exit_signaled.store(true);
        loop {
            self.blocker_cv.notify_one();
            if self.successor_ack.load() {
                break;
            }
            std::thread::yield_now();
        }
        self.reset_idle();
        true
    }

    fn reset_idle(&self) {
        self.status.store(IDLE);
        self.target.store(ptr::null_mut());
        self.exit_signaled.store(false);
        self.successor_ack.store(false);
    }
}

/// Per-thread owner of a typed arena of [`OrderedWaiter`] slots. A client
/// is owned by exactly one thread at a time and never waits concurrently
/// on behalf of two threads.
pub struct QueueClient {
    arena: TypedArena<OrderedWaiter>,
    nested_depth: Cell<u32>,
    spin_rounds: u32,
}

impl QueueClient {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(QueueClient {
            arena: TypedArena::new(config.typed_arena_pool_count)?,
            nested_depth: Cell::new(0),
            spin_rounds: config.queue_spin_rounds,
        })
    }

    pub fn nested_depth(&self) -> u32 {
        self.nested_depth.get()
    }

    /// Wait on `target`: reuses a waiter already bound to `target` in a
    /// non-idle state (reentrance fusion) or an idle slot, allocating a
    /// fresh slot only if neither exists.
    pub fn wait(&self, target: &OrderedQueue) -> Result<()> {
        let target_ptr = target.as_ptr();
        let mut idle_slot: Option<NonNull<OrderedWaiter>> = None;

        let mut it = TypedArenaIterator::new(&self.arena);
        while let Some(w) = it.next() {
            // SAFETY: every slot reachable from the arena was initialized
            // by a prior `wait` call below before being linked in.
            let wref = unsafe { w.as_ref() };
            if wref.target.load() == target_ptr && !wref.is_idle() {
                wref.acquire(target, self.spin_rounds);
                self.nested_depth.set(self.nested_depth.get() + 1);
                return Ok(());
            }
            if idle_slot.is_none() && wref.is_idle() {
                idle_slot = Some(w);
            }
        }

        let slot = match idle_slot {
            Some(w) => w,
            None => {
                let uninit = self.arena.allocate()?;
                // SAFETY: freshly reserved, never read before this write.
                unsafe { uninit.as_ptr().write(MaybeUninit::new(OrderedWaiter::new())) };
                uninit.cast()
            }
        };

        // SAFETY: `slot` was either already initialized (existing idle
        // slot) or just initialized above.
        let wref = unsafe { slot.as_ref() };
        wref.acquire(target, self.spin_rounds);
        self.nested_depth.set(self.nested_depth.get() + 1);
        Ok(())
    }

    /// Leave exclusive access to `target`.
    pub fn exit(&self, target: &OrderedQueue) -> Result<()> {
        let target_ptr = target.as_ptr();
        let mut it = TypedArenaIterator::new(&self.arena);
        while let Some(w) = it.next() {
            // SAFETY: see `wait` above.
            let wref = unsafe { w.as_ref() };
            if wref.target.load() == target_ptr && wref.is_owning() {
                if wref.release(target) {
                    self.nested_depth.set(self.nested_depth.get().saturating_sub(1));
                }
                return Ok(());
            }
        }
        Ok(())
    }
}

impl Drop for QueueClient {
    fn drop(&mut self) {
        // Waiters may hold a `platform::ConditionVariable`; run their
        // destructors before releasing the arena's pages.
        self.arena.destruct_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Barrier};

    fn test_config() -> Config {
        Config {
            typed_arena_pool_count: 8,
            queue_spin_rounds: 4,
            ..Config::default()
        }
    }

    #[test]
    fn single_client_acquire_release_round_trip() {
        let client = QueueClient::new(&test_config()).unwrap();
        let queue = OrderedQueue::new();
        client.wait(&queue).unwrap();
        client.exit(&queue).unwrap();
        assert_eq!(client.nested_depth(), 0);
    }

    #[test]
    fn reentrant_wait_fuses_into_one_waiter() {
        let client = QueueClient::new(&test_config()).unwrap();
        let q1 = OrderedQueue::new();
        let q2 = OrderedQueue::new();

        client.wait(&q1).unwrap();
        client.wait(&q2).unwrap();
        client.wait(&q1).unwrap();
        client.wait(&q2).unwrap();
        client.wait(&q1).unwrap();
        assert_eq!(client.nested_depth(), 5);

        client.exit(&q1).unwrap();
        client.exit(&q2).unwrap();
        client.exit(&q1).unwrap();
        client.exit(&q2).unwrap();
        client.exit(&q1).unwrap();

        assert_eq!(client.nested_depth(), 0);
        assert!(q1.tail_waiter.load().is_null());
        assert!(q2.tail_waiter.load().is_null());
    }

    #[test]
    fn two_threads_mutual_exclusion() {
        let queue = Arc::new(OrderedQueue::new());
        let counter = Arc::new(AtomicU32::new(0));
        let max_observed = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(Barrier::new(3));

        let mut handles = Vec::new();
        for _ in 0..3 {
            let queue = Arc::clone(&queue);
            let counter = Arc::clone(&counter);
            let max_observed = Arc::clone(&max_observed);
            let barrier = Arc::clone(&barrier);
            handles.push(std::thread::spawn(move || {
                let client = QueueClient::new(&test_config()).unwrap();
                barrier.wait();
                for _ in 0..100 {
                    client.wait(&queue).unwrap();
                    let inside = counter.fetch_add(1, Ordering::SeqCst) + 1;
                    max_observed.fetch_max(inside, Ordering::SeqCst);
                    counter.fetch_sub(1, Ordering::SeqCst);
                    client.exit(&queue).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_observed.load(Ordering::SeqCst), 1);
    }
}
