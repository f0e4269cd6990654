//! An OS thread slot reused across services. Workers are allocated into
//! the scheduler's worker arena on demand and never freed individually —
//! only [`crate::scheduler::scheduler::Scheduler::finalization_on_termination`]
//! tears the arena down.
//!
//! Grounded in `fabric/src/threading/scheduler.hpp`'s `VMThread` (`host`,
//! `sleep`, `check_if_interrupted`, `pause_handshake`/`resume_handshake`).
//! `check_pause` below builds the pause/resume cooperative check point on
//! those two handshakes using [`crate::sync::Handshake`]'s tick/tok
//! contract.

use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::atomics::{AtomicFlag, AtomicWord};
use crate::error::{FabricError, Result};
use crate::platform;
use crate::scheduler::scheduler::Scheduler;
use crate::scheduler::service::Service;
use crate::scheduler::task::TaskNode;
use crate::sync::Handshake;

/// A raw pointer to a [`Worker`] living in the scheduler's arena, safe to
/// move into a spawned thread's closure.
///
/// # Safety
/// The scheduler's worker arena is never freed or reallocated while any
/// worker might still be hosting a service — it is torn down only from
/// `finalization_on_termination`, which first joins every non-idle
/// worker. The address this wraps is therefore valid for as long as the
/// closure that captured it can run.
#[derive(Clone, Copy)]
pub(crate) struct WorkerPtr(pub(crate) NonNull<Worker>);

unsafe impl Send for WorkerPtr {}
unsafe impl Sync for WorkerPtr {}

pub struct Worker {
    idle: AtomicFlag,
    paused: AtomicFlag,
    service_id: AtomicWord,
    owner_thread_id: AtomicWord,
    os_thread: Mutex<Option<platform::Thread>>,
    self_block_cv: platform::ConditionVariable,
    pause_ack_cv: platform::ConditionVariable,
    pause_handshake: Handshake,
    resume_handshake: Handshake,
    interrupted: AtomicFlag,
}

impl Worker {
    pub(crate) fn new() -> Self {
        Worker {
            idle: AtomicFlag::new(true),
            paused: AtomicFlag::new(false),
            service_id: AtomicWord::new(0),
            owner_thread_id: AtomicWord::new(0),
            os_thread: Mutex::new(None),
            self_block_cv: platform::ConditionVariable::new(),
            pause_ack_cv: platform::ConditionVariable::new(),
            pause_handshake: Handshake::new(),
            resume_handshake: Handshake::new(),
            interrupted: AtomicFlag::new(false),
        }
    }

    pub fn is_idle(&self) -> bool {
        self.idle.load()
    }

    pub(crate) fn mark_idle(&self) {
        self.idle.store(true);
    }

    pub(crate) fn mark_busy(&self) {
        self.idle.store(false);
    }

    pub fn service_id(&self) -> u64 {
        self.service_id.load()
    }

    /// Spawn the OS thread that will run `service` to completion, then
    /// post a `ThreadReturnTask` back to `scheduler` so the scheduler
    /// thread can join it and reclaim this worker.
    pub(crate) fn host(
        &self,
        self_ptr: NonNull<Worker>,
        service: Arc<dyn Service>,
        scheduler: Arc<Scheduler>,
    ) -> Result<()> {
        self.interrupted.store(false);
        self.paused.store(false);
        // Guard against a stale `TOK` left by a pause request the
        // previous service never reached `check_pause` in time to
        // acknowledge.
        self.pause_handshake.open();
        self.resume_handshake.open();
        self.service_id.store(super::service::unique_identifier(&service));

        let worker_ptr = WorkerPtr(self_ptr);
        let thread = platform::Thread::spawn(move || {
            let worker_ptr = worker_ptr;
            // SAFETY: see `WorkerPtr`'s doc comment.
            let worker = unsafe { worker_ptr.0.as_ref() };
            worker.owner_thread_id.store(platform::Thread::current_id());

            service.run(worker);

            let task = Box::new(super::service::ThreadReturnTask { worker: worker_ptr });
            let node = Box::new(TaskNode::new(task, false));
            let raw = Box::into_raw(node);
            // SAFETY: `raw` was just produced by `Box::into_raw`; ownership
            // transfers to the scheduler (`caller_owned = false`), which
            // frees it once `ThreadReturnTask::run` finishes.
            let node_ref = unsafe { &*raw };
            let _ = scheduler.add_realtime_task(node_ref);
            scheduler.notify_added_task();
        })?;

        *self.os_thread.lock() = Some(thread);
        Ok(())
    }

    pub(crate) fn join(&self) -> Result<()> {
        match self.os_thread.lock().take() {
            Some(thread) => thread.join(),
            None => Err(FabricError::InvalidJoin(
                "worker has no hosted thread to join".into(),
            )),
        }
    }

    /// Interruptible sleep. Returns `false` if woken by `interrupt`
    /// before `ms` milliseconds elapsed. Must be called by the thread
    /// this worker is currently hosting.
    pub fn sleep(&self, ms: u64) -> bool {
        debug_assert_eq!(
            platform::Thread::current_id(),
            self.owner_thread_id.load(),
            "Worker::sleep called from a thread other than the one it is hosting"
        );
        if self.interrupted.load() {
            return false;
        }
        let start = platform::monotonic_ms();
        loop {
            if self.interrupted.load() {
                return false;
            }
            let elapsed = platform::monotonic_ms().saturating_sub(start);
            if elapsed >= ms {
                return true;
            }
            self.self_block_cv.wait_for(ms - elapsed);
        }
    }

    /// Cooperative check point: returns once any pending pause/resume
    /// cycle has completed. A no-op if no pause is pending.
    pub fn check_pause(&self) {
        if !self.pause_handshake.is_tok() {
            return;
        }
        self.pause_handshake.tok();
        self.paused.store(true);
        self.pause_ack_cv.notify_all();

        loop {
            if self.resume_handshake.is_tok() {
                self.resume_handshake.tok();
                self.paused.store(false);
                return;
            }
            self.self_block_cv.wait_for(20);
        }
    }

    pub fn check_if_interrupted(&self) -> bool {
        self.interrupted.load()
    }

    /// Request this worker pause at its next `check_pause`. Idempotent on
    /// an idle or already-paused worker. Returns `false` if the worker
    /// did not acknowledge within `wait_ms`.
    pub(crate) fn pause(&self, wait_ms: u64) -> bool {
        if self.idle.load() || self.paused.load() {
            return true;
        }
        if !self.pause_handshake.tick() {
            return true;
        }
        let deadline = platform::monotonic_ms() + wait_ms;
        loop {
            if self.pause_handshake.is_tick() {
                return true;
            }
            let now = platform::monotonic_ms();
            if now >= deadline {
                return false;
            }
            self.pause_ack_cv.wait_for(deadline - now);
        }
    }

    pub(crate) fn resume(&self) {
        if self.resume_handshake.tick() {
            self.self_block_cv.notify_all();
        }
    }

    /// Request this worker's hosted service stop at its next `sleep` or
    /// `check_if_interrupted` poll. Any holder of a worker reference may
    /// call this — a service may interrupt another service's worker, and
    /// the scheduler calls it on every non-idle worker during shutdown.
    pub fn interrupt(&self) {
        self.interrupted.store(true);
        self.self_block_cv.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_worker_is_idle() {
        let w = Worker::new();
        assert!(w.is_idle());
        assert!(!w.check_if_interrupted());
    }

    #[test]
    fn pause_on_idle_worker_is_idempotent() {
        let w = Worker::new();
        assert!(w.pause(50));
    }

    #[test]
    fn interrupt_sets_flag() {
        let w = Worker::new();
        w.interrupt();
        assert!(w.check_if_interrupted());
    }
}
