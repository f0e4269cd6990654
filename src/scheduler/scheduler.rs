//! The scheduler itself: one dedicated thread draining a circular task
//! ring, backed by a pool of reusable [`Worker`]s.
//!
//! Grounded in `fabric/src/threading/scheduler.hpp`/`.cpp`'s `Scheduler`
//! (`start`, `add_task`, `add_realtime_task`, `notify_added_task`,
//! `idle_thread`). Shutdown drains and runs every pending task, interrupts
//! and joins every non-idle worker, then tears down the worker arena.

use std::cell::UnsafeCell;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::atomics::AtomicFlag;
use crate::config::Config;
use crate::error::{FabricError, Result};
use crate::memory::typed_arena::{TypedArena, TypedArenaIterator};
use crate::platform;
use crate::scheduler::task::TaskNode;
use crate::scheduler::worker::Worker;

/// # Safety
///
/// `current_task` and the worker arena's bump state are the scheduler's
/// only interior-mutable fields not already built from atomics. Both are
/// touched exclusively in two disciplined ways: (1) any thread calling
/// `add_task`/`add_realtime_task` first locks `action_m`, and (2) the
/// scheduler's own thread, inside `start`'s loop, is the sole reader and
/// writer of `current_task` outside that lock and the sole mutator of
/// the worker arena. No two threads ever race on either field — the same
/// discipline the source enforces with `scheduler_action_m` over its raw
/// `ScheduledTask*` ring.
pub struct Scheduler {
    workers: TypedArena<Worker>,
    action_m: platform::Mutex,
    idle_cv: platform::ConditionVariable,
    paused: AtomicFlag,
    terminate_requested: AtomicFlag,
    current_task: UnsafeCell<Option<NonNull<TaskNode>>>,
    pause_wait_ms: u64,
}

unsafe impl Send for Scheduler {}
unsafe impl Sync for Scheduler {}

impl Scheduler {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Scheduler {
            workers: TypedArena::new(num_cpus::get().max(1))?,
            action_m: platform::Mutex::new(),
            idle_cv: platform::ConditionVariable::new(),
            // Not paused until `start`'s loop actually parks on `idle_cv`.
            // Callers routinely submit a first task (`Runtime::submit_service`
            // in `main.rs`) before the scheduler thread ever begins its
            // loop; if this started `true`, that submission's
            // `notify_added_task` would spin forever waiting for a loop
            // that hasn't started yet to observe and clear the flag.
            paused: AtomicFlag::new(false),
            terminate_requested: AtomicFlag::new(false),
            current_task: UnsafeCell::new(None),
            pause_wait_ms: config.pause_wait_ms,
        })
    }

    /// FIFO submission: `node` waits behind whatever is currently
    /// selected to run next.
    pub fn add_task(&self, node: &TaskNode) -> Result<()> {
        self.splice_in(node, false)
    }

    /// Real-time submission: `node` runs immediately after whatever the
    /// scheduler is about to run (or runs next itself, if the ring is
    /// empty).
    pub fn add_realtime_task(&self, node: &TaskNode) -> Result<()> {
        self.splice_in(node, true)
    }

    fn splice_in(&self, node: &TaskNode, realtime: bool) -> Result<()> {
        if self.terminate_requested.load() {
            return Err(FabricError::Interrupted);
        }
        let ptr = NonNull::from(node);
        self.action_m.lock();
        // SAFETY: `action_m` is held; see the struct-level safety note.
        let current = unsafe { *self.current_task.get() };
        match current {
            None => {
                node.connect_solo();
                unsafe { *self.current_task.get() = Some(ptr) };
            }
            Some(cur) => {
                if realtime {
                    unsafe { node.connect_after(cur.as_ptr()) };
                } else {
                    unsafe { node.connect_before(cur.as_ptr()) };
                }
            }
        }
        self.action_m.unlock();
        self.notify_added_task();
        Ok(())
    }

    /// Wake a paused scheduler thread. Spins until the `paused` flag is
    /// observed false, matching the source's wake-and-confirm pattern
    /// around `process_cycle_pause_cv`.
    pub fn notify_added_task(&self) {
        while self.paused.load() {
            self.idle_cv.notify_one();
            platform::Thread::static_sleep(0);
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load()
    }

    pub fn request_termination(&self) {
        self.terminate_requested.store(true);
        self.idle_cv.notify_all();
    }

    pub(crate) fn acquire_idle_worker(&self) -> Result<NonNull<Worker>> {
        let mut it = TypedArenaIterator::new(&self.workers);
        while let Some(w) = it.next() {
            // SAFETY: every slot reachable from the arena was initialized
            // when it was first allocated below.
            let wref = unsafe { w.as_ref() };
            if wref.is_idle() {
                return Ok(w);
            }
        }
        let uninit = self.workers.allocate()?;
        // SAFETY: freshly reserved, never read before this write.
        unsafe {
            uninit
                .as_ptr()
                .write(std::mem::MaybeUninit::new(Worker::new()))
        };
        Ok(uninit.cast())
    }

    /// Look up a currently-hosting worker by the `service_id` its
    /// hosted service was assigned at `host` time. Returns `None` once
    /// the worker has gone idle again.
    pub fn find_worker_by_service_id(&self, service_id: u64) -> Option<NonNull<Worker>> {
        let mut it = TypedArenaIterator::new(&self.workers);
        while let Some(w) = it.next() {
            // SAFETY: every slot reachable from the arena was initialized
            // when it was first allocated.
            let wref = unsafe { w.as_ref() };
            if !wref.is_idle() && wref.service_id() == service_id {
                return Some(w);
            }
        }
        None
    }

    pub fn pause_worker(&self, worker: NonNull<Worker>) -> bool {
        // SAFETY: workers live in this scheduler's arena for its whole
        // lifetime.
        unsafe { worker.as_ref() }.pause(self.pause_wait_ms)
    }

    pub fn resume_worker(&self, worker: NonNull<Worker>) {
        // SAFETY: see `pause_worker`.
        unsafe { worker.as_ref() }.resume()
    }

    /// Pop the head of the ring (if any) and run it to completion. Returns
    /// `true` if a task was run, `false` if the ring was empty.
    fn run_one(scheduler: &Arc<Scheduler>) -> bool {
        scheduler.action_m.lock();
        // SAFETY: `action_m` is held.
        let current = unsafe { *scheduler.current_task.get() };
        let picked = match current {
            None => {
                scheduler.action_m.unlock();
                return false;
            }
            Some(cur) => {
                // SAFETY: `cur` is the currently linked task; its links
                // are only touched under `action_m`, held here.
                let cur_ref = unsafe { cur.as_ref() };
                let next = cur_ref.next.load();
                if next == cur.as_ptr() {
                    unsafe { *scheduler.current_task.get() = None };
                } else {
                    unsafe { *scheduler.current_task.get() = NonNull::new(next) };
                }
                cur
            }
        };
        scheduler.action_m.unlock();

        // SAFETY: `picked` was just detached from `current_task` above;
        // nothing reaches it through the ring head anymore. Its `prev`/
        // `next` links to its former neighbors are still intact until
        // `disconnect` below runs them outside `action_m`.
        let picked_ref = unsafe { picked.as_ref() };
        picked_ref.task.run(scheduler);
        picked_ref.disconnect();
        picked_ref.header().mark_completed();
        picked_ref.header().notify_waiter();

        if !picked_ref.header().caller_owned {
            // SAFETY: `caller_owned = false` is only set by submission
            // code that allocated this node via `Box::into_raw` and
            // transferred ownership to the scheduler.
            drop(unsafe { Box::from_raw(picked.as_ptr()) });
        }
        true
    }

    /// The scheduler's main loop. Runs until `request_termination` is
    /// called, then drains and runs every pending task, interrupts and
    /// joins every non-idle worker, and tears down the worker arena.
    pub fn start(scheduler: &Arc<Scheduler>) {
        loop {
            scheduler.action_m.lock();
            if scheduler.terminate_requested.load() {
                scheduler.action_m.unlock();
                break;
            }
            // SAFETY: `action_m` is held.
            let empty = unsafe { (*scheduler.current_task.get()).is_none() };
            if empty {
                scheduler.paused.store(true);
                scheduler.action_m.unlock();
                scheduler.idle_cv.wait();
                scheduler.paused.store(false);
                continue;
            }
            scheduler.action_m.unlock();

            Scheduler::run_one(scheduler);
        }

        scheduler.finalization_on_termination(scheduler);
    }

    /// Drain every pending task, then interrupt, join, and reclaim every
    /// non-idle worker before tearing the worker arena down. New
    /// submissions are rejected with [`FabricError::Interrupted`] for the
    /// whole duration (`terminate_requested` is already set by the time
    /// this runs).
    fn finalization_on_termination(&self, scheduler: &Arc<Scheduler>) {
        while Scheduler::run_one(scheduler) {}

        let mut it = TypedArenaIterator::new(&self.workers);
        while let Some(w) = it.next() {
            // SAFETY: initialized slots only, as above.
            let wref = unsafe { w.as_ref() };
            if !wref.is_idle() {
                wref.interrupt();
                if let Err(e) = wref.join() {
                    tracing::error!(error = %e, "worker failed to join during shutdown");
                }
                wref.mark_idle();
            }
        }

        self.workers.destruct_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::service::{Service, StartServiceTask};
    use crate::scheduler::task::{ScheduledTask, TaskNode};
    use crate::scheduler::worker::Worker;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::thread;

    struct NoopTask {
        ran: Arc<AtomicU32>,
    }

    impl ScheduledTask for NoopTask {
        fn run(&self, _scheduler: &Arc<Scheduler>) {
            self.ran.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct QuickService {
        ran: Arc<AtomicU32>,
    }

    impl Service for QuickService {
        fn name(&self) -> &str {
            "quick"
        }
        fn run(&self, _worker: &Worker) {
            self.ran.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn add_task_then_start_runs_and_can_be_terminated() {
        let scheduler = Arc::new(Scheduler::new(&Config::default()).unwrap());
        let ran = Arc::new(AtomicU32::new(0));
        let node = TaskNode::new(Box::new(NoopTask { ran: Arc::clone(&ran) }), true);
        scheduler.add_task(&node).unwrap();

        let sched_for_thread = Arc::clone(&scheduler);
        let handle = thread::spawn(move || Scheduler::start(&sched_for_thread));

        for _ in 0..200 {
            if ran.load(Ordering::SeqCst) == 1 {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        scheduler.request_termination();
        handle.join().unwrap();
    }

    #[test]
    fn service_runs_to_completion_on_a_worker() {
        let scheduler = Arc::new(Scheduler::new(&Config::default()).unwrap());
        let ran = Arc::new(AtomicU32::new(0));
        let service: Arc<dyn Service> = Arc::new(QuickService { ran: Arc::clone(&ran) });
        let node = TaskNode::new(Box::new(StartServiceTask { service }), false);
        let raw = Box::into_raw(Box::new(node));
        // SAFETY: ownership transferred to the scheduler via `caller_owned = false`.
        let node_ref = unsafe { &*raw };
        scheduler.add_task(node_ref).unwrap();

        let sched_for_thread = Arc::clone(&scheduler);
        let handle = thread::spawn(move || Scheduler::start(&sched_for_thread));

        for _ in 0..200 {
            if ran.load(Ordering::SeqCst) == 1 {
                break;
            }
            thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        scheduler.request_termination();
        handle.join().unwrap();
    }
}
