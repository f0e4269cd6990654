//! The scheduler's unit of work: a [`ScheduledTask`] trait object embedded
//! in a [`TaskNode`], linked into the scheduler's circular task ring via
//! raw, atomically-stored `prev`/`next` pointers.
//!
//! Grounded in `fabric/src/threading/scheduler.hpp`'s `ScheduledTask`
//! (`connect_last`/`connect_next`/`disconnect`, `signal_completed`,
//! `wait_for_completion`, `caller_owned`/`transfer_ownership`).

use std::ptr;
use std::sync::Arc;

use crate::atomics::{AtomicFlag, AtomicPointer};
use crate::platform;
use crate::scheduler::scheduler::Scheduler;

/// Work dispatched by the scheduler. Implementors are usually small,
/// short-lived structs (see [`crate::scheduler::service::StartServiceTask`]).
pub trait ScheduledTask: Send + Sync {
    fn run(&self, scheduler: &Arc<Scheduler>);
}

/// Bookkeeping shared by every task, regardless of who allocated it.
///
/// `completed` means exactly what it says: `wait_for_completion` waits
/// *while not completed*, flips true exactly once a task's `run` returns.
pub struct TaskHeader {
    /// `true` if the submitter owns this node's storage (usually a stack
    /// slot it will outlive) and will drop it itself; `false` if this
    /// node was `Box::into_raw`'d and the scheduler frees it after `run`.
    pub caller_owned: bool,
    completed: AtomicFlag,
    requester_waiting: AtomicFlag,
    requester_awake: AtomicFlag,
    done_cv: platform::ConditionVariable,
}

impl TaskHeader {
    fn new(caller_owned: bool) -> Self {
        TaskHeader {
            caller_owned,
            completed: AtomicFlag::new(false),
            requester_waiting: AtomicFlag::new(false),
            requester_awake: AtomicFlag::new(false),
            done_cv: platform::ConditionVariable::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed.load()
    }

    pub(crate) fn mark_completed(&self) {
        self.completed.store(true);
    }

    /// Block until the scheduler has run this task. Only meaningful for
    /// `caller_owned` nodes — nothing calls this for a scheduler-owned
    /// node, since nobody holds a reference to it after submission.
    pub fn wait_for_completion(&self) {
        self.requester_waiting.store(true);
        while !self.completed.load() {
            self.done_cv.wait();
        }
        self.requester_awake.store(true);
    }

    pub(crate) fn notify_waiter(&self) {
        while self.requester_waiting.load() && !self.requester_awake.load() {
            self.done_cv.notify_one();
            platform::Thread::static_sleep(0);
        }
    }
}

/// A task plus its ring links. The scheduler ring is a doubly-linked
/// circular list of `*mut TaskNode`; every link field is an
/// [`AtomicPointer`] so neighboring nodes owned by other threads can be
/// spliced without a torn read, even though splicing itself is only ever
/// attempted by one thread at a time (the submitter, under `action_m`, or
/// the scheduler thread after it has already detached the node).
pub struct TaskNode {
    pub(crate) header: TaskHeader,
    pub(crate) task: Box<dyn ScheduledTask>,
    pub(crate) prev: AtomicPointer<TaskNode>,
    pub(crate) next: AtomicPointer<TaskNode>,
}

impl TaskNode {
    pub fn new(task: Box<dyn ScheduledTask>, caller_owned: bool) -> Self {
        TaskNode {
            header: TaskHeader::new(caller_owned),
            task,
            prev: AtomicPointer::null(),
            next: AtomicPointer::null(),
        }
    }

    pub fn header(&self) -> &TaskHeader {
        &self.header
    }

    fn self_ptr(&self) -> *mut TaskNode {
        self as *const TaskNode as *mut TaskNode
    }

    /// Splice `self` in as the sole member of an empty ring.
    pub(crate) fn connect_solo(&self) {
        let me = self.self_ptr();
        self.prev.store(me);
        self.next.store(me);
    }

    /// Splice `self` in immediately to the left of `anchor` (FIFO: new
    /// work waits behind whatever the scheduler is about to run next).
    ///
    /// # Safety
    /// `anchor` must point at a currently-linked node in a ring this
    /// caller holds `action_m` for.
    pub(crate) unsafe fn connect_before(&self, anchor: *mut TaskNode) {
        let me = self.self_ptr();
        let anchor_ref = unsafe { &*anchor };
        let prev = anchor_ref.prev.load();
        self.prev.store(prev);
        self.next.store(anchor);
        if !prev.is_null() {
            unsafe { (*prev).next.store(me) };
        }
        anchor_ref.prev.store(me);
    }

    /// Splice `self` in immediately to the right of `anchor` (real-time:
    /// jump the queue, run right after whatever is current).
    ///
    /// # Safety
    /// Same contract as [`TaskNode::connect_before`].
    pub(crate) unsafe fn connect_after(&self, anchor: *mut TaskNode) {
        let me = self.self_ptr();
        let anchor_ref = unsafe { &*anchor };
        let next = anchor_ref.next.load();
        self.next.store(next);
        self.prev.store(anchor);
        if !next.is_null() {
            unsafe { (*next).prev.store(me) };
        }
        anchor_ref.next.store(me);
    }

    /// Unlink `self` from whatever ring it is part of. Runs after
    /// `action_m` has already been released — the node has by then
    /// already been detached from `current_task`, so the only other
    /// party who could touch its neighbors is a concurrent
    /// `add_task`/`add_realtime_task` splicing next to a *different*
    /// anchor.
    pub(crate) fn disconnect(&self) {
        let prev = self.prev.load();
        let next = self.next.load();
        let me = self.self_ptr();
        if !prev.is_null() && prev != me {
            unsafe { (*prev).next.store(next) };
        }
        if !next.is_null() && next != me {
            unsafe { (*next).prev.store(prev) };
        }
        self.prev.store(ptr::null_mut());
        self.next.store(ptr::null_mut());
    }
}
