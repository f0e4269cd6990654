//! User-defined long-running work hosted on a [`crate::scheduler::worker::Worker`],
//! plus the two internal tasks that bind a service to an idle worker and
//! reclaim the worker once the service returns.
//!
//! Grounded in `fabric/src/threading/scheduler.hpp`'s `VMService`
//! (`execute`, `get_unique_identifier`) and `Scheduler::StartServiceTask`
//! / `Scheduler::ThreadReturnTask`.

use std::sync::Arc;

use crate::platform;
use crate::scheduler::scheduler::Scheduler;
use crate::scheduler::task::ScheduledTask;
use crate::scheduler::worker::{Worker, WorkerPtr};

/// Long-running work hosted on a dedicated worker thread. `run` is
/// expected to cooperate with interruption by calling
/// [`Worker::check_if_interrupted`] and [`Worker::check_pause`]
/// periodically, and to use [`Worker::sleep`] instead of blocking calls
/// that can't observe an interrupt.
pub trait Service: Send + Sync {
    fn name(&self) -> &str;
    fn run(&self, worker: &Worker);
}

/// `now ^ &service`, matching `VMService::get_unique_identifier`'s
/// `current_time_millis() ^ (uint64)this`.
pub(crate) fn unique_identifier(service: &Arc<dyn Service>) -> u64 {
    let addr = Arc::as_ptr(service) as *const () as usize as u64;
    platform::monotonic_ms() ^ addr
}

/// Binds `service` to the first idle worker (allocating a fresh one if
/// none is idle) and hosts it. Submitted via
/// [`Scheduler::add_task`]/[`Scheduler::add_realtime_task`] like any
/// other task.
pub struct StartServiceTask {
    pub service: Arc<dyn Service>,
}

impl ScheduledTask for StartServiceTask {
    fn run(&self, scheduler: &Arc<Scheduler>) {
        let worker_ptr = match scheduler.acquire_idle_worker() {
            Ok(w) => w,
            Err(e) => {
                tracing::error!(error = %e, service = self.service.name(), "no worker available to host service");
                return;
            }
        };
        // SAFETY: `worker_ptr` addresses a `Worker` in the scheduler's
        // arena, which outlives this call.
        let worker = unsafe { worker_ptr.as_ref() };
        worker.mark_busy();
        if let Err(e) = worker.host(worker_ptr, Arc::clone(&self.service), Arc::clone(scheduler)) {
            tracing::error!(error = %e, service = self.service.name(), "failed to host service");
            worker.mark_idle();
        }
    }
}

/// Posted by a worker's hosted thread just before it exits. Joins the OS
/// thread (already finished by construction) and marks the worker idle
/// again, reclaiming it for the next `StartServiceTask`.
pub(crate) struct ThreadReturnTask {
    pub(crate) worker: WorkerPtr,
}

impl ScheduledTask for ThreadReturnTask {
    fn run(&self, _scheduler: &Arc<Scheduler>) {
        // SAFETY: see `WorkerPtr`'s doc comment.
        let worker = unsafe { self.worker.0.as_ref() };
        if let Err(e) = worker.join() {
            tracing::error!(error = %e, "worker thread join failed");
        }
        worker.mark_idle();
    }
}
