//! Ties the heap, the scheduler, and configuration together into the
//! single object a host process constructs once at startup.
//!
//! Grounded in `knhk-kernel/src/lib.rs`'s `init()`/prelude pattern: one
//! fallible setup entry point, logged with `tracing`, after which the
//! caller drives the returned handle.

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::memory::management::{Algorithm, BumpAlgorithm, HeapManagement};
use crate::scheduler::scheduler::Scheduler;
use crate::scheduler::service::StartServiceTask;
use crate::scheduler::task::TaskNode;
use crate::scheduler::Service;

/// Installs a plain `tracing_subscriber::fmt` subscriber reading its
/// level filter from `RUST_LOG` (default `info`). Idempotent: a second
/// call after one has already succeeded is a silent no-op.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Owns the heap and the scheduler for one process's lifetime.
pub struct Runtime {
    pub heap: Arc<HeapManagement>,
    pub scheduler: Arc<Scheduler>,
    config: Config,
}

impl Runtime {
    /// Build a runtime from `config`, mapping the supplied `algorithm`
    /// over `config.max_heap_bytes`.
    pub fn new(config: Config, algorithm: Box<dyn Algorithm>) -> Result<Self> {
        let heap = HeapManagement::new(algorithm, config.max_heap_bytes)?;
        let scheduler = Arc::new(Scheduler::new(&config)?);
        tracing::info!(
            max_heap_bytes = config.max_heap_bytes,
            "runtime initialized"
        );
        Ok(Runtime {
            heap,
            scheduler,
            config,
        })
    }

    /// Build a runtime backed by the demonstration bump allocator.
    pub fn with_default_algorithm(config: Config) -> Result<Self> {
        Self::new(config, Box::new(BumpAlgorithm::default()))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Submit `service` to start on the next idle worker.
    pub fn submit_service(&self, service: Arc<dyn Service>) -> Result<()> {
        let node = Box::new(TaskNode::new(Box::new(StartServiceTask { service }), false));
        let raw = Box::into_raw(node);
        // SAFETY: `raw` was just produced by `Box::into_raw`; ownership
        // transfers to the scheduler (`caller_owned = false`), which
        // frees it once the task runs.
        let node_ref = unsafe { &*raw };
        self.scheduler.add_task(node_ref)
    }

    /// Run the scheduler's main loop on the calling thread until
    /// [`Scheduler::request_termination`] is called from another thread.
    pub fn run(&self) {
        Scheduler::start(&self.scheduler);
    }

    pub fn request_termination(&self) {
        self.scheduler.request_termination();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_builds_with_default_algorithm() {
        let runtime = Runtime::with_default_algorithm(Config::default()).unwrap();
        assert_eq!(runtime.config().max_heap_bytes, Config::default().max_heap_bytes);
    }
}
