#![warn(clippy::all)]
#![warn(rust_2018_idioms)]
// Unsafe code is confined to `platform`, `memory::arena`,
// `memory::typed_arena`, `sync::ordered_queue`, and the scheduler's
// ring-splice functions, each carrying its own safety justification.

//! # veil-fabric
//!
//! An execution-fabric core for a managed-language VM: an arena-based
//! memory substrate, a fair FIFO wait-queue primitive, and a
//! single-threaded cooperative scheduler hosting long-running services on
//! a pool of reused OS threads.
//!
//! ## Key components
//!
//! - [`memory`]: bump-allocated arenas over host-mapped pages, a typed
//!   variant for live-object storage, and a pluggable heap-management
//!   layer capping total mapped bytes.
//! - [`sync`]: a tri-state [`sync::Handshake`] for one-shot pause/resume
//!   negotiation, and [`sync::OrderedQueue`] — a fair mutex with a
//!   one-atomic-pointer footprint on the protected object.
//! - [`scheduler`]: a circular task ring drained by one dedicated thread,
//!   backed by a pool of [`scheduler::Worker`]s that host
//!   [`scheduler::Service`] implementations.
//! - [`runtime`]: wires the above into the single handle a host process
//!   constructs once at startup.

pub mod atomics;
pub mod config;
pub mod error;
pub mod memory;
pub mod platform;
pub mod runtime;
pub mod scheduler;
pub mod sync;

pub use config::Config;
pub use error::{FabricError, Result};
pub use runtime::Runtime;

/// Common imports for consumers of this crate.
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{FabricError, Result};
    pub use crate::memory::{Algorithm, AllocatorHandle, HeapManagement};
    pub use crate::runtime::Runtime;
    pub use crate::scheduler::{Scheduler, Service, Worker};
    pub use crate::sync::{Handshake, OrderedQueue, QueueClient};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtime_builds_from_default_config() {
        // Not paused until `Scheduler::start`'s loop actually parks on
        // `idle_cv` — a freshly constructed scheduler hasn't run yet.
        let runtime = Runtime::with_default_algorithm(Config::default()).unwrap();
        assert!(!runtime.scheduler.is_paused());
    }
}
