//! Crate-wide error taxonomy.
//!
//! Every subsystem maps its own failures into [`FabricError`] at its
//! boundary. Implementation faults — invariant violations that indicate a
//! bug rather than an expected failure mode (a null thread handle after a
//! successful start, unlocking a mutex this thread never locked) are not
//! represented here; they `panic!` immediately with a diagnostic message,
//! matching the upstream distinction between recoverable request errors
//! and process-aborting invariant violations.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, FabricError>;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FabricError {
    /// The host OS refused to map or grow memory.
    #[error("host out of memory: {0}")]
    HostOutOfMemory(String),

    /// `mapped_bytes` would exceed `MAX_HEAP_SIZE`.
    ///
    /// Note: the increment that produced this rejection is not rolled
    /// back (see [`crate::memory::management::HeapManagement::heap_map`]),
    /// so repeated overflowing calls permanently shrink the remaining
    /// budget. This is a documented, deliberate port of the source
    /// behaviour, not a bug in this crate.
    #[error("heap overflow: requested {requested} bytes, cap is {cap} bytes")]
    HeapOverflow { requested: u64, cap: u64 },

    /// Requested heap cap exceeds what the installed algorithm supports.
    #[error("invalid heap size: requested {requested} bytes, algorithm supports {supported} bytes")]
    InvalidHeapSize { requested: u64, supported: u64 },

    /// `HeapManagement::new` was asked to install no algorithm.
    #[error("no algorithm installed")]
    NoAlgorithm,

    /// The algorithm plug-in reported initialization failure.
    #[error("algorithm initialization failed: {0}")]
    AlgorithmInit(String),

    /// The OS refused to create a thread, mutex, or condition variable.
    #[error("thread resource exhausted: {0}")]
    ThreadResource(String),

    /// A join detected a self-join or equivalent deadlock.
    #[error("deadlock detected: {0}")]
    Deadlock(String),

    /// Join called on a worker that was never started, or already joined.
    #[error("invalid join: {0}")]
    InvalidJoin(String),

    /// A `sleep` was cut short by an `interrupt`.
    #[error("interrupted")]
    Interrupted,
}
