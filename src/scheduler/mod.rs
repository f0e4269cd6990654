//! Single-threaded scheduler: a circular task ring processed by one
//! dedicated thread, a pool of reusable [`worker::Worker`]s hosting
//! user-defined [`service::Service`]s.
//!
//! Grounded in `fabric/src/threading/scheduler.hpp`/`.cpp` (`Scheduler`,
//! `ScheduledTask`, `VMThread`, `VMService`).

pub mod scheduler;
pub mod service;
pub mod task;
pub mod worker;

pub use scheduler::Scheduler;
pub use service::{Service, StartServiceTask};
pub use task::{ScheduledTask, TaskHeader, TaskNode};
pub use worker::Worker;
