//! Low-footprint synchronization primitives: the tri-state [`Handshake`]
//! used for one-shot pause/resume negotiations, and the fair
//! [`OrderedQueue`] FIFO mutex with its per-thread [`QueueClient`].
//!
//! Grounded in `fabric/src/threading/handshake.hpp`/`.cpp` and
//! `fabric/src/threading/ordered-queue.hpp`/`.cpp`.

pub mod handshake;
pub mod ordered_queue;

pub use handshake::Handshake;
pub use ordered_queue::{OrderedQueue, OrderedWaiter, QueueClient};
