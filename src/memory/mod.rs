//! Arena-based memory substrate: bump regions chained into an arena, a
//! typed variant for live-object arenas, and the pluggable heap-management
//! layer built on top of them.
//!
//! Grounded in the original `fabric/src/memory/global.hpp`/`.cpp`
//! (`Region`, `Arena`, `Arena::Iterator`, `TArena<T>`) and
//! `fabric/src/memory/management.hpp`/`.cpp` (`Management`, `Algorithm`,
//! `Pointer`).

pub mod arena;
pub mod management;
pub mod typed_arena;

pub use arena::{Arena, ArenaIterator, Region};
pub use management::{
    Algorithm, AllocatorHandle, HeapManagement, ManagedPointer,
};
pub use typed_arena::{TypedArena, TypedArenaIterator};
