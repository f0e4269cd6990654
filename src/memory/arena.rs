//! Byte-granular bump allocator: a chain of fixed-size [`Region`]s bound
//! together into one [`Arena`], plus a forward, non-restartable
//! [`ArenaIterator`].
//!
//! Grounded in `fabric/src/memory/global.hpp`/`.cpp`'s `Region`/`Arena`/
//! `Arena::Iterator`. `Region::pool` there is a plain `os::malloc`; here it
//! is a page backed by [`crate::platform::map`], since this crate's arenas
//! sit directly on top of the host-mapped heap rather than a libc heap.
//!
//! An `Arena` is single-writer (§5): all `allocate` calls on one instance
//! must come from the thread that owns it. Nothing here is `Sync`.

use std::cell::Cell;
use std::ptr::NonNull;

use crate::error::Result;
use crate::platform;

/// One fixed-size, host-mapped bump region, chained to the region
/// allocated immediately before it.
pub struct Region {
    base: NonNull<u8>,
    pool_size: usize,
    bump: Cell<usize>,
    next: Cell<Option<NonNull<Region>>>,
}

impl Region {
    fn new(pool_size: usize) -> Result<NonNull<Region>> {
        let base = platform::map(pool_size)?;
        let region = Box::new(Region {
            base,
            pool_size,
            bump: Cell::new(0),
            next: Cell::new(None),
        });
        // SAFETY: `Box::into_raw` always yields a non-null, well-aligned
        // pointer; ownership transfers to whichever `Arena` chain links
        // this node, which reconstructs the `Box` in `free_all`.
        Ok(unsafe { NonNull::new_unchecked(Box::into_raw(region)) })
    }

    /// Bump-allocate `size` bytes from this region only; `None` if it
    /// would overrun `pool_size`. Matches the source's `>=` comparison
    /// (a request that would land exactly on the final byte boundary is
    /// still rejected, leaving one byte of headroom per region — kept
    /// as-is rather than "corrected" to `>`).
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        let bump = self.bump.get();
        if bump + size >= self.pool_size {
            return None;
        }
        // SAFETY: `bump + size < pool_size`, so this offset stays inside
        // the mapped region.
        let ptr = unsafe { self.base.as_ptr().add(bump) };
        self.bump.set(bump + size);
        // SAFETY: offset from a non-null base by less than `pool_size`.
        Some(unsafe { NonNull::new_unchecked(ptr) })
    }
}

/// A chain of [`Region`]s bump-allocated from, newest region first.
pub struct Arena {
    pool_size: usize,
    head: Cell<Option<NonNull<Region>>>,
}

impl Arena {
    /// Construct an arena whose regions are each `pool_size` bytes.
    pub fn new(pool_size: usize) -> Result<Self> {
        let head = Region::new(pool_size)?;
        Ok(Arena {
            pool_size,
            head: Cell::new(Some(head)),
        })
    }

    /// Allocate `n` contiguous bytes, always within a single region. An
    /// allocation larger than `pool_size` is a programmer error — rejected
    /// by a debug assertion, per §4.C ("the spec forbids it"), and served
    /// from an oversized one-off region in release builds rather than
    /// panicking, a documented deviation recorded in `DESIGN.md`.
    pub fn allocate(&self, n: usize) -> Result<NonNull<u8>> {
        debug_assert!(
            n <= self.pool_size,
            "allocation of {n} bytes exceeds arena pool size {}",
            self.pool_size
        );

        // SAFETY: `head` is always `Some` after construction; only
        // `free_all` clears it, and an arena is not used after teardown.
        let head = self.head.get().expect("arena used after free_all");
        let head_ref = unsafe { head.as_ref() };
        if let Some(ptr) = head_ref.allocate(n) {
            return Ok(ptr);
        }
        self.inflate(n)
    }

    /// Prepend a fresh region and serve `init_offset` bytes from it,
    /// mirroring `Arena::inflate`. A request larger than the configured
    /// pool size gets a region sized to fit it exactly, so contiguity
    /// (invariant 1) still holds.
    fn inflate(&self, init_offset: usize) -> Result<NonNull<u8>> {
        let region_size = self.pool_size.max(init_offset + 1);
        let new_head = Region::new(region_size)?;
        // SAFETY: freshly constructed, uniquely owned by this call until
        // linked below.
        let new_head_ref = unsafe { new_head.as_ref() };
        new_head_ref.next.set(self.head.get());
        self.head.set(Some(new_head));
        Ok(new_head_ref
            .allocate(init_offset)
            .expect("fresh region always fits its own sizing request"))
    }

    /// Release every mapped region. Safe to call at most once; no
    /// allocation may follow.
    pub fn free_all(&self) {
        let mut current = self.head.take();
        while let Some(region) = current {
            // SAFETY: `region` was produced by `Region::new` via
            // `Box::into_raw`; nothing else holds this pointer once it is
            // unlinked here, so reconstructing the `Box` and dropping it
            // is sound, and no caller retains bytes carved from `base`
            // past this call.
            let boxed = unsafe { Box::from_raw(region.as_ptr()) };
            current = boxed.next.get();
            platform::free(boxed.base, boxed.pool_size);
        }
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        if self.head.get().is_some() {
            self.free_all();
        }
    }
}

/// Stateful, non-restartable forward cursor over an [`Arena`]'s bytes.
///
/// Iterates regions in reverse insertion order (newest first, since
/// `inflate` prepends) and, within one region, in allocation order —
/// exactly `Arena::Iterator::next` in the source. Callers needing
/// chronological order must track it themselves (§4.C).
pub struct ArenaIterator<'a> {
    arena: &'a Arena,
    current: Option<NonNull<Region>>,
    offset: usize,
}

impl<'a> ArenaIterator<'a> {
    pub fn new(arena: &'a Arena) -> Self {
        ArenaIterator {
            current: arena.head.get(),
            arena,
            offset: 0,
        }
    }

    /// Yield the next `step` bytes, or `None` once the chain is
    /// exhausted.
    pub fn next(&mut self, step: usize) -> Option<NonNull<u8>> {
        while let Some(region) = self.current {
            // SAFETY: `region` is reachable from `self.arena.head`, which
            // outlives this iterator by the `'a` borrow, and is never
            // freed while that borrow is live.
            let region_ref = unsafe { region.as_ref() };
            if self.offset + step <= region_ref.bump.get() {
                // SAFETY: `offset + step` fits within the written range
                // of this region, itself within the mapped allocation.
                let ptr = unsafe { region_ref.base.as_ptr().add(self.offset) };
                self.offset += step;
                // SAFETY: non-null base plus an in-bounds offset.
                return Some(unsafe { NonNull::new_unchecked(ptr) });
            } else if let Some(next) = region_ref.next.get() {
                self.current = Some(next);
                self.offset = 0;
            } else {
                break;
            }
        }
        let _ = self.arena;
        None
    }
}
