//! Typed arena: a byte [`Arena`] sized in units of one element type,
//! plus a drop-running teardown for arenas of elements that own platform
//! resources.
//!
//! Grounded in `fabric/src/memory/global.hpp`'s `TArena<T>`/
//! `TArenaIterator<T>`.

use std::marker::PhantomData;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use super::arena::{Arena, ArenaIterator};
use crate::error::Result;

/// An [`Arena`] whose region size is `size_of::<T>() * pool_count`,
/// vending `NonNull<T>` slots of uninitialized storage.
pub struct TypedArena<T> {
    inner: Arena,
    _marker: PhantomData<T>,
}

impl<T> TypedArena<T> {
    pub fn new(pool_count: usize) -> Result<Self> {
        let elem = std::mem::size_of::<T>().max(1);
        Ok(TypedArena {
            inner: Arena::new(elem * pool_count.max(1))?,
            _marker: PhantomData,
        })
    }

    /// Reserve storage for one `T`, uninitialized. Caller must write a
    /// value before reading through the returned pointer — enforced at
    /// the type level by returning a `MaybeUninit<T>` pointer.
    pub fn allocate(&self) -> Result<NonNull<MaybeUninit<T>>> {
        let raw = self.inner.allocate(std::mem::size_of::<T>())?;
        Ok(raw.cast())
    }

    /// Run `T`'s destructor over every slot this arena has vended, then
    /// release the backing pages.
    ///
    /// # Safety (invariant, not memory-safety)
    /// Every slot previously returned by [`TypedArena::allocate`] must
    /// have been initialized (written) at least once, and no outstanding
    /// reference to any slot may remain live past this call — required
    /// for typed arenas of elements (waiters, workers) that themselves
    /// own platform resources such as condition variables.
    pub fn destruct_all(&self) {
        let mut it = TypedArenaIterator::new(self);
        while let Some(ptr) = it.next() {
            // SAFETY: contract documented above — every slot was
            // initialized by its allocator and is not referenced again
            // after this loop.
            unsafe { std::ptr::drop_in_place(ptr.as_ptr()) };
        }
        self.inner.free_all();
    }

    /// Release the backing pages without running destructors — for
    /// arenas of plain-data elements with no drop glue.
    pub fn free_all(&self) {
        self.inner.free_all();
    }
}

/// Forward, non-restartable cursor over a [`TypedArena<T>`]'s slots.
pub struct TypedArenaIterator<'a, T> {
    inner: ArenaIterator<'a>,
    _marker: PhantomData<T>,
}

impl<'a, T> TypedArenaIterator<'a, T> {
    pub fn new(arena: &'a TypedArena<T>) -> Self {
        TypedArenaIterator {
            inner: ArenaIterator::new(&arena.inner),
            _marker: PhantomData,
        }
    }

    pub fn next(&mut self) -> Option<NonNull<T>> {
        self.inner
            .next(std::mem::size_of::<T>())
            .map(NonNull::cast)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Elem {
        value: u8,
        dropped: *const std::cell::Cell<u32>,
    }

    impl Drop for Elem {
        fn drop(&mut self) {
            // SAFETY: test-only; the counter outlives the arena.
            let counter = unsafe { &*self.dropped };
            counter.set(counter.get() + 1);
        }
    }

    #[test]
    fn allocate_and_iterate_in_order() {
        // Iteration visits regions newest-first (§4.C), so within-region
        // order is chronological but overall order is not; assert the
        // 130 stamped values all round-trip distinctly rather than
        // assuming a single ascending sequence.
        let arena: TypedArena<[u8; 3]> = TypedArena::new(64).unwrap();
        for i in 0..130u32 {
            let slot = arena.allocate().unwrap();
            let bytes = [(i & 0xff) as u8, ((i >> 8) & 0xff) as u8, 0];
            // SAFETY: freshly allocated uninitialized slot, sized for
            // `[u8; 3]`.
            unsafe { slot.as_ptr().write(MaybeUninit::new(bytes)) };
        }

        let mut it = TypedArenaIterator::new(&arena);
        let mut seen = Vec::new();
        while let Some(ptr) = it.next() {
            // SAFETY: every slot was initialized above before iteration.
            let v = unsafe { ptr.as_ref() };
            seen.push(v[0] as u32 | ((v[1] as u32) << 8));
        }
        assert_eq!(seen.len(), 130);
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 130);
        arena.free_all();
    }

    #[test]
    fn destruct_all_runs_drop_on_every_slot() {
        let counter = std::cell::Cell::new(0u32);
        let arena: TypedArena<Elem> = TypedArena::new(8).unwrap();
        for i in 0..20u8 {
            let slot = arena.allocate().unwrap();
            let elem = Elem {
                value: i,
                dropped: &counter,
            };
            // SAFETY: freshly allocated uninitialized slot, sized for
            // `Elem`.
            unsafe { slot.as_ptr().write(MaybeUninit::new(elem)) };
        }
        arena.destruct_all();
        assert_eq!(counter.get(), 20);
    }
}
