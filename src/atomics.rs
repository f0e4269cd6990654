//! Sequentially-consistent atomic word, pointer, and flag.
//!
//! Every operation pins `Ordering::SeqCst` unconditionally — the source
//! deliberately picks a single total order over all atomics for
//! simplicity rather than reasoning about per-site relaxed/acquire/release
//! orderings, and this port keeps that choice.

use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

const ORD: Ordering = Ordering::SeqCst;

/// A sequentially-consistent 64-bit atomic word.
#[derive(Debug, Default)]
pub struct AtomicWord(AtomicU64);

impl AtomicWord {
    pub const fn new(initial: u64) -> Self {
        Self(AtomicU64::new(initial))
    }

    pub fn load(&self) -> u64 {
        self.0.load(ORD)
    }

    pub fn store(&self, value: u64) {
        self.0.store(value, ORD)
    }

    pub fn exchange(&self, value: u64) -> u64 {
        self.0.swap(value, ORD)
    }

    /// Returns the value observed at the target, regardless of whether
    /// the swap happened, mirroring the source's `compare_exchange`
    /// signature (which reports the witnessed prior value rather than a
    /// success boolean).
    pub fn compare_exchange(&self, expected: u64, desired: u64) -> u64 {
        match self.0.compare_exchange(expected, desired, ORD, ORD) {
            Ok(prior) => prior,
            Err(prior) => prior,
        }
    }

    pub fn fetch_add(&self, value: u64) -> u64 {
        self.0.fetch_add(value, ORD)
    }

    pub fn fetch_sub(&self, value: u64) -> u64 {
        self.0.fetch_sub(value, ORD)
    }

    pub fn fetch_or(&self, value: u64) -> u64 {
        self.0.fetch_or(value, ORD)
    }

    pub fn fetch_xor(&self, value: u64) -> u64 {
        self.0.fetch_xor(value, ORD)
    }
}

/// A sequentially-consistent boolean flag.
#[derive(Debug, Default)]
pub struct AtomicFlag(AtomicBool);

impl AtomicFlag {
    pub const fn new(initial: bool) -> Self {
        Self(AtomicBool::new(initial))
    }

    pub fn load(&self) -> bool {
        self.0.load(ORD)
    }

    pub fn store(&self, value: bool) {
        self.0.store(value, ORD)
    }

    pub fn exchange(&self, value: bool) -> bool {
        self.0.swap(value, ORD)
    }

    pub fn compare_exchange(&self, expected: bool, desired: bool) -> bool {
        match self.0.compare_exchange(expected, desired, ORD, ORD) {
            Ok(prior) => prior,
            Err(prior) => prior,
        }
    }
}

/// A sequentially-consistent atomic pointer, realized over [`AtomicWord`]
/// by reinterpreting the address — the same technique the source's
/// `atomic_pointer_t<T>` uses over `atomic_u64_t`.
#[derive(Debug)]
pub struct AtomicPointer<T> {
    word: AtomicWord,
    _marker: PhantomData<*mut T>,
}

// SAFETY: `AtomicPointer<T>` only ever stores an address through the
// sequentially-consistent `AtomicWord`; it never dereferences `T` itself,
// so it is Send+Sync regardless of whether `T` is.
unsafe impl<T> Send for AtomicPointer<T> {}
unsafe impl<T> Sync for AtomicPointer<T> {}

impl<T> AtomicPointer<T> {
    pub fn new(initial: *mut T) -> Self {
        Self {
            word: AtomicWord::new(initial as u64),
            _marker: PhantomData,
        }
    }

    pub fn null() -> Self {
        Self::new(ptr::null_mut())
    }

    pub fn load(&self) -> *mut T {
        self.word.load() as *mut T
    }

    pub fn store(&self, value: *mut T) {
        self.word.store(value as u64)
    }

    pub fn exchange(&self, value: *mut T) -> *mut T {
        self.word.exchange(value as u64) as *mut T
    }

    pub fn compare_exchange(&self, expected: *mut T, desired: *mut T) -> *mut T {
        self.word.compare_exchange(expected as u64, desired as u64) as *mut T
    }
}

impl<T> Default for AtomicPointer<T> {
    fn default() -> Self {
        Self::null()
    }
}
