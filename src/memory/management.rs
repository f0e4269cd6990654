//! Pluggable heap management: global mapped-byte accounting under a cap,
//! and the `Algorithm`/`Allocator` plug-in contract that vends opaque
//! value-pointers.
//!
//! Grounded in `fabric/src/memory/management.hpp`/`.cpp` (`Management`,
//! `Algorithm`, `Allocator`, `Pointer`, `HeapMapRequest`). The original's
//! virtual-dispatch plug-in interface becomes a pair of capability traits
//! (§9 design note); a container holds `Box<dyn Algorithm>`, no RTTI.

use std::any::Any;
use std::marker::PhantomData;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::atomics::AtomicWord;
use crate::error::{FabricError, Result};
use crate::platform;

/// Opaque value-pointer vended by an [`Algorithm`]. `payload` is an
/// algorithm-private handle — here, an index into the installed
/// algorithm's own table, never a raw address — so no stable address is
/// guaranteed between `acquire` calls, satisfying the "moving collector
/// permitted" requirement structurally rather than by convention.
#[derive(Debug, Clone, Copy)]
pub struct ManagedPointer {
    pub size: u32,
    payload: u64,
}

impl ManagedPointer {
    fn new(size: u32, payload: u64) -> Self {
        ManagedPointer { size, payload }
    }
}

/// A mediated, non-owning view of an acquired [`ManagedPointer`]'s
/// current backing bytes. Valid only between the `acquire` call that
/// produced it and the matching `release`.
pub struct AcquiredRef<'a> {
    pub address: NonNull<u8>,
    pub size: u32,
    _marker: PhantomData<&'a ()>,
}

/// Algorithm-private state installed by [`Algorithm::initialize`] and
/// torn down by [`Algorithm::terminate`]. No implicit mutable state may
/// live anywhere else (§4.D contract).
pub trait AlgoState: Send + Sync {
    fn as_any(&self) -> &dyn Any;
}

/// Swappable memory-management back end. Exactly one `Algorithm` is
/// installed per [`HeapManagement`], never replaced.
pub trait Algorithm: Send + Sync {
    fn name(&self) -> &'static str;
    fn max_supported_heap_size(&self) -> u64;
    fn initialize(&self, mgmt: &Arc<HeapManagement>) -> Result<Box<dyn AlgoState>>;
    fn terminate(&self, state: Box<dyn AlgoState>);
    fn create_allocator(&self, mgmt: &Arc<HeapManagement>) -> Result<Box<dyn AllocatorHandle>>;
}

/// Per-thread allocator handle bound to one [`HeapManagement`]. Created by
/// the algorithm, owned by the management, destroyed with it.
pub trait AllocatorHandle: Send + Sync {
    fn allocate(&self, size: u32) -> Result<ManagedPointer>;
    /// Mark `ptr` reusable without freeing it.
    fn reserve(&self, ptr: &ManagedPointer) -> Result<()>;
    /// Grant read (shared) or read-write (exclusive) access, pinning
    /// against relocation if a collector exists. Exclusive acquire must
    /// strictly lock; non-exclusive is advisory and the algorithm may
    /// upgrade it.
    fn acquire(&self, ptr: &ManagedPointer, exclusive: bool) -> Result<AcquiredRef<'_>>;
    fn release(&self, ptr: &ManagedPointer);
}

/// Global mapped-byte accounting under a cap, plus the installed
/// [`Algorithm`]. Grounded in `Management` (`MAX_HEAP_SIZE`,
/// `mapped_heap_size`, `heap_map`).
pub struct HeapManagement {
    /// Rounded up to a whole number of host pages at construction.
    pub max_heap_size: u64,
    mapped_bytes: AtomicWord,
    algorithm: Box<dyn Algorithm>,
    algo_state: Mutex<Option<Box<dyn AlgoState>>>,
}

impl HeapManagement {
    /// Rounds `max_heap_size` up to a whole page, rejects with
    /// `InvalidHeapSize` if the algorithm's ceiling is lower, then calls
    /// `algorithm.initialize` and propagates its failure as
    /// `AlgorithmInit` — no partial teardown needed, `Box` drop handles
    /// it for us on the `Err` path.
    pub fn new(algorithm: Box<dyn Algorithm>, max_heap_size: u64) -> Result<Arc<Self>> {
        let max_heap_size = platform::page_align(max_heap_size);
        let supported = algorithm.max_supported_heap_size();
        if supported < max_heap_size {
            return Err(FabricError::InvalidHeapSize {
                requested: max_heap_size,
                supported,
            });
        }

        tracing::debug!(
            algorithm = algorithm.name(),
            max_heap_size,
            "installing heap algorithm"
        );

        let mgmt = Arc::new(HeapManagement {
            max_heap_size,
            mapped_bytes: AtomicWord::new(0),
            algorithm,
            algo_state: Mutex::new(None),
        });

        let state = mgmt
            .algorithm
            .initialize(&mgmt)
            .map_err(|e| FabricError::AlgorithmInit(e.to_string()))?;
        *mgmt.algo_state.lock() = Some(state);

        Ok(mgmt)
    }

    /// Currently mapped byte count.
    pub fn mapped_bytes(&self) -> u64 {
        self.mapped_bytes.load()
    }

    /// Map `size` host-page-backed bytes under the heap cap.
    ///
    /// Deliberately reproduces the source's documented bug (§9 open
    /// question 1): `mapped_bytes` is incremented *before* the cap check,
    /// and a rejected map's increment is **not** rolled back, so repeated
    /// overflowing calls permanently consume budget from subsequent maps.
    /// This is intentional — see `DESIGN.md` — not a defect in this port.
    pub fn heap_map(&self, size: u64) -> Result<NonNull<u8>> {
        let updated = self.mapped_bytes.fetch_add(size) + size;
        if updated > self.max_heap_size {
            tracing::warn!(
                requested = size,
                cap = self.max_heap_size,
                mapped = updated,
                "heap overflow: map rejected, budget not rolled back"
            );
            return Err(FabricError::HeapOverflow {
                requested: size,
                cap: self.max_heap_size,
            });
        }
        // `platform::map`'s only error kind is `HostOutOfMemory`; an
        // exhaustive Rust `match` inside it means the OS-error mapping
        // cannot silently fall through to the wrong variant the way the
        // source's un-`break`ed `switch` can (§9 open question 2).
        platform::map(size as usize)
    }

    /// Delegate allocator creation to the installed algorithm.
    pub fn create_allocator(self_arc: &Arc<Self>) -> Result<Box<dyn AllocatorHandle>> {
        self_arc.algorithm.create_allocator(self_arc)
    }

    pub(crate) fn algo_state(&self) -> &Mutex<Option<Box<dyn AlgoState>>> {
        &self.algo_state
    }
}

impl Drop for HeapManagement {
    fn drop(&mut self) {
        if let Some(state) = self.algo_state.lock().take() {
            self.algorithm.terminate(state);
        }
    }
}

/// A reference, never-reclaiming bump allocator `Algorithm`: each
/// `allocate` maps a fresh host region via `HeapManagement::heap_map` and
/// records its address in an algorithm-private table, indexed by
/// `ManagedPointer::payload`. Provided so `Runtime`/`main.rs` are
/// exercisable without a real garbage-collecting algorithm, which is
/// explicitly out of scope (§1) — not a production allocator.
#[derive(Default)]
pub struct BumpAlgorithm;

struct Slot {
    address: usize,
    size: u32,
    locked: AtomicBool,
}

struct BumpState {
    table: Mutex<Vec<Slot>>,
    free_list: Mutex<Vec<u64>>,
}

impl AlgoState for BumpState {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Algorithm for BumpAlgorithm {
    fn name(&self) -> &'static str {
        "bump"
    }

    fn max_supported_heap_size(&self) -> u64 {
        u64::MAX
    }

    fn initialize(&self, _mgmt: &Arc<HeapManagement>) -> Result<Box<dyn AlgoState>> {
        Ok(Box::new(BumpState {
            table: Mutex::new(Vec::new()),
            free_list: Mutex::new(Vec::new()),
        }))
    }

    fn terminate(&self, _state: Box<dyn AlgoState>) {}

    fn create_allocator(&self, mgmt: &Arc<HeapManagement>) -> Result<Box<dyn AllocatorHandle>> {
        Ok(Box::new(BumpAllocatorHandle {
            mgmt: Arc::clone(mgmt),
        }))
    }
}

struct BumpAllocatorHandle {
    mgmt: Arc<HeapManagement>,
}

impl BumpAllocatorHandle {
    fn with_state<R>(&self, f: impl FnOnce(&BumpState) -> R) -> R {
        let guard = self.mgmt.algo_state().lock();
        let state = guard
            .as_ref()
            .expect("HeapManagement::new always installs algo_state before vending allocators")
            .as_any()
            .downcast_ref::<BumpState>()
            .expect("BumpAllocatorHandle is only created against a BumpAlgorithm's own state");
        f(state)
    }
}

impl AllocatorHandle for BumpAllocatorHandle {
    fn allocate(&self, size: u32) -> Result<ManagedPointer> {
        self.with_state(|state| {
            if let Some(idx) = state.free_list.lock().pop() {
                let mut table = state.table.lock();
                let slot = &mut table[idx as usize];
                if slot.size >= size {
                    slot.size = size;
                    return Ok(ManagedPointer::new(size, idx));
                }
                // Too small to reuse; fall through to a fresh mapping and
                // leave the freed slot's index dropped (demo allocator,
                // no compaction).
            }

            let addr = self.mgmt.heap_map(size as u64)?;
            let mut table = state.table.lock();
            let idx = table.len() as u64;
            table.push(Slot {
                address: addr.as_ptr() as usize,
                size,
                locked: AtomicBool::new(false),
            });
            Ok(ManagedPointer::new(size, idx))
        })
    }

    fn reserve(&self, ptr: &ManagedPointer) -> Result<()> {
        self.with_state(|state| {
            state.free_list.lock().push(ptr.payload);
            Ok(())
        })
    }

    fn acquire(&self, ptr: &ManagedPointer, exclusive: bool) -> Result<AcquiredRef<'_>> {
        self.with_state(|state| {
            let table = state.table.lock();
            let slot = &table[ptr.payload as usize];
            if exclusive {
                while slot
                    .locked
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_err()
                {
                    std::thread::yield_now();
                }
            }
            let address = NonNull::new(slot.address as *mut u8)
                .expect("a mapped slot's address is never null");
            Ok(AcquiredRef {
                address,
                size: slot.size,
                _marker: PhantomData,
            })
        })
    }

    fn release(&self, ptr: &ManagedPointer) {
        self.with_state(|state| {
            let table = state.table.lock();
            if let Some(slot) = table.get(ptr.payload as usize) {
                slot.locked.store(false, Ordering::SeqCst);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heap_cap_rejects_overflow_without_mapping() {
        let page = platform::page_size() as u64;
        let mgmt = HeapManagement::new(Box::<BumpAlgorithm>::default(), page * 4).unwrap();
        assert_eq!(mgmt.max_heap_size, page * 4);

        for _ in 0..4 {
            mgmt.heap_map(page).unwrap();
        }
        assert_eq!(mgmt.mapped_bytes(), page * 4);

        let err = mgmt.heap_map(page).unwrap_err();
        assert!(matches!(err, FabricError::HeapOverflow { .. }));
        // Budget is not rolled back: even a single byte request now
        // overflows too, matching the documented source bug.
        assert!(mgmt.heap_map(1).is_err());
    }

    #[test]
    fn invalid_heap_size_rejected_before_initialize() {
        struct TinyAlgorithm;
        impl Algorithm for TinyAlgorithm {
            fn name(&self) -> &'static str {
                "tiny"
            }
            fn max_supported_heap_size(&self) -> u64 {
                1024
            }
            fn initialize(&self, _mgmt: &Arc<HeapManagement>) -> Result<Box<dyn AlgoState>> {
                unreachable!("must be rejected before initialize is called")
            }
            fn terminate(&self, _state: Box<dyn AlgoState>) {}
            fn create_allocator(
                &self,
                _mgmt: &Arc<HeapManagement>,
            ) -> Result<Box<dyn AllocatorHandle>> {
                unreachable!()
            }
        }

        let err = HeapManagement::new(Box::new(TinyAlgorithm), 1024 * 1024).unwrap_err();
        assert!(matches!(err, FabricError::InvalidHeapSize { .. }));
    }

    #[test]
    fn allocator_allocate_acquire_release_reserve_roundtrip() {
        let mgmt = HeapManagement::new(Box::<BumpAlgorithm>::default(), 1024 * 1024).unwrap();
        let allocator = HeapManagement::create_allocator(&mgmt).unwrap();

        let ptr = allocator.allocate(64).unwrap();
        assert_eq!(ptr.size, 64);

        let acquired = allocator.acquire(&ptr, true).unwrap();
        assert_eq!(acquired.size, 64);
        allocator.release(&ptr);

        allocator.reserve(&ptr).unwrap();
        let reused = allocator.allocate(32).unwrap();
        assert_eq!(reused.payload, ptr.payload);
    }
}
