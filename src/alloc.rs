//! Payload allocation façade.
//!
//! The cell never owns payloads by value; every payload lives on the heap
//! behind a raw pointer handed out by a [`PayloadAlloc`] implementation.
//! The allocator is a static interface parameter of the cell type so the
//! choice is made at compile time and costs nothing at runtime:
//!
//! - [`DefaultAllocator`] goes straight to the global allocator.
//! - [`MonitoredAllocator`] additionally tracks every live allocation in a
//!   process-wide map, so tests can assert "no leak, no double free" as
//!   hard counters instead of hoping a sanitizer notices.

use crate::ttas::TTas;
use core::sync::atomic::{AtomicUsize, Ordering};
use foldhash::fast::FixedState;
use once_cell::race::OnceBox;
use std::collections::HashMap;

/// Typed allocation and deallocation of payload objects.
///
/// A static interface: implementations carry no per-instance state, the
/// cell selects one as a type parameter. Allocation has no failure mode
/// surfaced here; an out-of-memory condition aborts, as it does for `Box`.
pub trait PayloadAlloc {
    /// Moves `value` to the heap and returns the raw pointer.
    fn allocate<T>(value: T) -> *mut T;

    /// Destroys and deallocates a pointer previously returned by
    /// [`allocate`](PayloadAlloc::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must have come from `allocate::<T>` of the same implementation
    /// and must not be freed more than once. No reference to `*ptr` may
    /// outlive this call.
    unsafe fn free<T>(ptr: *mut T);
}

/// The system allocator, no bookkeeping.
pub struct DefaultAllocator;

impl PayloadAlloc for DefaultAllocator {
    #[inline]
    fn allocate<T>(value: T) -> *mut T {
        Box::into_raw(Box::new(value))
    }

    #[inline]
    unsafe fn free<T>(ptr: *mut T) {
        // SAFETY: caller guarantees ptr came from allocate::<T> and is
        // freed exactly once.
        drop(unsafe { Box::from_raw(ptr) });
    }
}

// ---------------------------------------------------------------------------
// MonitoredAllocator - diagnostics for tests
// ---------------------------------------------------------------------------

/// Process-wide monitor state: address -> outstanding count, plus an error
/// counter. Entries are kept after their count drops to zero so a repeated
/// free of the same address is classified as a double free rather than an
/// unknown address.
struct MonitorState {
    live: TTas<HashMap<usize, usize, FixedState>>,
    errors: AtomicUsize,
}

static MONITOR: OnceBox<MonitorState> = OnceBox::new();

#[inline]
fn monitor() -> &'static MonitorState {
    MONITOR.get_or_init(|| {
        Box::new(MonitorState {
            live: TTas::new(HashMap::with_hasher(FixedState::default())),
            errors: AtomicUsize::new(0),
        })
    })
}

/// An instrumented allocator for validating reclamation.
///
/// Tracks every outstanding allocation in a process-wide table and counts
/// faults instead of crashing on them:
///
/// - free of an address it never allocated,
/// - free of an address whose outstanding count is already zero (double
///   free).
///
/// A leak shows up as [`outstanding()`](MonitoredAllocator::outstanding)
/// staying above zero once every cell and proxy is gone. Any nonzero
/// [`errors()`](MonitoredAllocator::errors) is a test failure.
///
/// The monitor state is process-wide by design (it mirrors what a heap
/// checker sees); tests that assert exact counts serialize against it and
/// call [`reset()`](MonitoredAllocator::reset) first.
pub struct MonitoredAllocator;

impl PayloadAlloc for MonitoredAllocator {
    fn allocate<T>(value: T) -> *mut T {
        let ptr = Box::into_raw(Box::new(value));
        let mut live = monitor().live.lock();
        *live.entry(ptr as usize).or_insert(0) += 1;
        ptr
    }

    unsafe fn free<T>(ptr: *mut T) {
        let state = monitor();
        {
            let mut live = state.live.lock();
            match live.get_mut(&(ptr as usize)) {
                Some(count) if *count > 0 => *count -= 1,
                // Unknown address or count already zero. Record the fault
                // and leave the pointer alone; freeing it anyway would turn
                // a detectable bug into memory corruption.
                _ => {
                    state.errors.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }
        // Drop outside the map lock: T's destructor may allocate.
        // SAFETY: the map confirmed this address is outstanding, and the
        // caller guarantees it came from allocate::<T>.
        drop(unsafe { Box::from_raw(ptr) });
    }
}

impl MonitoredAllocator {
    /// Number of allocations not yet freed.
    pub fn outstanding() -> usize {
        monitor().live.lock().values().sum()
    }

    /// Number of faults observed (unknown-address frees and double frees).
    pub fn errors() -> usize {
        monitor().errors.load(Ordering::Relaxed)
    }

    /// Clears the monitor. For use between independent tests sharing the
    /// process-wide state.
    pub fn reset() {
        let state = monitor();
        state.live.lock().clear();
        state.errors.store(0, Ordering::Relaxed);
    }

    /// Prints every outstanding allocation to stderr.
    pub fn dump() {
        let live = monitor().live.lock();
        eprintln!("MonitoredAllocator: {} outstanding", live.values().sum::<usize>());
        for (addr, count) in live.iter().filter(|(_, c)| **c > 0) {
            eprintln!("  {:#x} x{}", addr, count);
        }
    }
}
