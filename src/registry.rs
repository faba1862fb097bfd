//! Slot registry and publication root.
//!
//! An append-only singly linked list of hazard slots. Slots are acquired by
//! CAS-ing one from `Free` to `Used` (or by growing the list at the head)
//! and recycled through the reclamation state machine, never deallocated
//! while the cell lives. The distinguished slot with id 0 is the
//! publication root: its `protected` pointer IS the cell's current payload.

use crate::alloc::PayloadAlloc;
use crate::reclaim::delete_scan;
use crate::slot::{HazardSlot, SlotState};
use core::hint::spin_loop;
use core::marker::PhantomData;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU64, Ordering};

// Soft cap on the number of slots; bounded by peak concurrency in practice
// since slots recycle. Configurable via cargo features:
//   petek = { features = ["max-slots-4096"] }
// Default: 1024.
#[cfg(feature = "max-slots-4096")]
pub(crate) const MAX_SLOTS: u64 = 4096;
#[cfg(all(feature = "max-slots-512", not(feature = "max-slots-4096")))]
pub(crate) const MAX_SLOTS: u64 = 512;
#[cfg(all(
    feature = "max-slots-256",
    not(any(feature = "max-slots-512", feature = "max-slots-4096"))
))]
pub(crate) const MAX_SLOTS: u64 = 256;
#[cfg(not(any(
    feature = "max-slots-256",
    feature = "max-slots-512",
    feature = "max-slots-4096"
)))]
pub(crate) const MAX_SLOTS: u64 = 1024;

// Scan factor: a release triggers a scan once
// n_used * SCAN_NUMER <= n_released * SCAN_DENOM, i.e. alpha = 0.3.
const SCAN_NUMER: u64 = 3;
const SCAN_DENOM: u64 = 10;

/// The registry: list head, publication root, growth switch, and the
/// amortisation counters.
///
/// Counters use relaxed ordering; they drive the scan heuristic only and
/// correctness never depends on their exactness.
pub(crate) struct SlotRegistry<T, A: PayloadAlloc> {
    head: AtomicPtr<HazardSlot<T>>,
    root: NonNull<HazardSlot<T>>,
    can_grow: AtomicBool,
    n_slots: AtomicU64,
    n_used: AtomicU64,
    n_released: AtomicU64,
    _alloc: PhantomData<A>,
}

impl<T, A: PayloadAlloc> SlotRegistry<T, A> {
    /// Builds a registry whose root slot (id 0) publishes `initial`.
    ///
    /// The root is permanently `Used`; it leaves that state only during
    /// cell destruction.
    pub(crate) fn new(initial: *mut T) -> Self {
        let root = Box::into_raw(Box::new(HazardSlot::new(0)));
        // Sole owner until `head` is published below; plain stores suffice.
        unsafe {
            (*root).protected.store(initial, Ordering::SeqCst);
            (*root).set_state(SlotState::Used);
        }
        Self {
            head: AtomicPtr::new(root),
            // SAFETY: Box::into_raw never returns null.
            root: unsafe { NonNull::new_unchecked(root) },
            can_grow: AtomicBool::new(true),
            n_slots: AtomicU64::new(1),
            n_used: AtomicU64::new(1),
            n_released: AtomicU64::new(0),
            _alloc: PhantomData,
        }
    }

    /// The publication root.
    #[inline]
    pub(crate) fn root(&self) -> &HazardSlot<T> {
        // SAFETY: the root slot is allocated in `new` and freed only in
        // Drop, which takes &mut self.
        unsafe { self.root.as_ref() }
    }

    /// The currently published payload.
    #[inline]
    pub(crate) fn publication(&self) -> *mut T {
        self.root().protected.load(Ordering::SeqCst)
    }

    /// Publication CAS: `expected -> new` on the root.
    ///
    /// Sequentially consistent so that a reader whose snapshot confirmation
    /// ordered before this CAS is guaranteed visible to any scan that runs
    /// after it.
    #[inline]
    pub(crate) fn try_publish(&self, expected: *mut T, new: *mut T) -> bool {
        self.root()
            .protected
            .compare_exchange(expected, new, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Installs the current publication into `slot`, closing the window
    /// between loading the root and the protection becoming visible.
    ///
    /// A plain load-then-store is not enough: the root may advance and the
    /// old target be retired between the two. The confirming CAS on the
    /// root proves the stored pointer still matched the root at an instant
    /// after the store, which is exactly the edge a concurrent scan needs
    /// to observe the protection in time.
    pub(crate) fn protect_publication(&self, slot: &HazardSlot<T>) -> *mut T {
        let root = self.root();
        loop {
            let ptr = root.protected.load(Ordering::SeqCst);
            slot.protected.store(ptr, Ordering::SeqCst);
            if root
                .protected
                .compare_exchange(ptr, ptr, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return ptr;
            }
        }
    }

    /// Acquires a slot in `Used` state with the current publication
    /// installed in it.
    ///
    /// Recycles a `Free` slot when one exists; otherwise grows the list at
    /// the head. When growth is disabled (teardown, or the soft cap was
    /// reached) this spins until some slot frees, which is the documented
    /// liveness hazard of teardown.
    pub(crate) fn acquire(&self) -> &HazardSlot<T> {
        loop {
            let mut cursor = self.head.load(Ordering::Acquire);
            while !cursor.is_null() {
                // SAFETY: slots are never freed while the registry lives.
                let slot = unsafe { &*cursor };
                if slot.transition(SlotState::Free, SlotState::Used) {
                    self.protect_publication(slot);
                    self.n_used.fetch_add(1, Ordering::Relaxed);
                    return slot;
                }
                cursor = slot.next.load(Ordering::Acquire);
            }
            if self.can_grow.load(Ordering::Acquire) {
                break;
            }
            spin_loop();
        }

        // No recyclable slot; append a fresh one at the head.
        let id = self.n_slots.fetch_add(1, Ordering::Relaxed);
        if id + 1 >= MAX_SLOTS {
            // Soft cap: this slot is still created, later acquirers spin.
            self.can_grow.store(false, Ordering::Release);
        }
        let slot = Box::into_raw(Box::new(HazardSlot::new(id)));
        // Not yet reachable; plain stamping is fine.
        unsafe { (*slot).set_state(SlotState::Used) };

        let mut head = self.head.load(Ordering::Acquire);
        loop {
            // SAFETY: we own `slot` until the CAS below publishes it.
            unsafe { (*slot).next.store(head, Ordering::Relaxed) };
            match self
                .head
                .compare_exchange_weak(head, slot, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => break,
                Err(observed) => head = observed,
            }
        }

        // SAFETY: published; from here on the slot lives as long as self.
        let slot = unsafe { &*slot };
        self.protect_publication(slot);
        self.n_used.fetch_add(1, Ordering::Relaxed);
        slot
    }

    /// Releases a `Used` slot back to the reclamation lifecycle and runs a
    /// scan when enough releases have piled up.
    pub(crate) fn release(&self, slot: &HazardSlot<T>) {
        if !slot.transition(SlotState::Used, SlotState::Released) {
            return;
        }
        let released = self.n_released.fetch_add(1, Ordering::Relaxed);
        let used = self.n_used.fetch_sub(1, Ordering::Relaxed);

        if used * SCAN_NUMER <= released * SCAN_DENOM {
            // Reset the release counter before scanning so concurrent
            // releases start accumulating towards the next scan.
            let mut observed = released;
            while let Err(now) =
                self.n_released
                    .compare_exchange_weak(observed, 0, Ordering::Relaxed, Ordering::Relaxed)
            {
                observed = now;
            }
            delete_scan::<T, A>(self);
        }
    }

    /// Blocks creation of new slots. Part of teardown.
    #[inline]
    pub(crate) fn disable_growth(&self) {
        self.can_grow.store(false, Ordering::Release);
    }

    /// Iterates every slot currently in the list.
    ///
    /// Slots inserted at the head after iteration begins are not visited;
    /// they protect at least the then-current publication, which is safe to
    /// skip in a scan.
    #[inline]
    pub(crate) fn iter(&self) -> SlotIter<'_, T> {
        SlotIter {
            cursor: self.head.load(Ordering::Acquire),
            _registry: PhantomData,
        }
    }

    #[cfg(test)]
    pub(crate) fn used_count(&self) -> u64 {
        self.n_used.load(Ordering::Relaxed)
    }

    #[cfg(test)]
    pub(crate) fn slot_count(&self) -> u64 {
        self.n_slots.load(Ordering::Relaxed)
    }
}

impl<T, A: PayloadAlloc> Drop for SlotRegistry<T, A> {
    /// Frees slot bookkeeping only. Payloads must already have been
    /// reclaimed by the owning cell's teardown scan.
    fn drop(&mut self) {
        let mut cursor = self.head.load(Ordering::Acquire);
        while !cursor.is_null() {
            // SAFETY: &mut self, no other reference to the list exists.
            let next = unsafe { (*cursor).next.load(Ordering::Acquire) };
            drop(unsafe { Box::from_raw(cursor) });
            cursor = next;
        }
    }
}

// SAFETY: all shared mutation goes through atomics; the raw slot pointers
// are owned by the registry and freed only with exclusive access.
unsafe impl<T: Send + Sync, A: PayloadAlloc> Send for SlotRegistry<T, A> {}
unsafe impl<T: Send + Sync, A: PayloadAlloc> Sync for SlotRegistry<T, A> {}

/// Iterator over the slot list at a fixed starting head.
pub(crate) struct SlotIter<'a, T> {
    cursor: *const HazardSlot<T>,
    _registry: PhantomData<&'a HazardSlot<T>>,
}

impl<'a, T> Iterator for SlotIter<'a, T> {
    type Item = &'a HazardSlot<T>;

    #[inline]
    fn next(&mut self) -> Option<&'a HazardSlot<T>> {
        if self.cursor.is_null() {
            return None;
        }
        // SAFETY: slots live as long as the registry borrowed by 'a.
        let slot = unsafe { &*self.cursor };
        self.cursor = slot.next.load(Ordering::Acquire);
        Some(slot)
    }
}
