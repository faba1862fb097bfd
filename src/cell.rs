//! `LockFreeCell<T>` - the copy-on-write cell.

use crate::alloc::{DefaultAllocator, PayloadAlloc};
use crate::guard::{ReadGuard, WriteGuard};
use crate::reclaim::delete_scan;
use crate::registry::SlotRegistry;
use crate::slot::SlotState;
use core::fmt;
use core::sync::atomic::Ordering;

/// A concurrent copy-on-write cell: read often, update seldom, no mutual
/// exclusion on the read path.
///
/// Readers take a hazard-slot-protected snapshot of the published payload
/// and dereference it freely for the scope of their guard. Writers mutate a
/// freshly allocated private copy and publish it with one CAS on the root;
/// displaced payloads are reclaimed by amortised scans once no slot shadows
/// them. The design is lock-free but not wait-free: a stalled reclaimer can
/// delay frees, never corrupt them.
///
/// Published payloads are immutable; they need no internal synchronisation.
///
/// # Examples
///
/// ```rust
/// use petek::{DefaultAllocator, LockFreeCell};
///
/// let cell: LockFreeCell<_, DefaultAllocator> = LockFreeCell::new(41u64);
///
/// // Snapshot read
/// let reader = cell.read_only();
/// assert_eq!(*reader, 41);
/// drop(reader);
///
/// // Read-modify-write that always lands
/// let result = cell.invoke(|v| {
///     *v += 1;
///     *v
/// });
/// assert_eq!(result, 42);
/// assert_eq!(*cell.read_only(), 42);
/// ```
///
/// # Dropping
///
/// Destruction assumes no reader or writer scope is still live; drain all
/// guards before dropping the cell. A proxy outliving its cell is undefined
/// behaviour (documented precondition, not enforced).
pub struct LockFreeCell<T, A: PayloadAlloc = DefaultAllocator> {
    registry: SlotRegistry<T, A>,
}

impl<T, A: PayloadAlloc> LockFreeCell<T, A> {
    /// Creates a cell whose first published payload is `value`.
    pub fn new(value: T) -> Self {
        let initial = A::allocate(value);
        Self {
            registry: SlotRegistry::new(initial),
        }
    }

    /// Opens a read scope on the current payload.
    ///
    /// The returned guard dereferences to a fixed snapshot: publications
    /// that happen while the guard lives are not visible through it, and
    /// the snapshot is guaranteed not to be freed until the guard drops.
    pub fn read_only(&self) -> ReadGuard<'_, T, A> {
        ReadGuard::acquire(&self.registry)
    }

    /// Opens a write scope on a private copy of the current payload.
    ///
    /// Mutations through the guard touch only the copy. Publication is
    /// attempted once, at [`commit`](WriteGuard::commit) or on drop; if a
    /// concurrent publication won in the meantime the copy is discarded.
    /// Dropping the guard loses that outcome, `commit` reports it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use petek::{DefaultAllocator, LockFreeCell};
    ///
    /// let cell: LockFreeCell<_, DefaultAllocator> = LockFreeCell::new(1u32);
    /// let mut writer = cell.try_write();
    /// *writer += 10;
    /// assert!(writer.commit());
    /// assert_eq!(*cell.read_only(), 11);
    /// ```
    pub fn try_write(&self) -> WriteGuard<'_, T, A>
    where
        T: Clone,
    {
        WriteGuard::acquire(&self.registry)
    }

    /// Read-modify-write that retries until it publishes.
    ///
    /// Each attempt runs `f` on a fresh private copy of the then-current
    /// payload and tries to publish the copy; on CAS failure the copy is
    /// freed, the protection re-snapshotted, and `f` runs again. Returns
    /// `f`'s result from the winning attempt.
    ///
    /// `f` may run many times under contention; keep it cheap and free of
    /// side effects beyond the copy it is given.
    pub fn invoke<F, R>(&self, mut f: F) -> R
    where
        T: Clone,
        F: FnMut(&mut T) -> R,
    {
        let slot = self.registry.acquire();
        let mut expected = slot.protected.load(Ordering::SeqCst);
        loop {
            // SAFETY: `expected` is protected by our slot; published
            // payloads are never mutated, so cloning through &T is sound.
            let candidate = A::allocate(unsafe { (*expected).clone() });
            // SAFETY: the candidate is private to this attempt.
            let result = f(unsafe { &mut *candidate });

            if self.registry.try_publish(expected, candidate) {
                // Our slot keeps shadowing the displaced payload; releasing
                // it hands that payload to the reclamation lifecycle.
                self.registry.release(slot);
                return result;
            }

            // Lost the race; nothing else has seen the candidate.
            // SAFETY: allocated above, never published.
            unsafe { A::free(candidate) };
            expected = self.registry.protect_publication(slot);
        }
    }

    /// Publishes an externally allocated payload over whatever is current.
    ///
    /// Returns whether the CAS succeeded. The displaced payload enters the
    /// reclamation lifecycle through the slot acquired here; no ABA hazard
    /// exists because a payload's address cannot be recycled while any slot
    /// still shadows it.
    ///
    /// # Safety
    ///
    /// `new` must come from `A::allocate` and must not be published or
    /// freed elsewhere. On failure ownership of `new` stays with the
    /// caller.
    pub unsafe fn update(&self, new: *mut T) -> bool {
        let slot = self.registry.acquire();
        let expected = slot.protected.load(Ordering::SeqCst);
        let swapped = self.registry.try_publish(expected, new);
        self.registry.release(slot);
        swapped
    }

    /// Publishes `new` only if `expected` is still current.
    ///
    /// The bare CAS variant; `invoke` is built on it.
    ///
    /// # Safety
    ///
    /// As [`update`](LockFreeCell::update), and additionally the caller
    /// must hold a live reader or writer scope protecting `expected`,
    /// otherwise the displaced payload leaks or races reclamation.
    pub unsafe fn update_from(&self, expected: *mut T, new: *mut T) -> bool {
        self.registry.try_publish(expected, new)
    }

    /// The currently published payload pointer, for diagnostics.
    ///
    /// Only valid for dereference while the caller holds an enclosing
    /// reader or writer scope.
    pub fn current(&self) -> *mut T {
        self.registry.publication()
    }
}

impl<T, A: PayloadAlloc> Drop for LockFreeCell<T, A> {
    /// Teardown: block slot creation, release every `Used` slot including
    /// the publication root, run one final scan. With no `Used` slot left,
    /// the scan frees every remaining payload, the current one included.
    /// Slot bookkeeping is freed by the registry afterwards.
    fn drop(&mut self) {
        self.registry.disable_growth();
        for slot in self.registry.iter() {
            if slot.state() == SlotState::Used {
                slot.set_state(SlotState::Released);
            }
        }
        delete_scan::<T, A>(&self.registry);
    }
}

impl<T: fmt::Debug, A: PayloadAlloc> fmt::Debug for LockFreeCell<T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockFreeCell")
            .field("value", &*self.read_only())
            .finish()
    }
}

// SAFETY: the registry is the only state; it synchronises all shared
// mutation through atomics, and payloads are immutable once published.
unsafe impl<T: Send + Sync, A: PayloadAlloc> Send for LockFreeCell<T, A> {}
unsafe impl<T: Send + Sync, A: PayloadAlloc> Sync for LockFreeCell<T, A> {}
