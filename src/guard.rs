//! Scoped reader and writer proxies.
//!
//! Both guards own one hazard slot for their whole scope and release it on
//! drop; the writer additionally owns a private candidate copy that it
//! tries to publish at scope exit. Destructor-on-all-paths is what makes
//! the protocol safe to expose: a proxy cannot leave its slot behind.

use crate::alloc::PayloadAlloc;
use crate::registry::SlotRegistry;
use crate::slot::HazardSlot;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::Ordering;

/// RAII read scope returned by
/// [`LockFreeCell::read_only`](crate::LockFreeCell::read_only).
///
/// Dereferences to the payload snapshot taken at acquisition. The snapshot
/// stays valid, and fixed, for the guard's lifetime: later publications are
/// simply not visible through it.
pub struct ReadGuard<'a, T, A: PayloadAlloc> {
    registry: &'a SlotRegistry<T, A>,
    slot: &'a HazardSlot<T>,
    object: *const T,
    // Slot release must happen on the owning scope; keep the guard !Send.
    _marker: PhantomData<*mut ()>,
}

impl<'a, T, A: PayloadAlloc> ReadGuard<'a, T, A> {
    pub(crate) fn acquire(registry: &'a SlotRegistry<T, A>) -> Self {
        let slot = registry.acquire();
        let object = slot.protected.load(Ordering::SeqCst);
        Self {
            registry,
            slot,
            object,
            _marker: PhantomData,
        }
    }

    /// The protected snapshot.
    #[inline]
    pub fn get(&self) -> &T {
        // SAFETY: `object` was installed into our Used slot by the snapshot
        // protocol; no payload is freed while a Used slot shadows it.
        unsafe { &*self.object }
    }
}

impl<T, A: PayloadAlloc> Deref for ReadGuard<'_, T, A> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T, A: PayloadAlloc> Drop for ReadGuard<'_, T, A> {
    #[inline]
    fn drop(&mut self) {
        self.registry.release(self.slot);
    }
}

impl<T: fmt::Debug, A: PayloadAlloc> fmt::Debug for ReadGuard<'_, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.get(), f)
    }
}

impl<T: fmt::Display, A: PayloadAlloc> fmt::Display for ReadGuard<'_, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self.get(), f)
    }
}

/// RAII write scope returned by
/// [`LockFreeCell::try_write`](crate::LockFreeCell::try_write).
///
/// Dereferences to a private candidate copy of the payload; mutations touch
/// only that copy. Publication is a single CAS attempted once, either by
/// [`commit`](WriteGuard::commit) or by the destructor. When the cell moved
/// on in the meantime the candidate is freed and the mutation is lost;
/// `commit` reports that outcome, plain drop does not. Use
/// [`LockFreeCell::invoke`](crate::LockFreeCell::invoke) for mutations that
/// must land.
pub struct WriteGuard<'a, T, A: PayloadAlloc> {
    registry: &'a SlotRegistry<T, A>,
    slot: &'a HazardSlot<T>,
    expected: *mut T,
    candidate: *mut T,
    published: bool,
    _marker: PhantomData<*mut ()>,
}

impl<'a, T: Clone, A: PayloadAlloc> WriteGuard<'a, T, A> {
    pub(crate) fn acquire(registry: &'a SlotRegistry<T, A>) -> Self {
        let slot = registry.acquire();
        let expected = slot.protected.load(Ordering::SeqCst);
        // SAFETY: `expected` is protected by our slot; published payloads
        // are never mutated, so a shared borrow for cloning is sound.
        let candidate = A::allocate(unsafe { (*expected).clone() });
        Self {
            registry,
            slot,
            expected,
            candidate,
            published: false,
            _marker: PhantomData,
        }
    }
}

impl<'a, T, A: PayloadAlloc> WriteGuard<'a, T, A> {
    /// The private candidate copy.
    #[inline]
    pub fn get(&self) -> &T {
        // SAFETY: the candidate is owned by this guard until publication,
        // and publication happens at most once, at scope end.
        unsafe { &*self.candidate }
    }

    /// Mutable access to the private candidate copy.
    #[inline]
    pub fn get_mut(&mut self) -> &mut T {
        // SAFETY: as in `get`; exclusive by &mut self.
        unsafe { &mut *self.candidate }
    }

    /// Attempts publication now and reports the outcome.
    ///
    /// `true` means the candidate became the cell's current payload.
    /// `false` means another publication won since this guard was opened;
    /// the candidate has been freed and the mutation did not land.
    pub fn commit(mut self) -> bool {
        self.publish()
        // Drop still runs here and releases the slot; it sees `published`
        // and does not attempt a second CAS.
    }

    fn publish(&mut self) -> bool {
        self.published = true;
        if self.registry.try_publish(self.expected, self.candidate) {
            // The displaced `expected` stays shadowed by our slot, which
            // enters the reclamation lifecycle on release.
            true
        } else {
            // Nothing else has seen the candidate; free it immediately.
            // SAFETY: allocated in `acquire`, never published, not freed
            // elsewhere.
            unsafe { A::free(self.candidate) };
            false
        }
    }
}

impl<T, A: PayloadAlloc> Deref for WriteGuard<'_, T, A> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        self.get()
    }
}

impl<T, A: PayloadAlloc> DerefMut for WriteGuard<'_, T, A> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        self.get_mut()
    }
}

impl<T, A: PayloadAlloc> Drop for WriteGuard<'_, T, A> {
    fn drop(&mut self) {
        if !self.published {
            self.publish();
        }
        self.registry.release(self.slot);
    }
}

impl<T: fmt::Debug, A: PayloadAlloc> fmt::Debug for WriteGuard<'_, T, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self.get(), f)
    }
}
