//! Test-test-and-set spinlock.
//!
//! Guards the monitored allocator's live-allocation map. Not used anywhere
//! on the cell's lock-free paths.

use core::cell::UnsafeCell;
use core::hint::spin_loop;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};

/// A minimal TTAS spinlock around `data`.
pub(crate) struct TTas<T> {
    held: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for TTas<T> {}
unsafe impl<T: Send> Sync for TTas<T> {}

impl<T> TTas<T> {
    pub(crate) const fn new(data: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Spin until the lock is acquired.
    ///
    /// Read-only test phase first so the spin stays in cache; the swap only
    /// runs once the lock looks free.
    #[inline]
    pub(crate) fn lock(&self) -> TTasGuard<'_, T> {
        loop {
            while self.held.load(Ordering::Relaxed) {
                spin_loop();
            }
            if !self.held.swap(true, Ordering::Acquire) {
                return TTasGuard { lock: self };
            }
        }
    }
}

/// RAII guard, releases on drop.
pub(crate) struct TTasGuard<'a, T> {
    lock: &'a TTas<T>,
}

impl<T> Deref for TTasGuard<'_, T> {
    type Target = T;
    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for TTasGuard<'_, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for TTasGuard<'_, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}
