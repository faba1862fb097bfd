//! Hazard slots and their reclamation state machine.
//!
//! A slot is a reusable protection record: while it is `Used` and holds a
//! payload pointer, that payload will not be freed. Released slots carry
//! their last protected pointer through the reclamation lifecycle until
//! exactly one slot per distinct payload performs the physical free.
//!
//! State machine:
//!
//! ```text
//!              acquire
//!        FREE ---------> USED
//!         ^                | release
//!         |                v
//!  ready->free         RELEASED
//!         |                | scan saw no USED holder of the same ptr
//!         |                v
//!         |         DELETE_CANDIDATE
//!         |                | won the unique-deleter CAS
//!         |                v
//!         +-------- READY_TO_DELETE
//!                   (latch, free payload, back to FREE)
//! ```

use core::sync::atomic::{AtomicBool, AtomicPtr, AtomicU32, Ordering};

/// Lifecycle state of a hazard slot.
///
/// All transitions are single CAS operations on the slot's `state` word;
/// see the module docs for the legal edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub(crate) enum SlotState {
    /// Available for acquisition; `protected` is meaningless.
    Free = 0,
    /// Held by a reader, writer, or the publication root.
    Used = 1,
    /// Released by its holder; its pointer still awaits reclamation.
    Released = 2,
    /// A scan found no `Used` holder of the same pointer.
    DeleteCandidate = 3,
    /// This slot is the unique deleter for its pointer.
    ReadyToDelete = 4,
}

impl SlotState {
    #[inline]
    fn from_u32(raw: u32) -> Self {
        match raw {
            0 => SlotState::Free,
            1 => SlotState::Used,
            2 => SlotState::Released,
            3 => SlotState::DeleteCandidate,
            4 => SlotState::ReadyToDelete,
            _ => unreachable!("corrupt slot state {raw}"),
        }
    }
}

/// One protection record in the registry.
///
/// Slots are created on demand, linked at the registry head, and never
/// deallocated until the owning cell is dropped; they are recycled through
/// state transitions instead. Keeping dead slots around sidesteps ABA on
/// slot addresses entirely.
pub(crate) struct HazardSlot<T> {
    /// The payload this slot shadows. Meaningful in every state except
    /// `Free`. Written only by the slot's holder (while `Used`) and by the
    /// reclaiming thread (under `reclaim_latch`).
    pub(crate) protected: AtomicPtr<T>,

    /// Current [`SlotState`], as its `u32` repr.
    state: AtomicU32,

    /// Next slot in the registry list. Written before the slot is published
    /// at the head, never reassigned afterwards.
    pub(crate) next: AtomicPtr<HazardSlot<T>>,

    /// Held by the one thread physically freeing this slot's payload.
    pub(crate) reclaim_latch: AtomicBool,

    /// Stable identifier, diagnostics only. Slot 0 is the publication root.
    pub(crate) id: u64,
}

impl<T> HazardSlot<T> {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            protected: AtomicPtr::new(core::ptr::null_mut()),
            state: AtomicU32::new(SlotState::Free as u32),
            next: AtomicPtr::new(core::ptr::null_mut()),
            reclaim_latch: AtomicBool::new(false),
            id,
        }
    }

    #[inline]
    pub(crate) fn state(&self) -> SlotState {
        SlotState::from_u32(self.state.load(Ordering::Acquire))
    }

    /// Unconditional state store. Only for paths where the caller is the
    /// sole writer (initial stamping of a fresh slot, teardown).
    #[inline]
    pub(crate) fn set_state(&self, state: SlotState) {
        self.state.store(state as u32, Ordering::Release);
    }

    /// Attempts the state edge `from -> to`. Returns whether this call
    /// performed the transition.
    ///
    /// Contention between scans reduces to "someone else already did this
    /// step": a failed transition never needs a retry, the loser simply
    /// observes that the slot moved on.
    #[inline]
    pub(crate) fn transition(&self, from: SlotState, to: SlotState) -> bool {
        self.state
            .compare_exchange(from as u32, to as u32, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl<T> core::fmt::Debug for HazardSlot<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("HazardSlot")
            .field("id", &self.id)
            .field("ptr", &self.protected.load(Ordering::Acquire))
            .field("state", &self.state())
            .finish()
    }
}

// SAFETY: a slot is nothing but atomics plus an immutable id; all cross-
// thread access goes through atomic operations.
unsafe impl<T: Send + Sync> Send for HazardSlot<T> {}
unsafe impl<T: Send + Sync> Sync for HazardSlot<T> {}
