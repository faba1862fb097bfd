//! Reclamation scans.
//!
//! A scan walks the registry in phases: census, promotion, deduplication,
//! then the physical free. Phases 1-3 are data-race free because every
//! transition is a CAS on one slot's state; contention between concurrent
//! scans reduces to "someone else already did this step". Phase 4 is the
//! single point of deallocation, guarded per slot by a test-and-set latch
//! so two scans can never free the same payload twice.

use crate::alloc::PayloadAlloc;
use crate::registry::SlotRegistry;
use crate::slot::{HazardSlot, SlotState};
use core::sync::atomic::Ordering;
use foldhash::fast::FixedState;
use std::collections::{HashMap, HashSet};

type PtrSet = HashSet<usize, FixedState>;

/// Runs one full reclamation pass over the registry.
///
/// Safe to run concurrently with readers, writers, and other scans. A scan
/// observing a slot already in `DeleteCandidate` is seeing the residue of
/// an interrupted earlier pass; such a slot is treated as deletable here,
/// since skipping it would leak its payload.
pub(crate) fn delete_scan<T, A: PayloadAlloc>(registry: &SlotRegistry<T, A>) {
    // Phase 1: census. One traversal, classifying slots by the state seen
    // at that instant. A stale classification is harmless: a slot that
    // became Released after we saw it Used just waits for the next scan.
    // ReadyToDelete slots already have a unique deleter; their pointers are
    // recorded so this scan never elects a second one.
    let mut used_set = PtrSet::with_hasher(FixedState::default());
    let mut claimed: HashMap<usize, &HazardSlot<T>, FixedState> =
        HashMap::with_hasher(FixedState::default());
    let mut candidates = Vec::new();
    for slot in registry.iter() {
        match slot.state() {
            SlotState::Used => {
                used_set.insert(slot.protected.load(Ordering::SeqCst) as usize);
            }
            SlotState::Released | SlotState::DeleteCandidate => candidates.push(slot),
            SlotState::ReadyToDelete => {
                claimed.insert(slot.protected.load(Ordering::SeqCst) as usize, slot);
            }
            SlotState::Free => {}
        }
    }

    // Phase 2: promotion. A candidate whose pointer is shadowed by no Used
    // slot may move towards deletion. The slot stays in `deletable` whether
    // our CAS won or an earlier scan already promoted it; phase 3 CASes
    // tolerate both, and a slot that meanwhile left the lifecycle entirely
    // simply fails every later CAS.
    let mut deletable = Vec::new();
    for slot in candidates {
        let ptr = slot.protected.load(Ordering::SeqCst) as usize;
        if !used_set.contains(&ptr) {
            slot.transition(SlotState::Released, SlotState::DeleteCandidate);
            deletable.push(slot);
        }
    }

    // Phase 3: deduplication. Several slots may shadow the same retired
    // payload; exactly one per distinct pointer may own its deletion.
    let mut seen = PtrSet::with_hasher(FixedState::default());
    for slot in deletable {
        let ptr = slot.protected.load(Ordering::SeqCst) as usize;
        if seen.contains(&ptr) {
            slot.transition(SlotState::DeleteCandidate, SlotState::Free);
            continue;
        }
        if let Some(owner) = claimed.get(&ptr) {
            // A deleter elected before this scan began. Demote the
            // duplicate only while that claim is demonstrably still in
            // force; a stale claim means the world moved under us, and the
            // slot is left for a later scan to re-evaluate.
            if owner.state() == SlotState::ReadyToDelete
                && owner.protected.load(Ordering::SeqCst) as usize == ptr
            {
                slot.transition(SlotState::DeleteCandidate, SlotState::Free);
            }
            continue;
        }
        if slot.transition(SlotState::DeleteCandidate, SlotState::ReadyToDelete) {
            seen.insert(ptr);
        } else if slot.state() == SlotState::ReadyToDelete {
            // A concurrent scan won the election for this slot; its pointer
            // is owned all the same.
            seen.insert(ptr);
        }
    }

    // Phase 4: physical free. Walk the whole registry rather than the local
    // `deletable` list so that ReadyToDelete slots left behind by a stalled
    // scan are picked up as well.
    for slot in registry.iter() {
        if slot.state() != SlotState::ReadyToDelete {
            continue;
        }
        if slot.reclaim_latch.swap(true, Ordering::AcqRel) {
            // Another thread owns this deletion.
            continue;
        }
        // Re-check under the latch: between our state load and the latch
        // acquisition another thread may have completed the free and
        // recycled the slot.
        if slot.state() == SlotState::ReadyToDelete {
            let ptr = slot.protected.load(Ordering::SeqCst);
            // A slot recycled mid-scan can carry a pointer back into the
            // lifecycle while a Used slot (the root included) still shadows
            // it. Freeing is legal only when no such protector exists; a
            // new one cannot appear afterwards, since only the current
            // publication is ever installed into a Used slot and a retired
            // address cannot become current again before it is freed.
            let protected_elsewhere = registry.iter().any(|other| {
                !core::ptr::eq(other, slot)
                    && other.state() == SlotState::Used
                    && other.protected.load(Ordering::SeqCst) == ptr
            });
            if protected_elsewhere {
                slot.transition(SlotState::ReadyToDelete, SlotState::Released);
            } else {
                // SAFETY: this slot won the unique-deleter election for
                // `ptr`, no Used slot shadows it, and the latch excludes
                // every other reclaimer. The pointer was produced by
                // A::allocate on the write path.
                unsafe { A::free(ptr) };
                slot.protected.store(core::ptr::null_mut(), Ordering::SeqCst);
                slot.transition(SlotState::ReadyToDelete, SlotState::Free);
            }
        }
        slot.reclaim_latch.store(false, Ordering::Release);
    }
}
