//! Petek: a lock-free copy-on-write cell with hazard-slot memory reclamation.
//!
//! `LockFreeCell<T>` wraps a single logical value that many threads read
//! often and update seldom. Reads take a protected snapshot without mutual
//! exclusion; writes publish a freshly allocated replacement with one
//! compare-and-swap on the publication root. Displaced payloads are
//! reclaimed by a hazard-slot scheme that frees each retired object exactly
//! once, under any interleaving, without assuming any particular thread
//! stays alive to finish a reclamation pass.
//!
//! # Key Properties
//!
//! - **Snapshot reads**: a reader sees one fixed payload for its whole scope
//! - **Copy-on-write publication**: writers never touch the live payload
//! - **Lock-free progress**: no mutexes anywhere on the read or write path
//! - **Exactly-once reclamation**: no double free, no leak, verified by an
//!   instrumented allocator in the test suite
//!
//! # Example
//!
//! ```rust
//! use petek::{DefaultAllocator, LockFreeCell};
//!
//! let cell: LockFreeCell<_, DefaultAllocator> = LockFreeCell::new(0i64);
//!
//! // Readers hold a snapshot
//! let reader = cell.read_only();
//! assert_eq!(*reader, 0);
//!
//! // A read-modify-write publishes a new payload; the reader's snapshot
//! // is unaffected
//! cell.invoke(|v| *v += 7);
//! assert_eq!(*reader, 0);
//! drop(reader);
//!
//! assert_eq!(*cell.read_only(), 7);
//! ```

#![warn(missing_docs)]

mod alloc;
mod cell;
mod guard;
mod reclaim;
mod registry;
mod slot;
mod ttas;

pub use alloc::{DefaultAllocator, MonitoredAllocator, PayloadAlloc};
pub use cell::LockFreeCell;
pub use guard::{ReadGuard, WriteGuard};
