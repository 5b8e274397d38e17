//! Concurrent in-memory data structures built around one shared problem:
//! letting many readers and writers cooperate on a mutable associative or
//! sequential container without blocking more than necessary, and without
//! leaking memory when items are removed while other threads may still be
//! observing them.
//!
//! Three containers sit at the top level:
//!
//! - [`FlatMap`] — a page-partitioned, open-addressed concurrent map keyed
//!   by `u64`. Disjoint pages are lockable in parallel; a top-level lock is
//!   held shared by normal operations and exclusive only during resize.
//! - [`ChainMap`] — the same top-level/per-bucket locking split, but using
//!   separate chaining instead of open addressing, over a generic,
//!   `Hash + Eq` key.
//! - [`CuckooMap`] — a single-threaded, two-table cuckoo hash map. Out of
//!   scope for the concurrency engineering the other two containers are
//!   about; included for completeness.
//!
//! Underneath those, [`rcu`] provides a generation-based reclamation engine
//! and the RCU-protected doubly-linked list built on top of it, and [`sync`]
//! provides the write-preferring reader/writer lock the page- and
//! bucket-locked maps are built from.

#![cfg_attr(feature = "nightly", feature(core_intrinsics))]
#![deny(rust_2018_idioms, unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod chainmap;
pub mod cuckoo;
pub mod flatmap;
mod hash;
mod intrusive;
pub mod rcu;
pub mod sync;
mod util;

pub use chainmap::ChainMap;
pub use cuckoo::CuckooMap;
pub use flatmap::FlatMap;
pub use rcu::{Gc, RcuList};
