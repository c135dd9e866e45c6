#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod bucket;
mod elem;
mod fast32;
mod grow;
mod iter;
mod write_guard;

/// The raw set engine.
///
/// This module provides [`HashTable`], which stores elements in 8-slot
/// buckets and grows incrementally, hashing and comparing through an
/// [`ElemType`] descriptor.
pub mod hash_table;

/// A hash set over the incremental engine.
///
/// This module provides a `HashSet` that wraps the `HashTable` and provides
/// a standard set interface with configurable hashers.
pub mod hash_set;

pub use elem::ElemType;
pub use elem::SeededHasher;
pub use fast32::Fast32;
pub use hash_set::DefaultHashBuilder;
pub use hash_set::HashSet;
#[cfg(feature = "stats")]
pub use hash_table::DebugStats;
pub use hash_table::HashTable;
pub use hash_table::TryReserveError;
pub use iter::Cursor;
pub use iter::Iter;
