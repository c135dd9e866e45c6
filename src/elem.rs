//! Element type descriptors.
//!
//! A [`HashTable`](crate::HashTable) never hashes or compares elements on its
//! own. Every operation goes through an [`ElemType`] descriptor, which supplies
//! the seeded hash function and the equality test for the element type, and
//! says how the table must treat elements that are not equal to themselves.

use core::hash::BuildHasher;
use core::hash::Hash;
use core::hash::Hasher;

/// Describes how a [`HashTable`](crate::HashTable) hashes and compares
/// elements of type `T`.
///
/// # Examples
///
/// A descriptor for `f64` that treats NaN as non-reflexive, so every NaN
/// inserted becomes a distinct element:
///
/// ```rust
/// use evac_set::ElemType;
/// use evac_set::HashTable;
///
/// struct Floats;
///
/// impl ElemType<f64> for Floats {
///     fn hash(&self, value: &f64, seed: u64) -> u64 {
///         // +0.0 and -0.0 compare equal, so they must hash the same.
///         let bits = if *value == 0.0 { 0 } else { value.to_bits() };
///         (bits ^ seed).wrapping_mul(0x9E37_79B9_7F4A_7C15).rotate_left(29)
///     }
///
///     fn equal(&self, a: &f64, b: &f64) -> bool {
///         a == b
///     }
///
///     fn reflexive(&self) -> bool {
///         false
///     }
/// }
///
/// let mut table = HashTable::new(Floats);
/// table.insert(1.5);
/// table.insert(f64::NAN);
/// table.insert(f64::NAN);
/// assert_eq!(table.len(), 3);
/// assert!(!table.contains(&f64::NAN));
/// ```
pub trait ElemType<T> {
    /// Hashes `value` under the table's per-instance `seed`.
    ///
    /// Elements for which [`equal`](ElemType::equal) returns `true` must hash
    /// to the same value under the same seed.
    fn hash(&self, value: &T, seed: u64) -> u64;

    /// Returns `true` if `a` and `b` denote the same set member.
    fn equal(&self, a: &T, b: &T) -> bool;

    /// Returns `true` if every value of `T` is equal to itself.
    ///
    /// When this returns `false`, the table asks [`equal`](ElemType::equal)
    /// whether an individual element is self-equal before relying on its hash
    /// being repeatable.
    fn reflexive(&self) -> bool {
        true
    }

    /// Returns `true` if inserting an element that is equal to a stored one
    /// must overwrite the stored element, e.g. because equal values can still
    /// be told apart (`+0.0` and `-0.0`).
    fn needs_update(&self) -> bool {
        false
    }
}

/// [`ElemType`] for any `T: Hash + Eq`, hashing with a [`BuildHasher`].
///
/// The table's seed is fed into the hasher ahead of the element, so two tables
/// sharing one `BuildHasher` still place elements differently, and a table
/// re-seeded by `clear` scatters its elements afresh.
#[derive(Clone, Debug, Default)]
pub struct SeededHasher<S> {
    hash_builder: S,
}

impl<S> SeededHasher<S> {
    /// Wraps `hash_builder`.
    pub fn new(hash_builder: S) -> Self {
        Self { hash_builder }
    }

    /// Returns the wrapped hasher builder.
    pub fn hasher(&self) -> &S {
        &self.hash_builder
    }
}

impl<T, S> ElemType<T> for SeededHasher<S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    #[inline]
    fn hash(&self, value: &T, seed: u64) -> u64 {
        let mut state = self.hash_builder.build_hasher();
        state.write_u64(seed);
        value.hash(&mut state);
        state.finish()
    }

    #[inline]
    fn equal(&self, a: &T, b: &T) -> bool {
        a == b
    }
}
