//! Lookup, insertion and removal specialised for 4-byte plain elements.
//!
//! Elements are compared by value instead of through the descriptor, and a
//! table with a single bucket is probed without hashing at all. The
//! descriptor still supplies the hash whenever one is needed, so these
//! operations can be mixed freely with the general ones on the same table,
//! provided the descriptor's `equal` agrees with `==` (see [`Fast32`]).

use crate::bucket::Fallibility;
use crate::bucket::bucket_mask;
use crate::bucket::tophash;
use crate::elem::ElemType;
use crate::hash_table::HashTable;
use crate::hash_table::infallible;
use crate::hash_table::scan_chain;

mod sealed {
    pub trait Sealed {}

    impl Sealed for u32 {}
    impl Sealed for i32 {}
}

/// Element types eligible for the fast path: four bytes wide, `Copy`, and
/// equal exactly when their bits are equal.
///
/// This trait is sealed and implemented for `u32` and `i32`.
///
/// The `*_fast32` methods compare with `==` instead of
/// [`ElemType::equal`]. They may only be used with a descriptor whose
/// `equal` is exactly `==` (as for [`SeededHasher`](crate::SeededHasher));
/// with a coarser or finer `equal` the fast and general paths disagree about
/// membership. Debug builds panic when they observe such a disagreement.
pub trait Fast32: sealed::Sealed + Copy + Eq {}

impl Fast32 for u32 {}
impl Fast32 for i32 {}

/// `a == b`, checked against the descriptor in debug builds.
#[inline(always)]
#[allow(unused_variables)]
fn bitwise_eq<T: Fast32, E: ElemType<T>>(elem: &E, a: &T, b: &T) -> bool {
    let eq = a == b;
    debug_assert!(
        eq == elem.equal(a, b),
        "fast32 path used with a descriptor whose `equal` differs from `==`"
    );
    eq
}

impl<T, E> HashTable<T, E>
where
    T: Fast32,
    E: ElemType<T>,
{
    /// Fast-path [`contains`](Self::contains).
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_set::HashTable;
    /// # use evac_set::SeededHasher;
    /// # use std::collections::hash_map::RandomState;
    /// #
    /// let mut table = HashTable::new(SeededHasher::new(RandomState::new()));
    /// table.insert_fast32(5u32);
    /// assert!(table.contains_fast32(5));
    /// assert!(table.contains(&5));
    /// assert!(!table.contains_fast32(6));
    /// ```
    pub fn contains_fast32(&self, value: T) -> bool {
        if self.count == 0 {
            return false;
        }
        self.write.check_read();
        if self.b == 0 && !self.growing() {
            // One-bucket table. No need to hash.
            let Some(current) = self.buckets else {
                return false;
            };
            return scan_chain(&self.generations[current], 0, |_, stored| {
                bitwise_eq(&self.elem, stored, &value)
            })
            .is_some();
        }
        let hash = self.elem.hash(&value, self.seed);
        let top = tophash(hash);
        let Some((generation, bucket)) = self.locate(hash) else {
            return false;
        };
        scan_chain(generation, bucket, |tag, stored| {
            tag == top && bitwise_eq(&self.elem, stored, &value)
        })
        .is_some()
    }

    /// Fast-path [`insert`](Self::insert).
    pub fn insert_fast32(&mut self, value: T) -> bool {
        let hash = self.elem.hash(&value, self.seed);
        let replace = self.elem.needs_update();
        let inserted = self.insert_hashed(
            hash,
            value,
            replace,
            Fallibility::Infallible,
            |elem, _, stored, value| bitwise_eq(elem, stored, value),
        );
        infallible(inserted).is_none()
    }

    /// Fast-path [`remove`](Self::remove). Returns `true` if the element was
    /// present.
    pub fn remove_fast32(&mut self, value: T) -> bool {
        if self.count == 0 {
            return false;
        }
        self.write.check_write();
        let bucket = if self.b == 0 && !self.growing() {
            0
        } else {
            (self.elem.hash(&value, self.seed) & bucket_mask(self.b)) as usize
        };

        self.write.begin();
        let removed =
            self.remove_in_bucket(bucket, |elem, _, stored| bitwise_eq(elem, stored, &value));
        self.write.end();
        removed.is_some()
    }
}
