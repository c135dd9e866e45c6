use alloc::vec::Vec;
use core::fmt::Debug;
use core::hash::BuildHasher;
use core::hash::Hash;
use core::iter::FusedIterator;

use crate::elem::SeededHasher;
use crate::fast32::Fast32;
use crate::hash_table::HashTable;
use crate::hash_table::TryReserveError;
use crate::iter::Cursor;

cfg_if::cfg_if! {
    if #[cfg(feature = "foldhash")] {
        /// Default hasher builder for [`HashSet`].
        pub type DefaultHashBuilder = foldhash::fast::RandomState;
    } else if #[cfg(feature = "std")] {
        /// Default hasher builder for [`HashSet`].
        pub type DefaultHashBuilder = std::hash::RandomState;
    } else {
        /// Placeholder when no default hasher is available. Pick one with
        /// [`HashSet::with_hasher`].
        #[derive(Clone, Copy, Debug)]
        pub enum DefaultHashBuilder {}
    }
}

/// A hash set backed by an incrementally growing [`HashTable`].
///
/// `HashSet<T, S>` stores values of type `T` where `T` implements `Hash + Eq`
/// and uses a configurable hasher builder `S` to hash values. Each set mixes
/// its own random seed into every hash, and picks a new one whenever it
/// becomes empty.
///
/// # Performance Characteristics
///
/// - **Memory**: 1 tag byte per slot plus an `Option<T>`, about 6.5 elements
///   per 8-slot bucket at full load.
/// - **Latency**: no insert or remove ever rehashes the whole set; growth
///   work is spread over the mutations that follow it.
pub struct HashSet<T, S = DefaultHashBuilder> {
    table: HashTable<T, SeededHasher<S>>,
}

impl<T, S> Clone for HashSet<T, S>
where
    T: Hash + Eq + Clone,
    S: BuildHasher + Clone,
{
    fn clone(&self) -> Self {
        Self {
            table: self.table.clone(),
        }
    }
}

impl<T, S> PartialEq for HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    fn eq(&self, other: &Self) -> bool {
        if self.len() != other.len() {
            return false;
        }
        self.iter().all(|v| other.contains(v))
    }
}

impl<T, S> Eq for HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
}

impl<T, S> Debug for HashSet<T, S>
where
    T: Debug + Hash + Eq,
    S: BuildHasher,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T, S> HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    /// Creates a new hash set with the given hasher builder.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(feature = "std")]
    /// # {
    /// use std::collections::hash_map::RandomState;
    ///
    /// use evac_set::HashSet;
    ///
    /// let set: HashSet<i32, _> = HashSet::with_hasher(RandomState::new());
    /// assert!(set.is_empty());
    /// # }
    /// ```
    pub fn with_hasher(hash_builder: S) -> Self {
        Self::with_capacity_and_hasher(0, hash_builder)
    }

    /// Creates a new hash set sized for `capacity` elements, with the given
    /// hasher builder.
    ///
    /// The actual capacity may be larger than requested, since buckets come
    /// in powers of two.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(feature = "std")]
    /// # {
    /// use std::collections::hash_map::RandomState;
    ///
    /// use evac_set::HashSet;
    ///
    /// let set: HashSet<i32, _> = HashSet::with_capacity_and_hasher(100, RandomState::new());
    /// assert!(set.capacity() >= 100);
    /// # }
    /// ```
    pub fn with_capacity_and_hasher(capacity: usize, hash_builder: S) -> Self {
        Self {
            table: HashTable::with_capacity(capacity, SeededHasher::new(hash_builder)),
        }
    }

    /// Returns a reference to the set's hasher builder.
    pub fn hasher(&self) -> &S {
        self.table.elem_type().hasher()
    }

    /// Returns the number of elements in the set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let mut set: HashSet<i32> = HashSet::new();
    /// assert_eq!(set.len(), 0);
    /// set.insert(1);
    /// assert_eq!(set.len(), 1);
    /// # }
    /// ```
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns `true` if the set contains no elements.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the number of elements the set can hold before it grows to
    /// the next size class.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let set: HashSet<i32> = HashSet::with_capacity(100);
    /// assert!(set.capacity() >= 100);
    /// # }
    /// ```
    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Removes all elements from the set.
    ///
    /// This operation keeps the set's bucket array. Cursors created before
    /// the call are finished.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let mut set: HashSet<i32> = HashSet::new();
    /// set.insert(1);
    /// let mut cursor = set.cursor();
    /// set.clear();
    /// assert!(set.is_empty());
    /// assert_eq!(set.cursor_next(&mut cursor), None);
    /// # }
    /// ```
    pub fn clear(&mut self) {
        self.table.clear();
    }

    /// Adds a value to the set.
    ///
    /// Returns whether the value was newly inserted. That is:
    ///
    /// - If the set did not previously contain this value, `true` is returned.
    /// - If the set already contained this value, `false` is returned, and
    ///   the stored value is kept.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let mut set: HashSet<i32> = HashSet::new();
    /// assert_eq!(set.insert(37), true);
    /// assert_eq!(set.insert(37), false);
    /// assert_eq!(set.len(), 1);
    /// # }
    /// ```
    pub fn insert(&mut self, value: T) -> bool {
        self.table.insert(value)
    }

    /// Adds a value to the set, reporting allocation failure instead of
    /// aborting.
    ///
    /// On error the set is unchanged.
    pub fn try_insert(&mut self, value: T) -> Result<bool, TryReserveError> {
        self.table.try_insert(value)
    }

    /// Adds a value to the set, replacing the existing value, if any, that is
    /// equal to the given one. Returns the replaced value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let mut set: HashSet<i32> = HashSet::new();
    /// set.insert(1);
    /// assert_eq!(set.replace(1), Some(1));
    /// assert_eq!(set.replace(2), None);
    /// assert_eq!(set.len(), 2);
    /// # }
    /// ```
    pub fn replace(&mut self, value: T) -> Option<T> {
        self.table.replace(value)
    }

    /// Returns `true` if the set contains a value.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let mut set: HashSet<i32> = HashSet::new();
    /// set.insert(1);
    /// assert!(set.contains(&1));
    /// assert!(!set.contains(&2));
    /// # }
    /// ```
    pub fn contains(&self, value: &T) -> bool {
        self.table.contains(value)
    }

    /// Returns a reference to the value in the set, if any, that is equal to
    /// the given value.
    pub fn get(&self, value: &T) -> Option<&T> {
        self.table.get(value)
    }

    /// Removes a value from the set. Returns whether the value was
    /// present in the set.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let mut set: HashSet<i32> = HashSet::new();
    /// set.insert(1);
    /// assert_eq!(set.remove(&1), true);
    /// assert_eq!(set.remove(&1), false);
    /// # }
    /// ```
    pub fn remove(&mut self, value: &T) -> bool {
        self.table.remove(value).is_some()
    }

    /// Removes and returns the value in the set, if any, that is equal to the
    /// given one.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let mut set: HashSet<i32> = HashSet::new();
    /// set.insert(1);
    /// assert_eq!(set.take(&1), Some(1));
    /// assert_eq!(set.take(&1), None);
    /// # }
    /// ```
    pub fn take(&mut self, value: &T) -> Option<T> {
        self.table.remove(value)
    }

    /// Returns an iterator over the values of the set, starting at a random
    /// position.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let mut set: HashSet<i32> = HashSet::new();
    /// set.insert(1);
    /// set.insert(2);
    ///
    /// for value in set.iter() {
    ///     println!("Value: {}", value);
    /// }
    /// # }
    /// ```
    pub fn iter(&self) -> Iter<'_, T, S> {
        Iter {
            inner: self.table.iter(),
        }
    }

    /// Returns the next value of a cursor created by
    /// [`cursor`](Self::cursor).
    ///
    /// # Panics
    ///
    /// Panics if `cursor` was created by a different set.
    pub fn cursor_next<'a>(&'a self, cursor: &mut Cursor) -> Option<&'a T> {
        cursor.next(&self.table)
    }

    /// Returns `true` if the set contains no elements in common with `other`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let a: HashSet<i32> = [1, 2].into_iter().collect();
    /// let b: HashSet<i32> = [3, 4].into_iter().collect();
    /// assert!(a.is_disjoint(&b));
    /// # }
    /// ```
    pub fn is_disjoint(&self, other: &HashSet<T, S>) -> bool {
        if self.len() <= other.len() {
            self.iter().all(|v| !other.contains(v))
        } else {
            other.iter().all(|v| !self.contains(v))
        }
    }

    /// Returns `true` if `other` contains at least all the elements in
    /// `self`.
    pub fn is_subset(&self, other: &HashSet<T, S>) -> bool {
        self.len() <= other.len() && self.iter().all(|v| other.contains(v))
    }

    /// Returns `true` if `self` contains at least all the elements in
    /// `other`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let a: HashSet<i32> = [1, 2, 3].into_iter().collect();
    /// let b: HashSet<i32> = [1, 2].into_iter().collect();
    /// assert!(a.is_superset(&b));
    /// assert!(!b.is_superset(&a));
    /// # }
    /// ```
    pub fn is_superset(&self, other: &HashSet<T, S>) -> bool {
        other.is_subset(self)
    }

    /// Visits the values in `self` or `other`, without duplicates.
    pub fn union<'a>(&'a self, other: &'a HashSet<T, S>) -> Union<'a, T, S> {
        Union {
            iter: self.iter(),
            other_iter: other.iter(),
            set: self,
        }
    }

    /// Visits the values in both `self` and `other`.
    pub fn intersection<'a>(&'a self, other: &'a HashSet<T, S>) -> Intersection<'a, T, S> {
        let (small, large) = if self.len() <= other.len() {
            (self, other)
        } else {
            (other, self)
        };
        Intersection {
            iter: small.iter(),
            other: large,
        }
    }

    /// Visits the values in `self` but not in `other`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let a: HashSet<i32> = [1, 2, 3].into_iter().collect();
    /// let b: HashSet<i32> = [2, 3, 4].into_iter().collect();
    /// let diff: Vec<_> = a.difference(&b).collect();
    /// assert_eq!(diff, [&1]);
    /// # }
    /// ```
    pub fn difference<'a>(&'a self, other: &'a HashSet<T, S>) -> Difference<'a, T, S> {
        Difference {
            iter: self.iter(),
            other,
        }
    }

    /// Visits the values in exactly one of `self` and `other`.
    pub fn symmetric_difference<'a>(
        &'a self,
        other: &'a HashSet<T, S>,
    ) -> SymmetricDifference<'a, T, S> {
        SymmetricDifference {
            iter: self.difference(other).chain(other.difference(self)),
        }
    }

    /// Returns statistics about the set's internal layout.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> crate::hash_table::DebugStats {
        self.table.debug_stats()
    }
}

impl<T, S> HashSet<T, S>
where
    T: Hash + Eq + Clone,
    S: BuildHasher,
{
    /// Starts an iteration that may be interleaved with inserts and removes.
    ///
    /// Step it with [`cursor_next`](Self::cursor_next). Values present when
    /// the cursor was created and never removed are yielded exactly once,
    /// however much the set grows meanwhile. A value removed and re-inserted
    /// after it was yielded counts as newly inserted and may show up again.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let mut set: HashSet<u32> = (0..10).collect();
    /// let mut cursor = set.cursor();
    /// let mut seen = 0;
    /// while let Some(&value) = set.cursor_next(&mut cursor) {
    ///     seen += 1;
    ///     if value < 10 {
    ///         set.remove(&value);
    ///         set.insert(value + 100);
    ///     }
    /// }
    /// assert!(seen >= 10);
    /// assert_eq!(set.len(), 10);
    /// # }
    /// ```
    pub fn cursor(&mut self) -> Cursor {
        self.table.cursor()
    }

    /// Copies every value into a vector, in random order.
    pub fn to_vec(&self) -> Vec<T> {
        self.table.to_vec()
    }
}

impl<T, S> HashSet<T, S>
where
    T: Fast32 + Hash,
    S: BuildHasher,
{
    /// [`contains`](Self::contains) for 4-byte values, probing a single
    /// bucket set without hashing.
    pub fn contains_fast32(&self, value: T) -> bool {
        self.table.contains_fast32(value)
    }

    /// [`insert`](Self::insert) for 4-byte values.
    pub fn insert_fast32(&mut self, value: T) -> bool {
        self.table.insert_fast32(value)
    }

    /// [`remove`](Self::remove) for 4-byte values.
    pub fn remove_fast32(&mut self, value: T) -> bool {
        self.table.remove_fast32(value)
    }
}

impl<T, S> HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
{
    /// Creates a new hash set using the default hasher builder.
    ///
    /// No bucket is allocated until the first insert.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # #[cfg(any(feature = "std", feature = "foldhash"))]
    /// # {
    /// use evac_set::HashSet;
    ///
    /// let set: HashSet<i32> = HashSet::new();
    /// assert!(set.is_empty());
    /// # }
    /// ```
    pub fn new() -> Self {
        Self::with_hasher(S::default())
    }

    /// Creates a new hash set sized for `capacity` elements using the default
    /// hasher builder.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::with_capacity_and_hasher(capacity, S::default())
    }
}

impl<T, S> Default for HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
{
    fn default() -> Self {
        Self::new()
    }
}

/// An iterator over the values of a `HashSet`.
pub struct Iter<'a, T, S> {
    inner: crate::iter::Iter<'a, T, SeededHasher<S>>,
}

impl<T, S> Clone for Iter<'_, T, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<'a, T, S> Iterator for Iter<'a, T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T, S> ExactSizeIterator for Iter<'_, T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
}

impl<T, S> FusedIterator for Iter<'_, T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
}

/// A consuming iterator over the values of a `HashSet`.
pub struct IntoIter<T> {
    inner: alloc::vec::IntoIter<T>,
}

impl<T> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<T> ExactSizeIterator for IntoIter<T> {}

impl<T, S> IntoIterator for HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    type IntoIter = IntoIter<T>;
    type Item = T;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            inner: self.table.into_vec().into_iter(),
        }
    }
}

impl<'a, T, S> IntoIterator for &'a HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    type IntoIter = Iter<'a, T, S>;
    type Item = &'a T;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<T, S> FromIterator<T> for HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher + Default,
{
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut set = HashSet::with_capacity(iter.size_hint().0);
        set.extend(iter);
        set
    }
}

impl<T, S> Extend<T> for HashSet<T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.insert(value);
        }
    }
}

impl<'a, T, S> Extend<&'a T> for HashSet<T, S>
where
    T: Hash + Eq + Copy + 'a,
    S: BuildHasher,
{
    fn extend<I: IntoIterator<Item = &'a T>>(&mut self, iter: I) {
        self.extend(iter.into_iter().copied());
    }
}

/// An iterator over the union of two sets.
pub struct Union<'a, T, S> {
    iter: Iter<'a, T, S>,
    other_iter: Iter<'a, T, S>,
    set: &'a HashSet<T, S>,
}

impl<'a, T, S> Iterator for Union<'a, T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(v) = self.iter.next() {
            return Some(v);
        }
        loop {
            let v = self.other_iter.next()?;
            if !self.set.contains(v) {
                return Some(v);
            }
        }
    }
}

/// An iterator over the intersection of two sets.
pub struct Intersection<'a, T, S> {
    iter: Iter<'a, T, S>,
    other: &'a HashSet<T, S>,
}

impl<'a, T, S> Iterator for Intersection<'a, T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let v = self.iter.next()?;
            if self.other.contains(v) {
                return Some(v);
            }
        }
    }
}

/// An iterator over the difference of two sets.
pub struct Difference<'a, T, S> {
    iter: Iter<'a, T, S>,
    other: &'a HashSet<T, S>,
}

impl<'a, T, S> Iterator for Difference<'a, T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let v = self.iter.next()?;
            if !self.other.contains(v) {
                return Some(v);
            }
        }
    }
}

/// An iterator over the symmetric difference of two sets.
pub struct SymmetricDifference<'a, T, S> {
    iter: core::iter::Chain<Difference<'a, T, S>, Difference<'a, T, S>>,
}

impl<'a, T, S> Iterator for SymmetricDifference<'a, T, S>
where
    T: Hash + Eq,
    S: BuildHasher,
{
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }
}

#[cfg(test)]
mod tests {
    use alloc::format;
    use alloc::string::String;
    use alloc::string::ToString;
    use alloc::vec;
    use alloc::vec::Vec;
    use core::hash::BuildHasher;

    use rand::TryRngCore;
    use rand::rngs::OsRng;
    use siphasher::sip::SipHasher;

    use super::*;

    #[derive(Clone)]
    struct SipHashBuilder {
        k1: u64,
        k2: u64,
    }

    impl BuildHasher for SipHashBuilder {
        type Hasher = SipHasher;

        fn build_hasher(&self) -> Self::Hasher {
            SipHasher::new_with_keys(self.k1, self.k2)
        }
    }

    impl Default for SipHashBuilder {
        fn default() -> Self {
            Self {
                k1: OsRng.try_next_u64().unwrap_or(0),
                k2: OsRng.try_next_u64().unwrap_or(0),
            }
        }
    }

    fn sorted<T: Ord>(mut values: Vec<T>) -> Vec<T> {
        values.sort();
        values
    }

    fn set<T: Hash + Eq>() -> HashSet<T, SipHashBuilder> {
        HashSet::with_hasher(SipHashBuilder::default())
    }

    #[test]
    fn test_constructors() {
        let set: HashSet<i32, SipHashBuilder> = HashSet::new();
        assert!(set.is_empty());
        assert_eq!(set.capacity(), 8);

        let set: HashSet<i32, SipHashBuilder> = HashSet::default();
        assert_eq!(set.iter().count(), 0);

        let set: HashSet<i32, SipHashBuilder> = HashSet::with_capacity(100);
        assert!(set.capacity() >= 100);
        assert!(set.capacity() < 200);

        let hasher = SipHashBuilder::default();
        let set = HashSet::<i32, _>::with_capacity_and_hasher(200, hasher.clone());
        assert!(set.capacity() >= 200);
        assert_eq!((set.hasher().k1, set.hasher().k2), (hasher.k1, hasher.k2));
    }

    #[test]
    fn test_insert_contains_remove() {
        let mut set = set();
        assert!(set.insert(10));
        assert!(set.insert(20));
        assert!(!set.insert(10));
        assert_eq!(set.len(), 2);
        assert!(set.contains(&10) && set.contains(&20));
        assert!(!set.contains(&30));
        assert_eq!(set.get(&20), Some(&20));
        assert_eq!(set.get(&30), None);

        assert!(set.remove(&10));
        assert!(!set.remove(&10));
        assert_eq!(set.take(&20), Some(20));
        assert_eq!(set.take(&20), None);
        assert!(set.is_empty());
    }

    #[test]
    fn test_try_insert() {
        let mut set = set();
        assert_eq!(set.try_insert(1), Ok(true));
        assert_eq!(set.try_insert(1), Ok(false));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_replace_keeps_one_copy() {
        let mut set = set();
        assert_eq!(set.replace(String::from("key")), None);
        assert_eq!(set.replace(String::from("key")), Some(String::from("key")));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_clear_then_reuse() {
        let mut set = set();
        for i in 0..300 {
            set.insert(i);
        }
        let capacity = set.capacity();
        set.clear();
        assert!(set.is_empty());
        assert_eq!(set.capacity(), capacity);
        assert!((0..300).all(|i| !set.contains(&i)));
        set.insert(299);
        assert_eq!(set.to_vec(), [299]);
    }

    #[test]
    fn test_iter() {
        let set: HashSet<i32, SipHashBuilder> = (1..=3).collect();
        let mut iter = set.iter();
        assert_eq!(iter.len(), 3);
        let values: Vec<i32> = iter.by_ref().copied().collect();
        assert_eq!(sorted(values), [1, 2, 3]);
        assert_eq!(iter.next(), None);
    }

    #[test]
    fn test_into_iterator() {
        let set: HashSet<i32, SipHashBuilder> = (1..=3).collect();
        let mut borrowed = Vec::new();
        for v in &set {
            borrowed.push(*v);
        }
        assert_eq!(sorted(borrowed), [1, 2, 3]);

        let owned: Vec<i32> = set.into_iter().collect();
        assert_eq!(sorted(owned), [1, 2, 3]);
    }

    #[test]
    fn test_into_iterator_mid_growth() {
        let mut set = set();
        let mut i = 0;
        while !set.debug_stats().growing {
            set.insert(i);
            i += 1;
        }
        let owned: Vec<i32> = set.into_iter().collect();
        assert_eq!(sorted(owned), (0..i).collect::<Vec<_>>());
    }

    #[test]
    fn test_to_vec() {
        let set: HashSet<u64, SipHashBuilder> = (0..100).collect();
        assert_eq!(sorted(set.to_vec()), (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_cursor_with_mutation() {
        let mut set: HashSet<u64, SipHashBuilder> = (0..200).collect();
        let mut cursor = set.cursor();
        let mut seen = Vec::new();
        while let Some(&value) = set.cursor_next(&mut cursor) {
            seen.push(value);
            if value < 200 {
                set.insert(value + 10_000);
            }
        }
        seen.retain(|&v| v < 200);
        assert_eq!(sorted(seen), (0..200).collect::<Vec<_>>());
        assert_eq!(set.len(), 400);
    }

    #[test]
    fn test_grow_then_shrink_by_half() {
        let mut set = set();
        for i in 0..1000u32 {
            assert!(set.insert(i));
        }
        assert!(set.debug_stats().bigger_grows > 0);
        for i in (0..1000u32).filter(|i| i % 2 == 0) {
            assert!(set.remove(&i));
        }
        assert_eq!(set.len(), 500);
        for i in 0..1000u32 {
            assert_eq!(set.contains(&i), i % 2 == 1, "{i}");
        }
    }

    #[test]
    fn test_owned_values() {
        let mut set = set();
        let words = ["evacuate", "bucket", "overflow", "tophash"];
        for w in words {
            assert!(set.insert(w.to_string()));
        }
        assert!(!set.insert("bucket".to_string()));
        assert!(set.contains(&"overflow".to_string()));
        assert!(!set.contains(&"underflow".to_string()));

        let mut lists = self::set();
        assert!(lists.insert(vec![1u8, 2, 3]));
        assert!(!lists.insert(vec![1u8, 2, 3]));
        assert!(lists.insert(vec![3u8, 2, 1]));
        assert_eq!(lists.len(), 2);

        let mut long = self::set();
        for i in 0..64 {
            let value = format!("{:-<512}{i}", "");
            assert!(long.insert(value.clone()));
            assert!(long.contains(&value));
        }
        assert_eq!(long.len(), 64);
    }

    #[test]
    fn test_empty_set_operations() {
        let mut set: HashSet<i32, SipHashBuilder> = set();
        assert!(!set.remove(&1));
        assert_eq!(set.take(&1), None);
        assert_eq!(set.get(&1), None);
        set.clear();
        assert_eq!(set.iter().count(), 0);
        assert_eq!(set.to_vec(), Vec::<i32>::new());
        assert_eq!(set.debug_stats().primary_buckets, 0);
    }

    #[test]
    fn test_repeated_fill_and_drain() {
        let mut set = set();
        for round in 0..10u64 {
            for i in 0..50 {
                assert!(set.insert(round * 100 + i));
            }
            for i in 0..50 {
                assert!(set.remove(&(round * 100 + i)));
            }
            assert!(set.is_empty());
        }
        assert_eq!(set.debug_stats().size_class, 3);
    }

    #[test]
    fn test_fast32_wrappers() {
        let mut set = HashSet::with_hasher(SipHashBuilder::default());
        for i in -50i32..50 {
            assert!(set.insert_fast32(i));
        }
        assert_eq!(set.len(), 100);
        assert!(set.contains_fast32(-50));
        assert!(set.contains(&-50));
        assert!(set.remove_fast32(-50));
        assert!(!set.contains_fast32(-50));
        assert!(!set.remove_fast32(-50));
    }

    #[test]
    fn test_clone_and_eq() {
        let mut a: HashSet<String, SipHashBuilder> = (0..50).map(|i| i.to_string()).collect();
        let b = a.clone();
        assert_eq!(a, b);
        a.remove(&"7".to_string());
        assert_ne!(a, b);
        assert!(b.contains(&"7".to_string()));
        a.insert("7".to_string());
        assert_eq!(a, b);
    }

    #[test]
    fn test_extend() {
        let mut set: HashSet<i32, _> = HashSet::with_hasher(SipHashBuilder::default());
        set.extend([1, 2, 3]);
        set.extend(&[3, 4]);
        assert_eq!(set.len(), 4);
    }

    #[test]
    fn test_debug() {
        let mut set = HashSet::with_hasher(SipHashBuilder::default());
        set.insert(5);
        assert_eq!(format!("{set:?}"), "{5}");
    }

    #[test]
    fn test_is_disjoint() {
        let mut a = HashSet::with_hasher(SipHashBuilder::default());
        a.insert(1);
        a.insert(2);
        a.insert(3);

        let mut b = HashSet::with_hasher(a.hasher().clone());
        b.insert(4);
        b.insert(5);
        b.insert(6);

        assert!(a.is_disjoint(&b));
        assert!(b.is_disjoint(&a));

        b.insert(2);
        assert!(!a.is_disjoint(&b));
        assert!(!b.is_disjoint(&a));
    }

    #[test]
    fn test_is_subset() {
        let mut a = HashSet::with_hasher(SipHashBuilder::default());
        a.insert(1);
        a.insert(2);

        let mut b = HashSet::with_hasher(SipHashBuilder::default());
        b.insert(1);
        b.insert(2);
        b.insert(3);

        assert!(a.is_subset(&b));
        assert!(!b.is_subset(&a));
        assert!(a.is_subset(&a));
    }

    #[test]
    fn test_is_superset() {
        let mut a = HashSet::with_hasher(SipHashBuilder::default());
        a.insert(1);
        a.insert(2);
        a.insert(3);

        let mut b = HashSet::with_hasher(SipHashBuilder::default());
        b.insert(1);
        b.insert(2);

        assert!(a.is_superset(&b));
        assert!(!b.is_superset(&a));
        assert!(a.is_superset(&a));
    }

    #[test]
    fn test_union() {
        let a: HashSet<i32, SipHashBuilder> = [1, 2, 3].into_iter().collect();
        let b: HashSet<i32, SipHashBuilder> = [3, 4, 5].into_iter().collect();

        let union: Vec<_> = a.union(&b).copied().collect();
        assert_eq!(sorted(union), [1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_intersection() {
        let a: HashSet<i32, SipHashBuilder> = [1, 2, 3].into_iter().collect();
        let b: HashSet<i32, SipHashBuilder> = [2, 3, 4, 5].into_iter().collect();

        let intersection: Vec<_> = a.intersection(&b).copied().collect();
        assert_eq!(sorted(intersection), [2, 3]);
        let intersection: Vec<_> = b.intersection(&a).copied().collect();
        assert_eq!(sorted(intersection), [2, 3]);
    }

    #[test]
    fn test_difference() {
        let a: HashSet<i32, SipHashBuilder> = [1, 2, 3].into_iter().collect();
        let b: HashSet<i32, SipHashBuilder> = [2, 3, 4].into_iter().collect();

        let difference: Vec<_> = a.difference(&b).copied().collect();
        assert_eq!(difference, [1]);
    }

    #[test]
    fn test_symmetric_difference() {
        let a: HashSet<i32, SipHashBuilder> = [1, 2, 3].into_iter().collect();
        let b: HashSet<i32, SipHashBuilder> = [2, 3, 4].into_iter().collect();

        let sym_diff: Vec<_> = a.symmetric_difference(&b).copied().collect();
        assert_eq!(sorted(sym_diff), [1, 4]);
    }
}
