//! Iteration.
//!
//! Both iterators walk the buckets of the array that was current when they
//! started, beginning at a random bucket and a random slot offset. A
//! [`Cursor`] is detached from the table borrow, so the table may be mutated
//! (and may grow) between two steps; it then re-resolves elements that were
//! moved and skips elements that were removed. An element removed and
//! re-inserted after it was yielded counts as new and may be yielded again.
//! [`Iter`] borrows the table and cannot observe mutation.

use alloc::sync::Arc;
use core::iter::FusedIterator;

use rand::RngCore;

use crate::bucket::BUCKET_SIZE;
use crate::bucket::EVACUATED_EMPTY;
use crate::bucket::EVACUATED_X;
use crate::bucket::EVACUATED_Y;
use crate::bucket::bucket_mask;
use crate::bucket::is_empty;
use crate::elem::ElemType;
use crate::hash_table::GenKey;
use crate::hash_table::HashTable;
use crate::hash_table::ITERATOR;
use crate::hash_table::OLD_ITERATOR;

/// Position of an in-progress iteration.
#[derive(Clone, Debug)]
pub(crate) struct RawCursor {
    /// Array snapshot taken at start, `None` once exhausted.
    generation: Option<GenKey>,
    /// Size class of the snapshot.
    b: u8,
    start_bucket: usize,
    /// Slot rotation applied within every bucket.
    offset: usize,
    /// Next primary bucket to visit.
    bucket: usize,
    /// Bucket being walked, in whichever array holds it.
    current: Option<(GenKey, usize)>,
    i: usize,
    wrapped: bool,
    /// While walking an old bucket during a bigger growth, only elements that
    /// belong to this bucket of the snapshot are yielded. Fixed when the
    /// bucket is picked.
    check_bucket: Option<usize>,
}

impl RawCursor {
    fn new(generation: GenKey, b: u8, r: u64) -> Self {
        let start_bucket = (r & bucket_mask(b)) as usize;
        Self {
            generation: Some(generation),
            b,
            start_bucket,
            offset: ((r >> b) & (BUCKET_SIZE as u64 - 1)) as usize,
            bucket: start_bucket,
            current: None,
            i: 0,
            wrapped: false,
            check_bucket: None,
        }
    }

    fn exhausted() -> Self {
        Self {
            generation: None,
            b: 0,
            start_bucket: 0,
            offset: 0,
            bucket: 0,
            current: None,
            i: 0,
            wrapped: false,
            check_bucket: None,
        }
    }

    fn is_exhausted(&self) -> bool {
        self.generation.is_none()
    }

    pub(crate) fn next<'t, T, E>(&mut self, table: &'t HashTable<T, E>) -> Option<&'t T>
    where
        E: ElemType<T>,
    {
        let snapshot = self.generation?;
        loop {
            let (key, idx) = match self.current {
                Some(position) => position,
                None => {
                    if self.bucket == self.start_bucket && self.wrapped {
                        self.generation = None;
                        return None;
                    }
                    let mut position = (snapshot, self.bucket);
                    self.check_bucket = None;
                    if self.b == table.b {
                        if let Some(old_key) = table.old_buckets {
                            // Started in the middle of a growth that isn't
                            // done yet. If the old bucket feeding this one
                            // hasn't been evacuated, walk the old bucket and
                            // only yield what will be moved here.
                            let old_bucket = self.bucket & table.old_bucket_mask();
                            let evacuated = table
                                .generations
                                .get(old_key)
                                .is_none_or(|old| old.buckets[old_bucket].is_evacuated());
                            if !evacuated {
                                position = (old_key, old_bucket);
                                // A same-size growth keeps every element in
                                // its bucket, so nothing needs filtering.
                                if !table.same_size_grow() {
                                    self.check_bucket = Some(self.bucket);
                                }
                            }
                        }
                    }
                    self.bucket += 1;
                    if self.bucket == 1 << self.b {
                        self.bucket = 0;
                        self.wrapped = true;
                    }
                    self.i = 0;
                    self.current = Some(position);
                    position
                }
            };

            // A bucket can disappear when `clear` resets the array; treat it
            // as the end of the chain.
            let Some(bucket) = table
                .generations
                .get(key)
                .and_then(|generation| generation.buckets.get(idx))
            else {
                self.current = None;
                continue;
            };

            while self.i < BUCKET_SIZE {
                let offi = (self.i + self.offset) & (BUCKET_SIZE - 1);
                self.i += 1;
                let tag = bucket.tags[offi];
                if is_empty(tag) || tag == EVACUATED_EMPTY {
                    continue;
                }
                let Some(value) = bucket.slots[offi].as_ref() else {
                    panic!("bad set state");
                };
                let reflexive = table.elem.reflexive() || table.elem.equal(value, value);

                if let Some(check_bucket) = self.check_bucket {
                    if reflexive {
                        // Skip elements that the growth sends to the other
                        // half.
                        let hash = table.elem.hash(value, table.seed);
                        if (hash & bucket_mask(self.b)) as usize != check_bucket {
                            continue;
                        }
                    } else if check_bucket >> (self.b - 1) != usize::from(tag & 1) {
                        // Hash isn't repeatable for values not equal to
                        // themselves; evacuation uses the low tag bit.
                        continue;
                    }
                }

                if (tag != EVACUATED_X && tag != EVACUATED_Y) || !reflexive {
                    return Some(value);
                }
                // The table has grown since the iteration started. The live
                // element is somewhere else, or has been removed.
                match table.get(value) {
                    Some(live) => return Some(live),
                    None => continue,
                }
            }

            self.current = bucket.overflow.map(|next| (key, next));
            self.i = 0;
        }
    }
}

/// A detached iteration position over a [`HashTable`].
///
/// Created by [`HashTable::cursor`]. Unlike [`Iter`], a cursor does not borrow
/// the table between steps: every call to [`next`](Cursor::next) takes the
/// table again, so inserts and removals can be interleaved with iteration.
///
/// Guarantees:
/// - an element present when the cursor was created and never removed is
///   yielded exactly once;
/// - an element removed before the cursor reached it is not yielded;
/// - elements inserted after creation may or may not be yielded. This
///   includes an element removed and re-inserted after it was yielded, which
///   may then be yielded a second time.
///
/// A cursor keeps the bucket array it started on alive until it is exhausted
/// or dropped.
///
/// # Examples
///
/// ```rust
/// # use evac_set::HashTable;
/// # use evac_set::SeededHasher;
/// # use std::collections::hash_map::RandomState;
/// #
/// let mut table = HashTable::new(SeededHasher::new(RandomState::new()));
/// for i in 0..100u32 {
///     table.insert(i);
/// }
///
/// let mut cursor = table.cursor();
/// let mut seen = Vec::new();
/// while let Some(&value) = cursor.next(&table) {
///     seen.push(value);
///     // Mutating while iterating is allowed, and may trigger growth.
///     table.insert(value + 1000);
/// }
/// seen.retain(|&v| v < 100);
/// seen.sort();
/// assert_eq!(seen, (0..100).collect::<Vec<_>>());
/// ```
#[derive(Debug)]
pub struct Cursor {
    raw: RawCursor,
    /// Keeps the starting array, and the old array of a growth in progress,
    /// readable after the table is done with them.
    pins: [Option<Arc<()>>; 2],
    table_id: u64,
    clear_seq: u64,
}

impl Cursor {
    /// Advances the cursor and returns the next element of `table`.
    ///
    /// Returns `None` once every bucket has been visited; the cursor then
    /// stays exhausted.
    ///
    /// # Panics
    ///
    /// Panics if `table` is not the table the cursor was created from.
    pub fn next<'t, T, E>(&mut self, table: &'t HashTable<T, E>) -> Option<&'t T>
    where
        E: ElemType<T>,
    {
        if self.raw.is_exhausted() {
            return None;
        }
        assert!(
            self.table_id == table.id,
            "cursor used with a set it was not created from"
        );
        table.write.check_iter();
        let item = if self.clear_seq == table.clear_seq {
            self.raw.next(table)
        } else {
            self.raw = RawCursor::exhausted();
            None
        };
        if item.is_none() {
            self.pins = [None, None];
        }
        item
    }

    /// Returns `true` once the cursor has visited every bucket.
    pub fn is_exhausted(&self) -> bool {
        self.raw.is_exhausted()
    }
}

impl<T, E> HashTable<T, E>
where
    T: Clone,
    E: ElemType<T>,
{
    /// Starts a detached iteration over the table.
    ///
    /// See [`Cursor`] for the guarantees under concurrent mutation. While a
    /// cursor may still read a bucket array that is being evacuated, the
    /// table copies elements into the new array instead of moving them,
    /// which is why `T: Clone` is required.
    pub fn cursor(&mut self) -> Cursor {
        let table_id = self.id;
        let clear_seq = self.clear_seq;
        let Some(key) = self.buckets.filter(|_| self.count != 0) else {
            return Cursor {
                raw: RawCursor::exhausted(),
                pins: [None, None],
                table_id,
                clear_seq,
            };
        };

        let r = self.rng.next_u64();
        self.cloner = Some(T::clone);
        // Remember we have an iterator.
        self.flags |= ITERATOR | OLD_ITERATOR;
        let pin = |key: GenKey| self.generations.get(key).map(|g| g.pin.clone());
        Cursor {
            raw: RawCursor::new(key, self.b, r),
            pins: [pin(key), self.old_buckets.and_then(pin)],
            table_id,
            clear_seq,
        }
    }
}

/// A borrowing iterator over the elements of a [`HashTable`].
///
/// Created by [`HashTable::iter`]. Elements come out in an order that varies
/// between iterations.
pub struct Iter<'a, T, E> {
    table: &'a HashTable<T, E>,
    raw: RawCursor,
    remaining: usize,
}

impl<'a, T, E> Iter<'a, T, E>
where
    E: ElemType<T>,
{
    pub(crate) fn new(table: &'a HashTable<T, E>) -> Self {
        let raw = match table.buckets.filter(|_| table.count != 0) {
            Some(key) => {
                table.write.check_iter();
                RawCursor::new(key, table.b, table.random_word())
            }
            None => RawCursor::exhausted(),
        };
        Self {
            table,
            raw,
            remaining: table.count,
        }
    }
}

impl<'a, T, E> Iterator for Iter<'a, T, E>
where
    E: ElemType<T>,
{
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.raw.next(self.table)?;
        self.remaining = self.remaining.saturating_sub(1);
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T, E> ExactSizeIterator for Iter<'_, T, E> where E: ElemType<T> {}

impl<T, E> FusedIterator for Iter<'_, T, E> where E: ElemType<T> {}

impl<T, E> Clone for Iter<'_, T, E> {
    fn clone(&self) -> Self {
        Self {
            table: self.table,
            raw: self.raw.clone(),
            remaining: self.remaining,
        }
    }
}

impl<'a, T, E> IntoIterator for &'a HashTable<T, E>
where
    E: ElemType<T>,
{
    type Item = &'a T;
    type IntoIter = Iter<'a, T, E>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
