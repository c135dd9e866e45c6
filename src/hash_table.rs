use alloc::vec::Vec;
use core::alloc::Layout;
use core::fmt;
use core::fmt::Debug;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::AtomicUsize;
use core::sync::atomic::Ordering;

use rand::RngCore;
use rand::SeedableRng;
use rand::TryRngCore;
use rand::rngs::OsRng;
use rand::rngs::SmallRng;
use slotmap::SlotMap;

use crate::bucket::BUCKET_SIZE;
use crate::bucket::Bucket;
use crate::bucket::EMPTY_ONE;
use crate::bucket::EMPTY_REST;
use crate::bucket::Fallibility;
use crate::bucket::Generation;
use crate::bucket::LOAD_FACTOR_DEN;
use crate::bucket::LOAD_FACTOR_NUM;
use crate::bucket::MIN_TOP_HASH;
use crate::bucket::bucket_mask;
use crate::bucket::bucket_shift;
use crate::bucket::is_empty;
use crate::bucket::over_load_factor;
use crate::bucket::too_many_overflow_buckets;
use crate::bucket::tophash;
use crate::elem::ElemType;
use crate::iter::Iter;
use crate::write_guard::WriteFlag;

slotmap::new_key_type! {
    /// Handle to one bucket array owned by a table.
    pub(crate) struct GenKey;
}

/// There may be a cursor using the current bucket array.
pub(crate) const ITERATOR: u8 = 1;
/// There may be a cursor using the old bucket array.
pub(crate) const OLD_ITERATOR: u8 = 2;
/// The current growth keeps the size class.
pub(crate) const SAME_SIZE_GROW: u8 = 8;

/// The error type for fallible insertion.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum TryReserveError {
    /// The next size class would exceed the addressable memory.
    CapacityOverflow,
    /// The allocator returned an error.
    AllocError {
        /// The layout of the allocation request that failed.
        layout: Layout,
    },
}

impl fmt::Display for TryReserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryReserveError::CapacityOverflow => {
                f.write_str("capacity overflow while growing the set")
            }
            TryReserveError::AllocError { layout } => write!(
                f,
                "memory allocation of {} bytes failed while growing the set",
                layout.size()
            ),
        }
    }
}

impl core::error::Error for TryReserveError {}

/// Statistics describing the internal state of a [`HashTable`].
#[cfg(any(test, feature = "stats"))]
#[derive(Debug, Clone)]
pub struct DebugStats {
    /// Number of live elements, including those not yet evacuated.
    pub count: usize,
    /// Size class `B`; the current array has `2^B` primary buckets.
    pub size_class: u8,
    /// Primary buckets in the current array.
    pub primary_buckets: usize,
    /// Overflow buckets handed out by the current array.
    pub overflow_buckets: usize,
    /// The table's (possibly approximate) overflow bucket counter.
    pub overflow_estimate: u16,
    /// Whether a growth is in progress.
    pub growing: bool,
    /// Whether the growth in progress keeps the size class.
    pub same_size_grow: bool,
    /// Primary buckets of the old array, zero when not growing.
    pub old_buckets: usize,
    /// Old buckets below this index are known to be evacuated.
    pub evacuated: usize,
    /// Finished bucket arrays kept alive by cursors.
    pub retired_generations: usize,
    /// Growths to the next size class since creation.
    pub bigger_grows: usize,
    /// Same-size growths since creation.
    pub same_size_grows: usize,
    /// `count` over the slots of the primary buckets.
    pub load_factor: f64,
}

#[cfg(any(test, feature = "stats"))]
impl DebugStats {
    /// Pretty-print the debug statistics.
    #[cfg(feature = "std")]
    pub fn print(&self) {
        println!("=== Set Debug Statistics ===");
        println!(
            "Population: {} in 2^{} buckets ({:.2}% load factor)",
            self.count,
            self.size_class,
            self.load_factor * 100.0
        );
        println!(
            "Buckets: {} primary, {} overflow (estimate {})",
            self.primary_buckets, self.overflow_buckets, self.overflow_estimate
        );
        if self.growing {
            println!(
                "Growing ({}): {}/{} old buckets evacuated",
                if self.same_size_grow {
                    "same size"
                } else {
                    "bigger"
                },
                self.evacuated,
                self.old_buckets
            );
        } else {
            println!("Not growing");
        }
        println!(
            "History: {} bigger, {} same-size growths, {} retired arrays pinned",
            self.bigger_grows, self.same_size_grows, self.retired_generations
        );
    }
}

/// A hash set engine with incremental growth.
///
/// `HashTable<T, E>` stores distinct elements of type `T` in buckets of eight
/// slots, chaining overflow buckets when a bucket fills. Hashing and equality
/// come from the element descriptor `E` (see [`ElemType`]).
///
/// Growth never rehashes the whole table at once: when the load factor is
/// exceeded (or overflow chains get too long) a new bucket array is allocated
/// and each later mutation moves at most two old buckets into it. Lookups
/// consult whichever array currently holds the element.
///
/// ## Performance Characteristics
///
/// - **Memory**: one tag byte per slot, plus an `Option<T>` per slot, plus a
///   chain link per bucket. Buckets are kept at most 6.5/8 full on average.
/// - **Latency**: insert and remove do a bounded amount of migration work, so
///   there is no stop-the-world rehash.
///
/// ## Example
///
/// ```rust
/// use evac_set::HashTable;
/// use evac_set::SeededHasher;
/// use std::collections::hash_map::RandomState;
///
/// let mut table = HashTable::new(SeededHasher::new(RandomState::new()));
/// for i in 0..1000u64 {
///     table.insert(i);
/// }
/// for i in 0..500u64 {
///     table.remove(&i);
/// }
/// assert_eq!(table.len(), 500);
/// assert!(!table.contains(&250));
/// assert!(table.contains(&750));
/// ```
pub struct HashTable<T, E> {
    pub(crate) elem: E,
    pub(crate) generations: SlotMap<GenKey, Generation<T>>,
    /// Current bucket array, allocated lazily for size class 0.
    pub(crate) buckets: Option<GenKey>,
    /// Array being evacuated; `Some` exactly while growing.
    pub(crate) old_buckets: Option<GenKey>,
    /// Finished arrays still pinned by a cursor.
    pub(crate) retired: Vec<GenKey>,
    pub(crate) count: usize,
    pub(crate) flags: u8,
    pub(crate) b: u8,
    pub(crate) noverflow: u16,
    pub(crate) seed: u64,
    pub(crate) nevacuate: usize,
    /// Bumped by every `clear`; cursors from before a clear are finished.
    pub(crate) clear_seq: u64,
    /// Copies elements out of old buckets while a cursor may still read them.
    pub(crate) cloner: Option<fn(&T) -> T>,
    pub(crate) rng: SmallRng,
    pub(crate) id: u64,
    nonce: AtomicUsize,
    pub(crate) write: WriteFlag,
    pub(crate) bigger_grows: usize,
    pub(crate) same_size_grows: usize,
}

pub(crate) enum Probe {
    Found(usize, usize),
    Vacant {
        slot: Option<(usize, usize)>,
        last: usize,
    },
}

#[inline(always)]
pub(crate) fn occupied<T>(slot: &Option<T>) -> &T {
    match slot {
        Some(value) => value,
        None => panic!("bad set state"),
    }
}

#[inline(always)]
pub(crate) fn infallible<R>(result: Result<R, TryReserveError>) -> R {
    match result {
        Ok(value) => value,
        Err(_) => unreachable!("infallible allocation returned an error"),
    }
}

/// Smallest size class whose buckets hold `hint` elements within the load
/// factor.
fn size_class(hint: usize) -> u8 {
    let mut b = 0;
    while over_load_factor(hint, b) {
        b += 1;
    }
    b
}

/// Walks the chain at `bucket` looking for an element accepted by `matches`,
/// remembering the first free slot on the way.
fn probe_chain<T>(
    generation: &Generation<T>,
    bucket: usize,
    mut matches: impl FnMut(u8, &T) -> bool,
) -> Probe {
    let mut vacant = None;
    let mut idx = bucket;
    loop {
        let b = &generation.buckets[idx];
        for i in 0..BUCKET_SIZE {
            let tag = b.tags[i];
            if is_empty(tag) {
                if vacant.is_none() {
                    vacant = Some((idx, i));
                }
                if tag == EMPTY_REST {
                    return Probe::Vacant {
                        slot: vacant,
                        last: idx,
                    };
                }
                continue;
            }
            if matches(tag, occupied(&b.slots[i])) {
                return Probe::Found(idx, i);
            }
        }
        match b.overflow {
            Some(next) => idx = next,
            None => {
                return Probe::Vacant {
                    slot: vacant,
                    last: idx,
                };
            }
        }
    }
}

/// Walks the chain at `bucket` and returns the first element accepted by
/// `matches`.
pub(crate) fn scan_chain<T>(
    generation: &Generation<T>,
    bucket: usize,
    mut matches: impl FnMut(u8, &T) -> bool,
) -> Option<&T> {
    let mut idx = Some(bucket);
    while let Some(i) = idx {
        let b = &generation.buckets[i];
        for s in 0..BUCKET_SIZE {
            let tag = b.tags[s];
            if tag == EMPTY_REST {
                return None;
            }
            if is_empty(tag) {
                continue;
            }
            let value = occupied(&b.slots[s]);
            if matches(tag, value) {
                return Some(value);
            }
        }
        idx = b.overflow;
    }
    None
}

/// Process-wide seed source. Zero until first read from the OS, then
/// stepped once per table.
static TABLE_SEEDS: AtomicU64 = AtomicU64::new(0);

const SEED_STEP: u64 = 0x9E37_79B9_7F4A_7C15;

/// Generator for a new table. Only the first table of the process touches
/// the OS entropy source; if that fails the sequence starts from a constant.
fn table_rng() -> SmallRng {
    if TABLE_SEEDS.load(Ordering::Relaxed) == 0 {
        let fresh = OsRng.try_next_u64().unwrap_or(SEED_STEP) | 1;
        let _ = TABLE_SEEDS.compare_exchange(0, fresh, Ordering::Relaxed, Ordering::Relaxed);
    }
    SmallRng::seed_from_u64(TABLE_SEEDS.fetch_add(SEED_STEP, Ordering::Relaxed))
}

impl<T, E> HashTable<T, E> {
    fn empty(elem: E) -> Self {
        let mut rng = table_rng();
        let seed = rng.next_u64();
        let id = rng.next_u64();
        Self {
            elem,
            generations: SlotMap::with_key(),
            buckets: None,
            old_buckets: None,
            retired: Vec::new(),
            count: 0,
            flags: 0,
            b: 0,
            noverflow: 0,
            seed,
            nevacuate: 0,
            clear_seq: 0,
            cloner: None,
            rng,
            id,
            nonce: AtomicUsize::new(0),
            write: WriteFlag::new(),
            bigger_grows: 0,
            same_size_grows: 0,
        }
    }

    /// Returns the number of elements in the table.
    ///
    /// Elements still waiting in the old bucket array during a growth are
    /// counted.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_set::HashTable;
    /// # use evac_set::SeededHasher;
    /// # use std::collections::hash_map::RandomState;
    /// #
    /// let mut table = HashTable::new(SeededHasher::new(RandomState::new()));
    /// assert_eq!(table.len(), 0);
    /// table.insert("a");
    /// table.insert("a");
    /// assert_eq!(table.len(), 1);
    /// ```
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` if the table contains no elements.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Returns the number of elements the table can hold before its next
    /// growth to a larger size class.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_set::HashTable;
    /// # use evac_set::SeededHasher;
    /// # use std::collections::hash_map::RandomState;
    /// #
    /// let table: HashTable<u32, _> =
    ///     HashTable::with_capacity(100, SeededHasher::new(RandomState::new()));
    /// assert!(table.capacity() >= 100);
    /// ```
    pub fn capacity(&self) -> usize {
        if self.b == 0 {
            BUCKET_SIZE
        } else {
            (LOAD_FACTOR_NUM * (bucket_shift(self.b) / LOAD_FACTOR_DEN)) as usize
        }
    }

    /// Returns a reference to the table's element descriptor.
    pub fn elem_type(&self) -> &E {
        &self.elem
    }

    /// Pseudo-random word for read-only traversals that cannot advance the
    /// table's generator.
    pub(crate) fn random_word(&self) -> u64 {
        let nonce = self.nonce.fetch_add(1, Ordering::Relaxed) as u64;
        SmallRng::seed_from_u64(self.id ^ nonce.rotate_left(32)).next_u64()
    }

    pub(crate) fn current_key(&self) -> GenKey {
        match self.buckets {
            Some(key) => key,
            None => panic!("bad set state"),
        }
    }
}

impl<T, E> HashTable<T, E>
where
    E: ElemType<T>,
{
    /// Creates an empty table. The first bucket is allocated by the first
    /// insertion.
    pub fn new(elem: E) -> Self {
        Self::with_capacity(0, elem)
    }

    /// Creates an empty table sized so that `hint` insertions fit without a
    /// growth.
    ///
    /// A hint of zero defers all allocation to the first insertion. A hint too
    /// large to ever be allocated is ignored.
    pub fn with_capacity(hint: usize, elem: E) -> Self {
        let mut table = Self::empty(elem);
        let hint = if Layout::array::<Bucket<T>>(hint).is_err() {
            0
        } else {
            hint
        };
        table.b = size_class(hint);
        if table.b != 0 {
            let generation = infallible(Generation::try_new(table.b, Fallibility::Infallible));
            table.buckets = Some(table.generations.insert(generation));
        }
        table
    }

    /// Adds `value` to the table.
    ///
    /// Returns `true` if the value was not present. If an equal element is
    /// already stored, the table is left unchanged unless the descriptor
    /// asks for updates ([`ElemType::needs_update`]), in which case `value`
    /// replaces it.
    ///
    /// # Panics
    ///
    /// Panics if the new size class overflows `usize`, and aborts if the
    /// allocator fails. See [`try_insert`](Self::try_insert).
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_set::HashTable;
    /// # use evac_set::SeededHasher;
    /// # use std::collections::hash_map::RandomState;
    /// #
    /// let mut table = HashTable::new(SeededHasher::new(RandomState::new()));
    /// assert!(table.insert(7));
    /// assert!(!table.insert(7));
    /// assert_eq!(table.len(), 1);
    /// ```
    pub fn insert(&mut self, value: T) -> bool {
        infallible(self.insert_with(value, false, Fallibility::Infallible)).is_none()
    }

    /// Adds `value` to the table, returning an error instead of aborting
    /// when memory for a growth or an overflow bucket cannot be obtained.
    ///
    /// On error the value is dropped and the table still holds exactly the
    /// elements it held before the call.
    pub fn try_insert(&mut self, value: T) -> Result<bool, TryReserveError> {
        self.insert_with(value, false, Fallibility::Fallible)
            .map(|previous| previous.is_none())
    }

    /// Adds `value` to the table, replacing an equal stored element.
    ///
    /// Returns the replaced element, or `None` if `value` was new.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_set::HashTable;
    /// # use evac_set::SeededHasher;
    /// # use std::collections::hash_map::RandomState;
    /// #
    /// let mut table = HashTable::new(SeededHasher::new(RandomState::new()));
    /// assert_eq!(table.replace(3), None);
    /// assert_eq!(table.replace(3), Some(3));
    /// assert_eq!(table.len(), 1);
    /// ```
    pub fn replace(&mut self, value: T) -> Option<T> {
        infallible(self.insert_with(value, true, Fallibility::Infallible))
    }

    /// Returns `Ok(None)` if `value` was inserted, or `Ok(Some(_))` holding
    /// whichever of `value` and the stored element is no longer in the table.
    fn insert_with(
        &mut self,
        value: T,
        replace: bool,
        fallibility: Fallibility,
    ) -> Result<Option<T>, TryReserveError> {
        let hash = self.elem.hash(&value, self.seed);
        let top = tophash(hash);
        let replace = replace || self.elem.needs_update();
        self.insert_hashed(hash, value, replace, fallibility, |elem, tag, stored, value| {
            tag == top && elem.equal(stored, value)
        })
    }

    pub(crate) fn insert_hashed<F>(
        &mut self,
        hash: u64,
        value: T,
        replace: bool,
        fallibility: Fallibility,
        matches: F,
    ) -> Result<Option<T>, TryReserveError>
    where
        F: Fn(&E, u8, &T, &T) -> bool,
    {
        self.write.begin();
        let result = self.insert_locked(hash, value, replace, fallibility, matches);
        self.write.end();
        result
    }

    fn insert_locked<F>(
        &mut self,
        hash: u64,
        value: T,
        replace: bool,
        fallibility: Fallibility,
        matches: F,
    ) -> Result<Option<T>, TryReserveError>
    where
        F: Fn(&E, u8, &T, &T) -> bool,
    {
        if !self.retired.is_empty() {
            self.sweep_retired();
        }
        if self.buckets.is_none() {
            let generation = Generation::try_new(self.b, fallibility)?;
            self.buckets = Some(self.generations.insert(generation));
        }

        let top = tophash(hash);
        loop {
            let bucket = (hash & bucket_mask(self.b)) as usize;
            if self.growing() {
                self.grow_work(bucket, fallibility)?;
            }
            let current = self.current_key();
            let probe = probe_chain(&self.generations[current], bucket, |tag, stored| {
                matches(&self.elem, tag, stored, &value)
            });

            match probe {
                Probe::Found(idx, i) => {
                    if replace {
                        return Ok(self.generations[current].buckets[idx].slots[i].replace(value));
                    }
                    return Ok(Some(value));
                }
                Probe::Vacant { slot, last } => {
                    // If we hit the max load factor or we have too many
                    // overflow buckets, and we're not already in the middle
                    // of growing, start growing.
                    if !self.growing()
                        && (over_load_factor(self.count + 1, self.b)
                            || too_many_overflow_buckets(self.noverflow, self.b))
                    {
                        self.hash_grow(fallibility)?;
                        // Growing the table invalidates everything, so try again.
                        continue;
                    }

                    let (idx, i) = match slot {
                        Some(position) => position,
                        None => {
                            let generation = &mut self.generations[current];
                            generation.reserve_overflow(1, fallibility)?;
                            let ovf = generation.new_overflow(last);
                            self.incr_noverflow();
                            (ovf, 0)
                        }
                    };
                    let b = &mut self.generations[current].buckets[idx];
                    b.tags[i] = top;
                    b.slots[i] = Some(value);
                    self.count += 1;
                    return Ok(None);
                }
            }
        }
    }

    /// Returns the array and bucket that currently hold elements with `hash`.
    pub(crate) fn locate(&self, hash: u64) -> Option<(&Generation<T>, usize)> {
        let current = self.buckets?;
        if let Some(old_key) = self.old_buckets {
            let old = &self.generations[old_key];
            let old_bucket = (hash & self.old_bucket_mask() as u64) as usize;
            if !old.buckets[old_bucket].is_evacuated() {
                return Some((old, old_bucket));
            }
        }
        Some((&self.generations[current], (hash & bucket_mask(self.b)) as usize))
    }

    /// Returns a reference to the stored element equal to `value`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_set::HashTable;
    /// # use evac_set::SeededHasher;
    /// # use std::collections::hash_map::RandomState;
    /// #
    /// let mut table = HashTable::new(SeededHasher::new(RandomState::new()));
    /// table.insert(String::from("key"));
    /// assert_eq!(table.get(&String::from("key")).map(String::as_str), Some("key"));
    /// assert_eq!(table.get(&String::from("nope")), None);
    /// ```
    pub fn get(&self, value: &T) -> Option<&T> {
        if self.count == 0 {
            return None;
        }
        self.write.check_read();
        let hash = self.elem.hash(value, self.seed);
        let top = tophash(hash);
        let (generation, bucket) = self.locate(hash)?;
        scan_chain(generation, bucket, |tag, stored| {
            tag == top && self.elem.equal(stored, value)
        })
    }

    /// Returns `true` if the table holds an element equal to `value`.
    pub fn contains(&self, value: &T) -> bool {
        self.get(value).is_some()
    }

    /// Removes and returns the element equal to `value`, if any.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_set::HashTable;
    /// # use evac_set::SeededHasher;
    /// # use std::collections::hash_map::RandomState;
    /// #
    /// let mut table = HashTable::new(SeededHasher::new(RandomState::new()));
    /// table.insert(1);
    /// assert_eq!(table.remove(&1), Some(1));
    /// assert_eq!(table.remove(&1), None);
    /// assert!(table.is_empty());
    /// ```
    pub fn remove(&mut self, value: &T) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        self.write.check_write();
        let hash = self.elem.hash(value, self.seed);
        let top = tophash(hash);

        self.write.begin();
        let bucket = (hash & bucket_mask(self.b)) as usize;
        let removed = self.remove_in_bucket(bucket, |elem, tag, stored| {
            tag == top && elem.equal(stored, value)
        });
        self.write.end();
        removed
    }

    pub(crate) fn remove_in_bucket(
        &mut self,
        bucket: usize,
        matches: impl Fn(&E, u8, &T) -> bool,
    ) -> Option<T> {
        if self.growing() {
            infallible(self.grow_work(bucket, Fallibility::Infallible));
        }
        let current = self.buckets?;
        let generation = &self.generations[current];
        let mut found = None;
        let mut idx = Some(bucket);
        'search: while let Some(i) = idx {
            let b = &generation.buckets[i];
            for s in 0..BUCKET_SIZE {
                let tag = b.tags[s];
                if tag == EMPTY_REST {
                    break 'search;
                }
                if is_empty(tag) {
                    continue;
                }
                if matches(&self.elem, tag, occupied(&b.slots[s])) {
                    found = Some((i, s));
                    break 'search;
                }
            }
            idx = b.overflow;
        }
        let (idx, slot) = found?;
        Some(self.vacate(current, bucket, idx, slot))
    }

    /// Empties one slot of the chain headed by `head`, keeping the
    /// `EMPTY_REST` markers exact.
    fn vacate(&mut self, current: GenKey, head: usize, mut idx: usize, mut i: usize) -> T {
        let generation = &mut self.generations[current];
        let removed = match generation.buckets[idx].slots[i].take() {
            Some(value) => value,
            None => panic!("bad set state"),
        };
        generation.buckets[idx].tags[i] = EMPTY_ONE;

        // If the bucket now ends in a bunch of empty slots, change those to
        // EMPTY_REST.
        let is_last = if i == BUCKET_SIZE - 1 {
            match generation.buckets[idx].overflow {
                Some(next) => generation.buckets[next].tags[0] == EMPTY_REST,
                None => true,
            }
        } else {
            generation.buckets[idx].tags[i + 1] == EMPTY_REST
        };
        if is_last {
            loop {
                generation.buckets[idx].tags[i] = EMPTY_REST;
                if i == 0 {
                    if idx == head {
                        break;
                    }
                    // Find previous bucket, continue at its last entry.
                    let mut prev = head;
                    loop {
                        match generation.buckets[prev].overflow {
                            Some(next) if next == idx => break,
                            Some(next) => prev = next,
                            None => panic!("bad set state"),
                        }
                    }
                    idx = prev;
                    i = BUCKET_SIZE - 1;
                } else {
                    i -= 1;
                }
                if generation.buckets[idx].tags[i] != EMPTY_ONE {
                    break;
                }
            }
        }

        self.count -= 1;
        if self.count == 0 {
            // Reset the seed to make it more difficult for attackers to
            // repeatedly trigger hash collisions.
            self.seed = self.rng.next_u64();
        }
        removed
    }

    /// Removes every element, keeping the current bucket array.
    ///
    /// Cursors created before the call are finished: their next step returns
    /// `None`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_set::HashTable;
    /// # use evac_set::SeededHasher;
    /// # use std::collections::hash_map::RandomState;
    /// #
    /// let mut table = HashTable::new(SeededHasher::new(RandomState::new()));
    /// for i in 0..100 {
    ///     table.insert(i);
    /// }
    /// let capacity = table.capacity();
    /// table.clear();
    /// assert!(table.is_empty());
    /// assert_eq!(table.capacity(), capacity);
    /// ```
    pub fn clear(&mut self) {
        if self.count == 0 {
            return;
        }
        self.write.begin();

        // Mark the old buckets empty so that cursors still walking them stop.
        if let Some(old) = self.old_buckets.take() {
            self.generations[old].mark_empty();
            self.retire(old);
        }
        self.flags &= !SAME_SIZE_GROW;
        self.nevacuate = 0;
        self.noverflow = 0;
        self.count = 0;
        self.clear_seq = self.clear_seq.wrapping_add(1);
        self.seed = self.rng.next_u64();
        if let Some(current) = self.buckets {
            self.generations[current].reset();
        }
        self.sweep_retired();

        self.write.end();
    }

    /// Returns an iterator over the elements, in an order that varies from
    /// call to call.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # use evac_set::HashTable;
    /// # use evac_set::SeededHasher;
    /// # use std::collections::hash_map::RandomState;
    /// #
    /// let mut table = HashTable::new(SeededHasher::new(RandomState::new()));
    /// table.insert(1);
    /// table.insert(2);
    /// let mut seen: Vec<i32> = table.iter().copied().collect();
    /// seen.sort();
    /// assert_eq!(seen, [1, 2]);
    /// ```
    pub fn iter(&self) -> Iter<'_, T, E> {
        Iter::new(self)
    }

    /// Copies every element into a vector, in an order that varies from call
    /// to call.
    pub fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        let mut out = Vec::with_capacity(self.count);
        if self.count == 0 {
            return out;
        }
        self.write.check_read();
        let Some(current) = self.buckets else {
            return out;
        };

        let r = self.random_word();
        let offset = ((r >> self.b) & (BUCKET_SIZE as u64 - 1)) as usize;
        let r = r as usize;
        let copy_chain = |out: &mut Vec<T>, generation: &Generation<T>, bucket: usize| {
            let mut idx = Some(bucket);
            while let Some(b) = idx {
                let b = &generation.buckets[b];
                for i in 0..BUCKET_SIZE {
                    let offi = (i + offset) & (BUCKET_SIZE - 1);
                    if is_empty(b.tags[offi]) {
                        continue;
                    }
                    out.push(occupied(&b.slots[offi]).clone());
                }
                idx = b.overflow;
            }
        };

        let generation = &self.generations[current];
        let size = generation.primary_len();
        for i in 0..size {
            copy_chain(&mut out, generation, i.wrapping_add(r) & (size - 1));
        }
        if let Some(old_key) = self.old_buckets {
            let old = &self.generations[old_key];
            let size = old.primary_len();
            for i in 0..size {
                let bucket = i.wrapping_add(r) & (size - 1);
                if old.buckets[bucket].is_evacuated() {
                    continue;
                }
                copy_chain(&mut out, old, bucket);
            }
        }
        debug_assert_eq!(out.len(), self.count);
        out
    }

    /// Consumes the table, returning its elements in arbitrary order.
    pub fn into_vec(mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.count);
        for key in [self.buckets, self.old_buckets].into_iter().flatten() {
            for bucket in &mut self.generations[key].buckets {
                for i in 0..BUCKET_SIZE {
                    // Evacuated slots only hold copies made for cursors.
                    if bucket.tags[i] >= MIN_TOP_HASH {
                        if let Some(value) = bucket.slots[i].take() {
                            out.push(value);
                        }
                    }
                }
            }
        }
        debug_assert_eq!(out.len(), self.count);
        out
    }

    /// Returns statistics about the table's internal layout.
    #[cfg(any(test, feature = "stats"))]
    pub fn debug_stats(&self) -> DebugStats {
        let (primary_buckets, overflow_buckets) = match self.buckets {
            Some(key) => {
                let generation = &self.generations[key];
                (generation.primary_len(), generation.overflow_len())
            }
            None => (0, 0),
        };
        let old_buckets = self
            .old_buckets
            .map(|key| self.generations[key].primary_len())
            .unwrap_or(0);
        DebugStats {
            count: self.count,
            size_class: self.b,
            primary_buckets,
            overflow_buckets,
            overflow_estimate: self.noverflow,
            growing: self.growing(),
            same_size_grow: self.same_size_grow(),
            old_buckets,
            evacuated: self.nevacuate,
            retired_generations: self.retired.len(),
            bigger_grows: self.bigger_grows,
            same_size_grows: self.same_size_grows,
            load_factor: if primary_buckets == 0 {
                0.0
            } else {
                self.count as f64 / (primary_buckets * BUCKET_SIZE) as f64
            },
        }
    }
}

impl<T, E> Clone for HashTable<T, E>
where
    T: Clone,
    E: ElemType<T> + Clone,
{
    /// Clones the table into one with the same seed and a size class no
    /// larger than this table's.
    ///
    /// The clone holds the same elements but never shares growth state: it
    /// starts out fully evacuated.
    fn clone(&self) -> Self {
        self.write.check_clone();
        let mut hint = self.count;
        if over_load_factor(hint, self.b) {
            // In rare cases (during a same-size growth) the table is
            // over-loaded. Keep the clone's bucket array no larger than ours.
            hint = (LOAD_FACTOR_NUM * (bucket_shift(self.b) / LOAD_FACTOR_DEN)) as usize;
        }
        let dst_b = size_class(hint);
        let mut dst = Self::empty(self.elem.clone());
        dst.seed = self.seed;
        dst.b = dst_b;

        let Some(src_key) = self.buckets.filter(|_| self.count != 0) else {
            if dst_b != 0 {
                let generation = infallible(Generation::try_new(dst_b, Fallibility::Infallible));
                dst.buckets = Some(dst.generations.insert(generation));
            }
            return dst;
        };
        let src = &self.generations[src_key];

        if !self.growing() && dst_b == self.b {
            // Same geometry: copy the bucket array wholesale.
            dst.buckets = Some(dst.generations.insert(src.duplicate()));
            dst.count = self.count;
            dst.noverflow = self.noverflow;
            return dst;
        }

        let generation = infallible(Generation::try_new(dst_b, Fallibility::Infallible));
        let dst_key = dst.generations.insert(generation);
        dst.buckets = Some(dst_key);

        let dst_size = 1usize << dst_b;
        let src_size = src.primary_len();
        for i in 0..dst_size {
            let mut position = (i, 0);
            let mut j = 0;
            while j < src_size {
                let mut idx = Some(i + j);
                while let Some(s) = idx {
                    position = dst.copy_bucket(dst_key, position, &src.buckets[s]);
                    idx = src.buckets[s].overflow;
                }
                j += dst_size;
            }
        }

        let Some(old_key) = self.old_buckets else {
            return dst;
        };
        let old = &self.generations[old_key];
        let mut old_b = self.b;
        if !self.same_size_grow() {
            old_b -= 1;
        }
        for i in 0..old.primary_len() {
            if old.buckets[i].is_evacuated() {
                continue;
            }
            if old_b >= dst_b {
                // Every element of this old bucket lands in the same
                // destination bucket; append at the end of its chain.
                let mut tail = i & (dst_size - 1);
                while let Some(next) = dst.generations[dst_key].buckets[tail].overflow {
                    tail = next;
                }
                let mut position = (tail, 0);
                let mut idx = Some(i);
                while let Some(s) = idx {
                    position = dst.copy_bucket(dst_key, position, &old.buckets[s]);
                    idx = old.buckets[s].overflow;
                }
                continue;
            }

            // One old bucket spreads over several destination buckets, so
            // place the elements one at a time.
            let mut idx = Some(i);
            while let Some(s) = idx {
                let b = &old.buckets[s];
                for k in 0..BUCKET_SIZE {
                    if is_empty(b.tags[k]) {
                        continue;
                    }
                    let value = occupied(&b.slots[k]);
                    let hash = self.elem.hash(value, self.seed);
                    dst.place(dst_key, hash, value.clone());
                }
                idx = b.overflow;
            }
        }
        dst
    }
}

impl<T, E> HashTable<T, E>
where
    T: Clone,
    E: ElemType<T>,
{
    /// Copies the live slots of `src` into the chain at `position`, writing
    /// into the first free slot at or after it. Returns where the next copy
    /// should continue.
    fn copy_bucket(
        &mut self,
        key: GenKey,
        (mut dst, mut pos): (usize, usize),
        src: &Bucket<T>,
    ) -> (usize, usize) {
        for i in 0..BUCKET_SIZE {
            if is_empty(src.tags[i]) {
                continue;
            }
            let generation = &mut self.generations[key];
            while pos < BUCKET_SIZE && !is_empty(generation.buckets[dst].tags[pos]) {
                pos += 1;
            }
            if pos == BUCKET_SIZE {
                dst = generation.new_overflow(dst);
                pos = 0;
                self.incr_noverflow();
            }
            let b = &mut self.generations[key].buckets[dst];
            b.tags[pos] = src.tags[i];
            b.slots[pos] = src.slots[i].clone();
            pos += 1;
            self.count += 1;
        }
        (dst, pos)
    }

    /// Stores an element known to be absent without growth checks.
    fn place(&mut self, key: GenKey, hash: u64, value: T) {
        let bucket = (hash & bucket_mask(self.b)) as usize;
        let probe = probe_chain(&self.generations[key], bucket, |_, _| false);
        let Probe::Vacant { slot, last } = probe else {
            panic!("bad set state")
        };
        let (idx, i) = match slot {
            Some(position) => position,
            None => {
                let ovf = self.generations[key].new_overflow(last);
                self.incr_noverflow();
                (ovf, 0)
            }
        };
        let b = &mut self.generations[key].buckets[idx];
        b.tags[i] = tophash(hash);
        b.slots[i] = Some(value);
        self.count += 1;
    }
}

impl<T, E> Debug for HashTable<T, E>
where
    T: Debug,
    E: ElemType<T>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}
