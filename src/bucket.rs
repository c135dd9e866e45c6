use alloc::alloc::handle_alloc_error;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::alloc::Layout;

use crate::hash_table::TryReserveError;

/// Number of element slots in a single bucket.
pub(crate) const BUCKET_SIZE: usize = 8;

/// Slot is empty, and so is every later slot in the bucket and its overflow
/// chain.
pub(crate) const EMPTY_REST: u8 = 0;
/// Slot is empty, later slots may not be.
pub(crate) const EMPTY_ONE: u8 = 1;
/// Element was evacuated to the lower half of the grown array.
pub(crate) const EVACUATED_X: u8 = 2;
/// Element was evacuated to the upper half of the grown array.
pub(crate) const EVACUATED_Y: u8 = 3;
/// Slot was empty when its bucket was evacuated.
pub(crate) const EVACUATED_EMPTY: u8 = 4;
/// Smallest tag a real hash may produce.
pub(crate) const MIN_TOP_HASH: u8 = 5;

// EVACUATED_X and EVACUATED_Y must differ only in their low bit; both
// evacuation and iteration pick the destination half from that bit.
const _: () = assert!(EVACUATED_X + 1 == EVACUATED_Y && EVACUATED_X ^ 1 == EVACUATED_Y);

/// Maximum average bucket load before a bigger growth, as a fraction
/// `LOAD_FACTOR_NUM / LOAD_FACTOR_DEN` (6.5 of 8 slots).
pub(crate) const LOAD_FACTOR_DEN: u64 = 2;
pub(crate) const LOAD_FACTOR_NUM: u64 = LOAD_FACTOR_DEN * BUCKET_SIZE as u64 * 13 / 16;

#[inline(always)]
pub(crate) fn tophash(hash: u64) -> u8 {
    let top = (hash >> 56) as u8;
    if top < MIN_TOP_HASH {
        top + MIN_TOP_HASH
    } else {
        top
    }
}

#[inline(always)]
pub(crate) fn is_empty(tag: u8) -> bool {
    tag <= EMPTY_ONE
}

#[inline(always)]
pub(crate) fn bucket_shift(b: u8) -> u64 {
    1u64 << (b & 63)
}

#[inline(always)]
pub(crate) fn bucket_mask(b: u8) -> u64 {
    bucket_shift(b) - 1
}

/// Reports whether `count` elements spread over `2^b` buckets exceed the load
/// factor.
#[inline]
pub(crate) fn over_load_factor(count: usize, b: u8) -> bool {
    count > BUCKET_SIZE
        && count as u64 > LOAD_FACTOR_NUM.saturating_mul(bucket_shift(b) / LOAD_FACTOR_DEN)
}

/// Reports whether there are too many overflow buckets for a table with
/// `2^b` buckets. "Too many" means roughly as many overflow buckets as
/// primary buckets.
#[inline]
pub(crate) fn too_many_overflow_buckets(noverflow: u16, b: u8) -> bool {
    let b = b.min(15);
    noverflow >= 1u16 << b
}

/// Whether memory allocation errors should return an error or abort.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Fallibility {
    Fallible,
    Infallible,
}

impl Fallibility {
    /// Error to return on capacity overflow.
    #[inline]
    pub(crate) fn capacity_overflow(self) -> TryReserveError {
        match self {
            Fallibility::Fallible => TryReserveError::CapacityOverflow,
            Fallibility::Infallible => panic!("Hash table capacity overflow"),
        }
    }

    /// Error to return on allocation error.
    #[inline]
    pub(crate) fn alloc_err(self, layout: Layout) -> TryReserveError {
        match self {
            Fallibility::Fallible => TryReserveError::AllocError { layout },
            Fallibility::Infallible => handle_alloc_error(layout),
        }
    }
}

/// Fixed-capacity storage unit: a tag per slot, the slots themselves and a
/// link to the next bucket of the chain.
///
/// A slot holds a value exactly when its tag is a real tag, or when it is
/// `EVACUATED_X`/`EVACUATED_Y` and an iterator predating the growth may still
/// read it.
#[derive(Clone)]
pub(crate) struct Bucket<T> {
    pub(crate) tags: [u8; BUCKET_SIZE],
    pub(crate) slots: [Option<T>; BUCKET_SIZE],
    pub(crate) overflow: Option<usize>,
}

impl<T> Bucket<T> {
    pub(crate) fn new() -> Self {
        Self {
            tags: [EMPTY_REST; BUCKET_SIZE],
            slots: core::array::from_fn(|_| None),
            overflow: None,
        }
    }

    /// An evacuated bucket keeps its migration state in the first tag.
    #[inline(always)]
    pub(crate) fn is_evacuated(&self) -> bool {
        let h = self.tags[0];
        h > EMPTY_ONE && h < MIN_TOP_HASH
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.tags = [EMPTY_REST; BUCKET_SIZE];
        for slot in &mut self.slots {
            *slot = None;
        }
        self.overflow = None;
    }

    /// Marks every slot as `EMPTY_REST` so in-flight iterators stop finding
    /// elements here, and releases the stored elements.
    #[inline]
    pub(crate) fn mark_empty(&mut self) {
        self.tags = [EMPTY_REST; BUCKET_SIZE];
        for slot in &mut self.slots {
            *slot = None;
        }
    }
}

/// One bucket array together with the overflow buckets chained from it.
///
/// The first `2^b` buckets are the primary buckets. Arrays with `b >= 4` are
/// allocated with an extra pool of `2^(b - 4)` buckets that overflow chains
/// draw from before the vector has to grow.
pub(crate) struct Generation<T> {
    pub(crate) buckets: Vec<Bucket<T>>,
    /// Number of primary buckets.
    base: usize,
    /// End of the preallocated overflow pool.
    pool_end: usize,
    /// Next unused bucket of the pool.
    next_overflow: usize,
    /// Held by every cursor whose snapshot is this generation.
    pub(crate) pin: Arc<()>,
    /// Caps the bucket vector so tests can make overflow reservation fail.
    #[cfg(test)]
    pub(crate) reserve_limit: Option<usize>,
}

impl<T> Generation<T> {
    pub(crate) fn try_new(b: u8, fallibility: Fallibility) -> Result<Self, TryReserveError> {
        if u32::from(b) >= usize::BITS - 1 {
            return Err(fallibility.capacity_overflow());
        }
        let base = 1usize << b;
        let mut total = base;
        // For small b, overflow buckets are unlikely.
        if b >= 4 {
            total += 1usize << (b - 4);
        }

        let mut buckets = Vec::new();
        reserve_buckets::<T>(&mut buckets, total, fallibility)?;
        buckets.resize_with(total, Bucket::new);

        Ok(Self {
            buckets,
            base,
            pool_end: total,
            next_overflow: base,
            pin: Arc::new(()),
            #[cfg(test)]
            reserve_limit: None,
        })
    }

    #[inline(always)]
    pub(crate) fn primary_len(&self) -> usize {
        self.base
    }

    /// Number of overflow buckets handed out so far.
    pub(crate) fn overflow_len(&self) -> usize {
        (self.next_overflow - self.base) + (self.buckets.len() - self.pool_end)
    }

    /// Makes sure `additional` overflow buckets can be handed out without
    /// allocating.
    pub(crate) fn reserve_overflow(
        &mut self,
        additional: usize,
        fallibility: Fallibility,
    ) -> Result<(), TryReserveError> {
        let pooled = self.pool_end - self.next_overflow;
        if additional <= pooled {
            return Ok(());
        }
        let needed = additional - pooled;
        #[cfg(test)]
        if let Some(limit) = self.reserve_limit {
            if self.buckets.len() + needed > limit {
                return Err(fallibility.alloc_err(Layout::new::<Bucket<T>>()));
            }
        }
        if self.buckets.capacity() - self.buckets.len() >= needed {
            return Ok(());
        }
        let target = self
            .buckets
            .len()
            .checked_add(needed)
            .ok_or_else(|| fallibility.capacity_overflow())?;
        reserve_buckets::<T>(&mut self.buckets, target, fallibility)
    }

    /// Chains a fresh overflow bucket after `bucket` and returns its index.
    pub(crate) fn new_overflow(&mut self, bucket: usize) -> usize {
        let ovf = if self.next_overflow < self.pool_end {
            let idx = self.next_overflow;
            self.next_overflow += 1;
            idx
        } else {
            self.buckets.push(Bucket::new());
            self.buckets.len() - 1
        };
        debug_assert!(self.buckets[bucket].overflow.is_none());
        self.buckets[bucket].overflow = Some(ovf);
        ovf
    }

    /// Number of buckets in the chain starting at `bucket`.
    pub(crate) fn chain_len(&self, bucket: usize) -> usize {
        let mut len = 0;
        let mut b = Some(bucket);
        while let Some(idx) = b {
            len += 1;
            b = self.buckets[idx].overflow;
        }
        len
    }

    /// Empties the generation in place, keeping the allocation and returning
    /// every pooled overflow bucket to the pool.
    pub(crate) fn reset(&mut self) {
        self.buckets.truncate(self.pool_end);
        for bucket in &mut self.buckets {
            bucket.reset();
        }
        self.next_overflow = self.base;
    }

    pub(crate) fn mark_empty(&mut self) {
        for bucket in &mut self.buckets {
            bucket.mark_empty();
        }
    }

    /// Copy of this generation that shares no pin with it.
    pub(crate) fn duplicate(&self) -> Self
    where
        T: Clone,
    {
        Self {
            buckets: self.buckets.clone(),
            base: self.base,
            pool_end: self.pool_end,
            next_overflow: self.next_overflow,
            pin: Arc::new(()),
            #[cfg(test)]
            reserve_limit: None,
        }
    }

    /// Whether some cursor still holds this generation.
    #[inline]
    pub(crate) fn is_pinned(&self) -> bool {
        Arc::strong_count(&self.pin) > 1
    }
}

fn reserve_buckets<T>(
    buckets: &mut Vec<Bucket<T>>,
    total: usize,
    fallibility: Fallibility,
) -> Result<(), TryReserveError> {
    let layout = match Layout::array::<Bucket<T>>(total) {
        Ok(layout) => layout,
        Err(_) => return Err(fallibility.capacity_overflow()),
    };
    match buckets.try_reserve_exact(total - buckets.len()) {
        Ok(()) => Ok(()),
        Err(_) => Err(fallibility.alloc_err(layout)),
    }
}
